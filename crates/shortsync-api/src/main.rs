//! ShortSync server binary: scheduler, orchestrator and HTTP API in one
//! process.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shortsync_api::{create_router, metrics, ApiConfig, AppState, StagesMode};
use shortsync_queue::{PriorityScheduler, QueueConfig};
use shortsync_store::StoreConfig;
use shortsync_worker::{Orchestrator, RecoveryManager, StageRegistry, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting shortsync");

    let api_config = ApiConfig::from_env().map_err(anyhow::Error::msg)?;
    let queue_config = QueueConfig::from_env();
    let worker_config = WorkerConfig::from_env()?;
    let store_config = StoreConfig::from_env()?;
    info!(
        host = %api_config.host,
        port = api_config.port,
        store = ?store_config.backend,
        recovery_policy = %worker_config.recovery.policy,
        recovery_policy_explicit = worker_config.recovery.policy_explicit,
        "Configuration loaded"
    );

    let metrics_handle = if api_config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("failed to install Prometheus recorder")?)
    } else {
        None
    };

    let gateway = store_config
        .connect()
        .await
        .context("failed to connect persistence gateway")?;
    let scheduler = Arc::new(PriorityScheduler::new(queue_config, gateway));

    let accepted: Vec<_> = scheduler.config().limits.keys().copied().collect();
    let mut stages = match api_config.stages_mode {
        StagesMode::Passthrough => {
            warn!("Running with passthrough stages; no external providers are called");
            StageRegistry::passthrough_builder()
        }
    };
    if let Some(breaker) = worker_config.circuit_breaker.clone() {
        info!(
            failure_threshold = breaker.failure_threshold,
            recovery_timeout_secs = breaker.recovery_timeout.as_secs(),
            "Stage circuit breakers enabled"
        );
        stages = stages.circuit_breaker(breaker);
    }
    let registry = stages.build(&accepted)?;
    for job_type in registry.job_types() {
        debug!(job_type = %job_type, stages = ?registry.stages(job_type), "Stage plan");
    }
    info!(job_types = registry.job_types().count(), "Stage registry built");

    let recovery = RecoveryManager::new(scheduler.clone(), worker_config.recovery.clone())
        .recover()
        .await
        .context("startup recovery failed")?;

    let orchestrator = Orchestrator::new(scheduler.clone(), Arc::new(registry), worker_config);
    orchestrator.start().await?;

    let state = AppState::new(api_config.clone(), scheduler, recovery);
    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", api_config.host, api_config.port)
        .parse()
        .context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    // Drain in-flight jobs and save the final snapshot even if the server
    // stopped with an error.
    orchestrator.shutdown().await?;
    served.context("server error")?;

    info!("Shutdown complete");
    Ok(())
}

/// Colored output for dev, JSON when `LOG_FORMAT=json`.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shortsync=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Received shutdown signal");
}
