//! Health check handlers.

use std::path::PathBuf;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use shortsync_worker::RecoveryReport;

use crate::state::AppState;
use crate::system::HostReport;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
    pub recovery: RecoveryReport,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub store: CheckStatus,
    pub recovery: CheckStatus,
    /// Persistence failures the scheduler logged and carried on from
    pub persistence_errors: u64,
}

#[derive(Serialize)]
pub struct CheckStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl CheckStatus {
    fn ok(latency_ms: Option<u64>) -> Self {
        Self {
            status: "ok".to_string(),
            error: None,
            latency_ms,
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            error: Some(msg.into()),
            latency_ms: None,
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Readiness check endpoint (readiness probe).
/// Checks the persistence gateway and the startup recovery outcome.
pub async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let store_check = {
        let start = Instant::now();
        match state.scheduler.gateway().ping().await {
            Ok(()) => CheckStatus::ok(Some(start.elapsed().as_millis() as u64)),
            Err(e) => CheckStatus::error(e.to_string()),
        }
    };

    let recovery_check = match &state.recovery.load_error {
        None => CheckStatus::ok(None),
        Some(e) => CheckStatus::error(format!("started from an empty queue: {e}")),
    };

    let all_ok = store_check.is_ok() && recovery_check.is_ok();

    let response = ReadinessResponse {
        status: if all_ok { "ready" } else { "degraded" }.to_string(),
        checks: ReadinessChecks {
            store: store_check,
            recovery: recovery_check,
            persistence_errors: state.scheduler.persistence_errors(),
        },
        recovery: state.recovery.as_ref().clone(),
    };

    if all_ok {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}

/// Host and queue information.
#[derive(Serialize)]
pub struct SystemInfoResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    pub host: HostReport,
    pub pending_jobs: usize,
    pub active_jobs: usize,
}

/// Host resource usage alongside queue depth.
pub async fn system_info(State(state): State<AppState>) -> Json<SystemInfoResponse> {
    let data_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    let host = state.host.report(&data_dir).await;

    Json(SystemInfoResponse {
        status: if host.healthy() { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        host,
        pending_jobs: state.scheduler.pending_count().await,
        active_jobs: state.scheduler.active_count().await,
    })
}
