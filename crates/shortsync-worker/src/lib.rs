//! Job execution for the ShortSync scheduler.
//!
//! This crate provides:
//! - The stage collaborator interface and a static stage registry
//! - The job executor that drives a job through its stages
//! - Startup recovery from the last persisted snapshot
//! - A circuit breaker for flaky stage collaborators
//! - The orchestrator loop with periodic snapshots and graceful shutdown

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod recovery;
pub mod registry;
pub mod runtime;
pub mod stage;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::{RecoveryConfig, RecoveryPolicy, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use recovery::{RecoveryManager, RecoveryReport};
pub use registry::{StageRegistry, StageRegistryBuilder};
pub use runtime::Orchestrator;
pub use stage::{
    stage_fn, PassthroughStage, SharedStage, StageContext, StageHandler, StageOutcome, StageResult,
};
