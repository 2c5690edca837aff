//! Axum HTTP API server.
//!
//! This crate provides:
//! - The job submission API over the in-process scheduler
//! - Health, readiness, host info and Prometheus metrics endpoints
//! - Per-IP rate limiting and request tracing middleware

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod system;

pub use config::{ApiConfig, StagesMode};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
