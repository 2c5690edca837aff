//! Store metrics collection.
//!
//! - Operation counters by backend, operation and outcome
//! - Latency histograms
//! - Retry counters

use metrics::{counter, histogram};

// =============================================================================
// Metric Names
// =============================================================================

/// Metric name constants for consistency.
pub mod names {
    /// Total store operations by backend, operation and outcome.
    pub const OPERATIONS_TOTAL: &str = "shortsync_store_operations_total";

    /// Total retry attempts by operation.
    pub const RETRIES_TOTAL: &str = "shortsync_store_retries_total";

    /// Operation latency in seconds by backend and operation.
    pub const LATENCY_SECONDS: &str = "shortsync_store_latency_seconds";
}

// =============================================================================
// Recording Functions
// =============================================================================

/// Record metrics for a completed store operation.
pub fn record_operation(backend: &'static str, operation: &str, ok: bool, latency_ms: f64) {
    let outcome = if ok { "ok" } else { "error" };

    counter!(
        names::OPERATIONS_TOTAL,
        "backend" => backend,
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "backend" => backend,
        "operation" => operation.to_string()
    )
    .record(latency_ms / 1000.0);
}

/// Record a retry attempt.
pub fn record_retry(operation: &str) {
    counter!(
        names::RETRIES_TOTAL,
        "operation" => operation.to_string()
    )
    .increment(1);
}
