//! Worker metrics.

use std::time::Duration;

use metrics::{counter, histogram};
use shortsync_models::PipelineStage;

pub mod names {
    pub const STAGE_DURATION: &str = "shortsync_stage_duration_seconds";
    pub const RECOVERED_JOBS: &str = "shortsync_recovered_jobs_total";
    pub const CIRCUIT_OPENED: &str = "shortsync_circuit_opened_total";
}

/// Record how long a stage ran and how it ended.
pub fn record_stage(stage: PipelineStage, outcome: &'static str, elapsed: Duration) {
    histogram!(
        names::STAGE_DURATION,
        "stage" => stage.as_str(),
        "outcome" => outcome
    )
    .record(elapsed.as_secs_f64());
}

/// Record jobs handled by startup recovery, by action taken.
pub fn record_recovered(action: &'static str, count: usize) {
    if count > 0 {
        counter!(names::RECOVERED_JOBS, "action" => action).increment(count as u64);
    }
}

pub fn record_circuit_opened(name: &str) {
    counter!(names::CIRCUIT_OPENED, "stage" => name.to_string()).increment(1);
}
