//! Scheduler metrics.

use metrics::{counter, gauge};
use shortsync_models::{JobStatus, JobType};

/// Metric name constants for consistency.
pub mod names {
    pub const JOBS_ENQUEUED_TOTAL: &str = "shortsync_jobs_enqueued_total";
    pub const JOBS_FINISHED_TOTAL: &str = "shortsync_jobs_finished_total";
    pub const QUEUE_LENGTH: &str = "shortsync_queue_length";
    pub const JOBS_IN_FLIGHT: &str = "shortsync_jobs_in_flight";
    pub const RATE_LIMIT_HITS_TOTAL: &str = "shortsync_rate_limit_hits_total";
    pub const PERSISTENCE_ERRORS_TOTAL: &str = "shortsync_persistence_errors_total";
}

pub fn record_enqueued(job_type: JobType) {
    counter!(names::JOBS_ENQUEUED_TOTAL, "type" => job_type.as_str()).increment(1);
}

pub fn record_finished(job_type: JobType, status: JobStatus) {
    counter!(
        names::JOBS_FINISHED_TOTAL,
        "type" => job_type.as_str(),
        "status" => status.as_str()
    )
    .increment(1);
}

pub fn record_rate_limited(job_type: JobType) {
    counter!(names::RATE_LIMIT_HITS_TOTAL, "type" => job_type.as_str()).increment(1);
}

pub fn record_persistence_error(operation: &'static str) {
    counter!(names::PERSISTENCE_ERRORS_TOTAL, "op" => operation).increment(1);
}

pub fn set_queue_gauges(queue_length: usize, in_flight: usize) {
    gauge!(names::QUEUE_LENGTH).set(queue_length as f64);
    gauge!(names::JOBS_IN_FLIGHT).set(in_flight as f64);
}
