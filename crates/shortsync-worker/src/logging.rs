//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for job execution with
//! tracing spans and contextual information.

use std::time::Duration;

use shortsync_models::{JobId, JobType, PipelineStage};
use tracing::{error, info, warn, Span};

/// Job logger for structured logging with consistent formatting.
///
/// Every event carries the job ID and job type.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    job_type: JobType,
}

impl JobLogger {
    pub fn new(job_id: &JobId, job_type: JobType) -> Self {
        Self {
            job_id: job_id.to_string(),
            job_type,
        }
    }

    /// Log the start of a job.
    pub fn log_start(&self, attempt: u32, stages: usize) {
        info!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            attempt = attempt,
            stages = stages,
            "Job started"
        );
    }

    /// Log a finished stage.
    pub fn log_stage(&self, stage: PipelineStage, elapsed: Duration, progress: f64) {
        info!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            stage = %stage,
            elapsed_ms = elapsed.as_millis() as u64,
            progress = progress,
            "Stage finished"
        );
    }

    /// Log a warning during job execution.
    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            "Job warning: {}", message
        );
    }

    /// Log an error during job execution.
    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            "Job error: {}", message
        );
    }

    /// Log the terminal outcome of a job.
    pub fn log_completion(&self, status: &str, execution_time_secs: Option<f64>) {
        info!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            status = status,
            execution_time_secs = execution_time_secs.unwrap_or_default(),
            "Job completed"
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            job_type = %self.job_type
        )
    }
}
