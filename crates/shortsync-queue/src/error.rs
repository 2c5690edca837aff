//! Queue error types.

use shortsync_models::ModelError;
use shortsync_store::StoreError;
use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Malformed submission, never enqueued.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A job with this id is already known to the scheduler.
    #[error("Job already exists: {0}")]
    DuplicateJob(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {id} is not owned by an executor")]
    NotRunning { id: String },

    #[error("Result channel closed for job {0}")]
    ResultChannelClosed(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Persistence error: {0}")]
    Store(#[from] StoreError),
}

impl QueueError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::JobNotFound(id.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, QueueError::Validation(_))
    }
}
