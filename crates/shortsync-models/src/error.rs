//! Model error types.

use thiserror::Error;

use crate::job::JobStatus;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Unknown pipeline stage: {0}")]
    UnknownStage(String),

    #[error("Unknown job priority: {0}")]
    UnknownPriority(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Unsupported snapshot version {found} (supported: {supported})")]
    UnsupportedSnapshotVersion { found: u32, supported: u32 },

    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    pub fn malformed_snapshot(msg: impl Into<String>) -> Self {
        Self::MalformedSnapshot(msg.into())
    }
}
