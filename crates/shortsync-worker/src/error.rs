//! Worker error types.

use shortsync_models::{JobType, ModelError, PipelineStage};
use shortsync_queue::QueueError;
use shortsync_store::StoreError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// A stage reported failure, raised, or timed out. Terminal for that job only.
    #[error("Stage {stage} failed: {cause}")]
    StageFailure { stage: PipelineStage, cause: String },

    #[error("Recovery failed: {0}")]
    Recovery(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No handler registered for stage {stage} (job type {job_type})")]
    MissingStage {
        job_type: JobType,
        stage: PipelineStage,
    },

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

impl WorkerError {
    pub fn stage_failure(stage: PipelineStage, cause: impl Into<String>) -> Self {
        Self::StageFailure {
            stage,
            cause: cause.into(),
        }
    }

    pub fn recovery(msg: impl Into<String>) -> Self {
        Self::Recovery(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// The stage a failure is attributed to, if any.
    pub fn failed_stage(&self) -> Option<PipelineStage> {
        match self {
            WorkerError::StageFailure { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_failure_message_names_stage() {
        let err = WorkerError::stage_failure(PipelineStage::AssetGathering, "no assets");
        assert_eq!(err.to_string(), "Stage asset_gathering failed: no assets");
        assert_eq!(err.failed_stage(), Some(PipelineStage::AssetGathering));
        assert_eq!(WorkerError::recovery("x").failed_stage(), None);
    }
}
