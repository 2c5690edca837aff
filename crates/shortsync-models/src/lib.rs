//! Shared data models for the ShortSync job scheduler.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, job types, priorities and statuses
//! - Pipeline stages and pipeline runs
//! - Versioned queue snapshots used for crash recovery

pub mod error;
pub mod job;
pub mod pipeline;
pub mod snapshot;

// Re-export common types
pub use error::{ModelError, ModelResult};
pub use job::{Job, JobId, JobPriority, JobResult, JobStatus, JobType, Payload};
pub use pipeline::{PipelineRun, PipelineStage};
pub use snapshot::{JobCounters, PendingEntry, QueueSnapshot, SNAPSHOT_VERSION};
