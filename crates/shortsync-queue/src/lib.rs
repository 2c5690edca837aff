//! In-process priority scheduler for ShortSync jobs.
//!
//! This crate provides:
//! - A priority ready-queue with FIFO tie-break
//! - Per-job-type concurrency and rolling-window rate limiting
//! - The pipeline stage state machine
//! - Per-job result channels and queue statistics

pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod rate_limit;
pub mod scheduler;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{QueueConfig, RateLimit};
pub use error::{QueueError, QueueResult};
pub use pipeline::PipelineStateMachine;
pub use rate_limit::RateLimiter;
pub use scheduler::{
    CancelSignal, ClaimedJob, JobHandle, PriorityScheduler, QueueStats, RestoredState, TypeStats,
};
