//! Persistence gateway for the ShortSync scheduler.
//!
//! This crate provides:
//! - The `PersistenceGateway` trait used by the scheduler and recovery
//! - In-memory, flat-file and Redis implementations
//! - Store configuration and retry with exponential backoff

pub mod config;
pub mod error;
pub mod file;
pub mod gateway;
pub mod memory;
pub mod metrics;
pub mod redis_store;
pub mod retry;

pub use config::{StoreBackend, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use file::FileGateway;
pub use gateway::{apply_status, PersistenceGateway, SharedGateway};
pub use memory::InMemoryGateway;
pub use redis_store::RedisGateway;
pub use retry::{with_retry, RetryConfig};
