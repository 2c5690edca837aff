//! Store configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing::info;

use crate::error::{StoreError, StoreResult};
use crate::file::FileGateway;
use crate::gateway::SharedGateway;
use crate::memory::InMemoryGateway;
use crate::redis_store::RedisGateway;
use crate::retry::RetryConfig;

/// Which gateway implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    Memory,
    #[default]
    File,
    Redis,
}

impl FromStr for StoreBackend {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" => Ok(StoreBackend::Memory),
            "file" | "fs" => Ok(StoreBackend::File),
            "redis" => Ok(StoreBackend::Redis),
            other => Err(StoreError::unavailable(format!(
                "unknown store backend: {other}"
            ))),
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Backend selection
    pub backend: StoreBackend,
    /// Directory for the file backend
    pub dir: PathBuf,
    /// Redis URL for the redis backend
    pub redis_url: String,
    /// Retry policy for remote backends
    pub retry: RetryConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            dir: PathBuf::from("./data"),
            redis_url: "redis://localhost:6379".to_string(),
            retry: RetryConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        let defaults = Self::default();
        let backend = match std::env::var("STORE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.backend,
        };

        Ok(Self {
            backend,
            dir: std::env::var("STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.dir),
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            retry: RetryConfig::from_env(),
        })
    }

    /// Build the configured gateway.
    pub async fn connect(&self) -> StoreResult<SharedGateway> {
        let gateway: SharedGateway = match self.backend {
            StoreBackend::Memory => Arc::new(InMemoryGateway::new()),
            StoreBackend::File => Arc::new(FileGateway::open(&self.dir).await?),
            StoreBackend::Redis => Arc::new(RedisGateway::new(&self.redis_url, self.retry.clone())?),
        };
        info!(backend = gateway.backend(), "Persistence gateway ready");
        Ok(gateway)
    }
}
