//! Redis gateway.
//!
//! Keys:
//! - `shortsync:snapshot` holds the encoded queue snapshot
//! - `shortsync:job:{id}` holds one encoded job record

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use shortsync_models::{Job, JobId, JobStatus, Payload, QueueSnapshot};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::gateway::{apply_status, PersistenceGateway};
use crate::retry::{with_retry, RetryConfig};

const DEFAULT_PREFIX: &str = "shortsync";

/// Gateway backed by a Redis server.
pub struct RedisGateway {
    client: redis::Client,
    prefix: String,
    retry: RetryConfig,
}

impl RedisGateway {
    /// Create a gateway. No connection is made until the first call.
    pub fn new(redis_url: &str, retry: RetryConfig) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            prefix: DEFAULT_PREFIX.to_string(),
            retry,
        })
    }

    /// Use a different key prefix (tests isolate themselves this way).
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn snapshot_key(&self) -> String {
        format!("{}:snapshot", self.prefix)
    }

    fn job_key(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    async fn conn(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn set_bytes(&self, key: &str, bytes: &[u8]) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        conn.set::<_, _, ()>(key, bytes).await?;
        Ok(())
    }

    async fn get_bytes(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        let bytes: Option<Vec<u8>> = conn.get(key).await?;
        Ok(bytes)
    }

    async fn read_job(&self, id: &JobId) -> StoreResult<Option<Job>> {
        let key = self.job_key(id);
        match self.get_bytes(&key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl PersistenceGateway for RedisGateway {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn save_snapshot(&self, snapshot: &QueueSnapshot) -> StoreResult<()> {
        let bytes = snapshot.to_json_vec()?;
        let key = self.snapshot_key();
        with_retry(&self.retry, "save_snapshot", || self.set_bytes(&key, &bytes)).await?;
        debug!(pending = snapshot.pending.len(), "Saved snapshot to Redis");
        Ok(())
    }

    async fn load_snapshot(&self) -> StoreResult<Option<QueueSnapshot>> {
        let key = self.snapshot_key();
        let bytes = with_retry(&self.retry, "load_snapshot", || self.get_bytes(&key)).await?;
        match bytes {
            Some(bytes) => Ok(Some(QueueSnapshot::from_json_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save_job(&self, job: &Job) -> StoreResult<()> {
        let bytes = serde_json::to_vec(job)?;
        let key = self.job_key(&job.id);
        with_retry(&self.retry, "save_job", || self.set_bytes(&key, &bytes)).await
    }

    async fn update_job_status(
        &self,
        id: &JobId,
        status: JobStatus,
        result: Option<&Payload>,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let mut job = with_retry(&self.retry, "get_job", || self.read_job(id))
            .await?
            .ok_or_else(|| StoreError::job_not_found(id.as_str()))?;
        apply_status(&mut job, status, result, error, Utc::now());

        let bytes = serde_json::to_vec(&job)?;
        let key = self.job_key(id);
        with_retry(&self.retry, "update_job_status", || {
            self.set_bytes(&key, &bytes)
        })
        .await
    }

    async fn get_job(&self, id: &JobId) -> StoreResult<Option<Job>> {
        with_retry(&self.retry, "get_job", || self.read_job(id)).await
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
