//! In-memory gateway, used by tests and `STORE_BACKEND=memory`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use shortsync_models::{Job, JobId, JobStatus, Payload, QueueSnapshot};
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::gateway::{apply_status, PersistenceGateway};

/// Gateway that keeps the encoded snapshot and job records in memory.
///
/// Snapshots are stored as encoded bytes so that tests observe exactly what
/// a durable backend would write. Reads and writes can be made to fail on
/// demand to exercise degraded-persistence paths.
#[derive(Default)]
pub struct InMemoryGateway {
    snapshot: RwLock<Option<Vec<u8>>>,
    jobs: RwLock<HashMap<JobId, Job>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    snapshot_saves: AtomicU64,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the stored snapshot.
    pub async fn with_snapshot(self, snapshot: &QueueSnapshot) -> StoreResult<Self> {
        *self.snapshot.write().await = Some(snapshot.to_json_vec()?);
        Ok(self)
    }

    /// Make every write fail with `StoreError::Unavailable`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every read fail with `StoreError::Unavailable`.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Raw bytes of the last saved snapshot.
    pub async fn snapshot_bytes(&self) -> Option<Vec<u8>> {
        self.snapshot.read().await.clone()
    }

    /// Number of successful snapshot saves.
    pub fn snapshot_saves(&self) -> u64 {
        self.snapshot_saves.load(Ordering::SeqCst)
    }

    /// Number of stored job records.
    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    fn check_write(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("in-memory store rejecting writes"));
        }
        Ok(())
    }

    fn check_read(&self) -> StoreResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("in-memory store rejecting reads"));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn save_snapshot(&self, snapshot: &QueueSnapshot) -> StoreResult<()> {
        self.check_write()?;
        let bytes = snapshot.to_json_vec()?;
        *self.snapshot.write().await = Some(bytes);
        self.snapshot_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_snapshot(&self) -> StoreResult<Option<QueueSnapshot>> {
        self.check_read()?;
        match self.snapshot.read().await.as_deref() {
            Some(bytes) => Ok(Some(QueueSnapshot::from_json_slice(bytes)?)),
            None => Ok(None),
        }
    }

    async fn save_job(&self, job: &Job) -> StoreResult<()> {
        self.check_write()?;
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn update_job_status(
        &self,
        id: &JobId,
        status: JobStatus,
        result: Option<&Payload>,
        error: Option<&str>,
    ) -> StoreResult<()> {
        self.check_write()?;
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::job_not_found(id.as_str()))?;
        apply_status(job, status, result, error, Utc::now());
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> StoreResult<Option<Job>> {
        self.check_read()?;
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_read()
    }
}
