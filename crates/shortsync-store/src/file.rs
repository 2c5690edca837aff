//! Flat-file gateway.
//!
//! Layout under the configured directory:
//! - `snapshot.json` holds the latest queue snapshot
//! - `jobs/<job_id>.json` holds one job record per file
//!
//! Every write goes to its own temporary sibling first and is then renamed
//! over the target, so a crash mid-write leaves the previous file intact and
//! concurrent writers never share a temp file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use shortsync_models::{Job, JobId, JobStatus, Payload, QueueSnapshot};
use tokio::fs;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::gateway::{apply_status, PersistenceGateway};
use crate::metrics::record_operation;

const SNAPSHOT_FILE: &str = "snapshot.json";
const JOBS_DIR: &str = "jobs";

static TMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Gateway backed by JSON files in a directory.
pub struct FileGateway {
    root: PathBuf,
}

impl FileGateway {
    /// Create the directory layout if missing.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(JOBS_DIR)).await?;
        debug!(path = %root.display(), "Opened file store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE)
    }

    fn job_path(&self, id: &JobId) -> StoreResult<PathBuf> {
        if !id.is_valid() {
            return Err(StoreError::unavailable(format!(
                "job id not usable as a file name: {id}"
            )));
        }
        Ok(self.root.join(JOBS_DIR).join(format!("{}.json", id.as_str())))
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
        let sequence = TMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("json.{}.{sequence}.tmp", std::process::id()));
        fs::write(&tmp, bytes).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_optional(path: &Path) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_job(&self, job: &Job) -> StoreResult<()> {
        let path = self.job_path(&job.id)?;
        let bytes = serde_json::to_vec_pretty(job)?;
        Self::write_atomic(&path, &bytes).await
    }

    async fn read_job(&self, id: &JobId) -> StoreResult<Option<Job>> {
        let path = self.job_path(id)?;
        match Self::read_optional(&path).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// Time an operation and record its outcome.
async fn observed<T>(
    operation: &'static str,
    fut: impl std::future::Future<Output = StoreResult<T>>,
) -> StoreResult<T> {
    let start = Instant::now();
    let result = fut.await;
    record_operation(
        "file",
        operation,
        result.is_ok(),
        start.elapsed().as_secs_f64() * 1000.0,
    );
    result
}

#[async_trait]
impl PersistenceGateway for FileGateway {
    fn backend(&self) -> &'static str {
        "file"
    }

    async fn save_snapshot(&self, snapshot: &QueueSnapshot) -> StoreResult<()> {
        observed("save_snapshot", async {
            let bytes = snapshot.to_json_vec()?;
            Self::write_atomic(&self.snapshot_path(), &bytes).await
        })
        .await
    }

    async fn load_snapshot(&self) -> StoreResult<Option<QueueSnapshot>> {
        observed("load_snapshot", async {
            match Self::read_optional(&self.snapshot_path()).await? {
                Some(bytes) => Ok(Some(QueueSnapshot::from_json_slice(&bytes)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn save_job(&self, job: &Job) -> StoreResult<()> {
        observed("save_job", self.write_job(job)).await
    }

    async fn update_job_status(
        &self,
        id: &JobId,
        status: JobStatus,
        result: Option<&Payload>,
        error: Option<&str>,
    ) -> StoreResult<()> {
        observed("update_job_status", async {
            let mut job = self
                .read_job(id)
                .await?
                .ok_or_else(|| StoreError::job_not_found(id.as_str()))?;
            apply_status(&mut job, status, result, error, Utc::now());
            self.write_job(&job).await
        })
        .await
    }

    async fn get_job(&self, id: &JobId) -> StoreResult<Option<Job>> {
        observed("get_job", self.read_job(id)).await
    }

    async fn ping(&self) -> StoreResult<()> {
        fs::metadata(self.root.join(JOBS_DIR)).await?;
        Ok(())
    }
}
