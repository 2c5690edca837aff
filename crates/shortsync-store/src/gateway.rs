//! The persistence boundary between the scheduler and durable storage.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shortsync_models::{Job, JobId, JobStatus, Payload, QueueSnapshot};

use crate::error::StoreResult;

/// Shared handle to a gateway implementation.
pub type SharedGateway = Arc<dyn PersistenceGateway>;

/// Durable storage for queue snapshots and job records.
///
/// Callers on the scheduling path treat every method as fallible and keep
/// working from memory when it fails. Only startup recovery treats a
/// `load_snapshot` error as significant.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;

    /// Replace the stored snapshot.
    async fn save_snapshot(&self, snapshot: &QueueSnapshot) -> StoreResult<()>;

    /// Load the last stored snapshot, `None` if nothing was ever saved.
    async fn load_snapshot(&self) -> StoreResult<Option<QueueSnapshot>>;

    /// Insert or replace a job record.
    async fn save_job(&self, job: &Job) -> StoreResult<()>;

    /// Update the status of an existing job record.
    async fn update_job_status(
        &self,
        id: &JobId,
        status: JobStatus,
        result: Option<&Payload>,
        error: Option<&str>,
    ) -> StoreResult<()>;

    /// Fetch a job record.
    async fn get_job(&self, id: &JobId) -> StoreResult<Option<Job>>;

    /// Reachability probe used by readiness checks.
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Apply a status update to a stored record.
///
/// Stored records may lag the in-memory state, so the update is applied
/// as-is instead of through the job's transition rules.
pub fn apply_status(
    job: &mut Job,
    status: JobStatus,
    result: Option<&Payload>,
    error: Option<&str>,
    at: DateTime<Utc>,
) {
    job.status = status;
    if let Some(result) = result {
        job.result = Some(result.clone());
    }
    if let Some(error) = error {
        job.error_message = Some(error.to_string());
    }
    match status {
        JobStatus::Processing if job.started_at.is_none() => job.started_at = Some(at),
        s if s.is_terminal() && job.completed_at.is_none() => job.completed_at = Some(at),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shortsync_models::{JobPriority, JobType};

    #[test]
    fn test_apply_status_stamps_terminal_time() {
        let mut job = Job::new(JobType::QualityCheck, JobPriority::Normal, Payload::new());
        let now = Utc::now();

        apply_status(&mut job, JobStatus::Processing, None, None, now);
        assert_eq!(job.started_at, Some(now));

        apply_status(&mut job, JobStatus::Failed, None, Some("interrupted"), now);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("interrupted"));
        assert_eq!(job.completed_at, Some(now));
    }
}
