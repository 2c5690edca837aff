//! Startup recovery.
//!
//! Loads the last snapshot and reconciles its unfinished work with a fresh
//! scheduler before the orchestrator starts:
//!
//! - Entries created before the staleness threshold are discarded and their
//!   stored records marked failed.
//! - Pending jobs are re-enqueued in their original order.
//! - Jobs that were processing are failed or re-enqueued according to
//!   [`RecoveryPolicy`].
//! - Rate windows start empty.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shortsync_models::{Job, JobId, JobStatus, PipelineRun, PipelineStage, QueueSnapshot};
use shortsync_queue::{PriorityScheduler, RestoredState};
use shortsync_store::{apply_status, SharedGateway};
use tracing::{error, info, warn};

use crate::config::{RecoveryConfig, RecoveryPolicy};
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

pub const INTERRUPTED_MESSAGE: &str = "interrupted by restart";
pub const STALE_MESSAGE: &str = "discarded at restart: stale";

/// What recovery did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    pub policy: RecoveryPolicy,
    pub snapshot_found: bool,
    /// Pending jobs put back in the queue
    pub restored_pending: usize,
    /// Interrupted jobs put back in the queue
    pub requeued: usize,
    /// Interrupted jobs marked failed
    pub failed: usize,
    /// Stale entries dropped
    pub discarded: usize,
    /// Pipeline runs without a matching job
    pub orphaned_runs: usize,
    /// Set when the snapshot could not be read and recovery fell back to an
    /// empty queue
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_error: Option<String>,
}

impl RecoveryReport {
    fn new(policy: RecoveryPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.load_error.is_none()
    }
}

pub struct RecoveryManager {
    scheduler: Arc<PriorityScheduler>,
    gateway: SharedGateway,
    config: RecoveryConfig,
}

impl RecoveryManager {
    pub fn new(scheduler: Arc<PriorityScheduler>, config: RecoveryConfig) -> Self {
        let gateway = scheduler.gateway().clone();
        Self {
            scheduler,
            gateway,
            config,
        }
    }

    /// True if the stored snapshot holds any unfinished job or run.
    pub async fn needs_recovery(&self) -> WorkerResult<bool> {
        let snapshot = self.gateway.load_snapshot().await?;
        Ok(snapshot.is_some_and(|s| s.has_unfinished_work()))
    }

    /// Reconcile the stored snapshot into the scheduler.
    ///
    /// A snapshot that cannot be read is an error only in strict mode;
    /// otherwise the scheduler starts empty and the report says why.
    pub async fn recover(&self) -> WorkerResult<RecoveryReport> {
        let mut report = RecoveryReport::new(self.config.policy);
        info!(
            policy = %self.config.policy,
            stale_after_secs = self.config.staleness_threshold.as_secs(),
            strict = self.config.strict,
            "Starting recovery"
        );

        let snapshot = match self.gateway.load_snapshot().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                info!("No snapshot found, starting with an empty queue");
                return Ok(report);
            }
            Err(e) if self.config.strict => {
                error!(error = %e, "Snapshot unreadable and strict recovery is enabled");
                return Err(WorkerError::recovery(format!("cannot load snapshot: {e}")));
            }
            Err(e) => {
                error!(error = %e, "Snapshot unreadable, starting with an empty queue");
                report.load_error = Some(e.to_string());
                return Ok(report);
            }
        };
        report.snapshot_found = true;

        let now = self.scheduler.now();
        let staleness = chrono::Duration::from_std(self.config.staleness_threshold)
            .map_err(|e| WorkerError::config_error(format!("staleness threshold: {e}")))?;
        let cutoff = now - staleness;

        let restored = self.reconcile(snapshot, now, cutoff, &mut report).await;
        self.scheduler.restore(restored).await;

        if let Err(e) = self.scheduler.checkpoint().await {
            warn!(error = %e, "Post-recovery checkpoint failed");
        }

        metrics::record_recovered("restored", report.restored_pending);
        metrics::record_recovered("requeued", report.requeued);
        metrics::record_recovered("failed", report.failed);
        metrics::record_recovered("discarded", report.discarded);

        info!(
            restored_pending = report.restored_pending,
            requeued = report.requeued,
            failed = report.failed,
            discarded = report.discarded,
            orphaned_runs = report.orphaned_runs,
            "Recovery complete"
        );
        Ok(report)
    }

    async fn reconcile(
        &self,
        snapshot: QueueSnapshot,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
        report: &mut RecoveryReport,
    ) -> RestoredState {
        let mut restored = RestoredState {
            counters: snapshot.counters,
            ..Default::default()
        };
        let mut runs: HashMap<JobId, PipelineRun> = snapshot
            .pipelines
            .into_iter()
            .map(|run| (run.run_id.clone(), run))
            .collect();

        let mut interrupted: Vec<Job> = snapshot
            .jobs
            .into_iter()
            .filter(|job| !job.is_terminal())
            .collect();
        interrupted.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut pending = snapshot.pending;
        pending.sort_by_key(|entry| entry.sequence);

        let mut requeue = Vec::new();

        for job in interrupted {
            let run = runs.remove(&job.id);
            if job.created_at < cutoff {
                self.discard(job, now, &mut restored, report).await;
                continue;
            }
            if job.status == JobStatus::Pending {
                requeue.push(job);
                report.restored_pending += 1;
                continue;
            }

            match self.config.policy {
                RecoveryPolicy::Requeue => {
                    info!(job_id = %job.id, attempts = job.attempts, "Re-enqueueing interrupted job");
                    requeue.push(job.requeued());
                    report.requeued += 1;
                }
                RecoveryPolicy::FailInterrupted => {
                    self.fail_interrupted(job, run, now, &mut restored).await;
                    report.failed += 1;
                }
            }
        }

        for entry in pending {
            runs.remove(&entry.job.id);
            if entry.job.created_at < cutoff {
                self.discard(entry.job, now, &mut restored, report).await;
                continue;
            }
            requeue.push(entry.job);
            report.restored_pending += 1;
        }

        report.orphaned_runs = runs.len();
        if !runs.is_empty() {
            warn!(count = runs.len(), "Dropping pipeline runs without a job");
        }

        restored.pending = requeue;
        restored
    }

    async fn fail_interrupted(
        &self,
        mut job: Job,
        run: Option<PipelineRun>,
        now: DateTime<Utc>,
        restored: &mut RestoredState,
    ) {
        let stage = run
            .as_ref()
            .map(|r| r.stage)
            .filter(|s| *s != PipelineStage::Idle && !s.is_terminal());

        if let Err(e) = job.fail(INTERRUPTED_MESSAGE, stage, now) {
            warn!(job_id = %job.id, error = %e, "Forcing interrupted job to failed");
            apply_status(&mut job, JobStatus::Failed, None, Some(INTERRUPTED_MESSAGE), now);
            job.failed_stage = stage;
        }
        warn!(job_id = %job.id, stage = ?stage, "Interrupted job marked failed");

        restored
            .counters
            .entry(job.job_type)
            .or_default()
            .record_terminal(JobStatus::Failed);

        if let Some(mut run) = run {
            run.stage = PipelineStage::Failed;
            run.error_message = Some(INTERRUPTED_MESSAGE.to_string());
            run.end_time = Some(now);
            restored.runs.push(run);
        }

        self.save_record(&job).await;
        restored.finished.push(job);
    }

    async fn discard(
        &self,
        mut job: Job,
        now: DateTime<Utc>,
        restored: &mut RestoredState,
        report: &mut RecoveryReport,
    ) {
        warn!(job_id = %job.id, created_at = %job.created_at, "Discarding stale job");
        apply_status(&mut job, JobStatus::Failed, None, Some(STALE_MESSAGE), now);
        restored
            .counters
            .entry(job.job_type)
            .or_default()
            .record_terminal(JobStatus::Failed);
        report.discarded += 1;
        self.save_record(&job).await;
    }

    async fn save_record(&self, job: &Job) {
        if let Err(e) = self.gateway.save_job(job).await {
            error!(job_id = %job.id, error = %e, "Failed to persist recovered job record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shortsync_models::{JobPriority, JobType, Payload, PendingEntry};
    use shortsync_queue::QueueConfig;
    use shortsync_store::InMemoryGateway;
    use std::time::Duration;

    fn job(job_type: JobType, priority: JobPriority) -> Job {
        Job::new(job_type, priority, Payload::new())
    }

    async fn manager(
        snapshot: &QueueSnapshot,
        config: RecoveryConfig,
    ) -> (RecoveryManager, Arc<PriorityScheduler>) {
        let gateway = Arc::new(InMemoryGateway::new().with_snapshot(snapshot).await.unwrap());
        let scheduler = Arc::new(PriorityScheduler::new(QueueConfig::default(), gateway));
        (RecoveryManager::new(scheduler.clone(), config), scheduler)
    }

    #[tokio::test]
    async fn test_no_snapshot_is_clean_start() {
        let gateway = Arc::new(InMemoryGateway::new());
        let scheduler = Arc::new(PriorityScheduler::new(QueueConfig::default(), gateway));
        let manager = RecoveryManager::new(scheduler.clone(), RecoveryConfig::default());

        assert!(!manager.needs_recovery().await.unwrap());
        let report = manager.recover().await.unwrap();
        assert!(!report.snapshot_found);
        assert!(report.is_clean());
        assert_eq!(scheduler.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_pending_restored_in_original_order() {
        let first = job(JobType::ScriptGeneration, JobPriority::Normal);
        let second = job(JobType::ScriptGeneration, JobPriority::Normal);
        let mut snapshot = QueueSnapshot::empty(Utc::now());
        snapshot.pending = vec![
            PendingEntry {
                sequence: 9,
                job: second.clone(),
            },
            PendingEntry {
                sequence: 3,
                job: first.clone(),
            },
        ];

        let (manager, scheduler) = manager(&snapshot, RecoveryConfig::default()).await;
        assert!(manager.needs_recovery().await.unwrap());
        let report = manager.recover().await.unwrap();
        assert_eq!(report.restored_pending, 2);

        let a = scheduler.dequeue(Duration::from_millis(10)).await.unwrap();
        assert_eq!(a.job.id, first.id);
    }

    #[tokio::test]
    async fn test_stale_entries_discarded() {
        let mut stale = job(JobType::VideoAssembly, JobPriority::High);
        stale.created_at = Utc::now() - chrono::Duration::hours(48);
        let mut snapshot = QueueSnapshot::empty(Utc::now());
        snapshot.pending = vec![PendingEntry {
            sequence: 1,
            job: stale.clone(),
        }];

        let (manager, scheduler) = manager(&snapshot, RecoveryConfig::default()).await;
        let report = manager.recover().await.unwrap();

        assert_eq!(report.discarded, 1);
        assert_eq!(scheduler.pending_count().await, 0);
        let status = scheduler.get_status(&stale.id).await.unwrap();
        assert_eq!(status.status, JobStatus::Failed);
        assert_eq!(status.error.as_deref(), Some(STALE_MESSAGE));
    }

    #[tokio::test]
    async fn test_orphaned_runs_dropped() {
        let mut snapshot = QueueSnapshot::empty(Utc::now());
        snapshot.pipelines = vec![PipelineRun::new(JobId::new())];

        let (manager, _scheduler) = manager(&snapshot, RecoveryConfig::default()).await;
        let report = manager.recover().await.unwrap();
        assert_eq!(report.orphaned_runs, 1);
    }

    #[tokio::test]
    async fn test_unreadable_snapshot_falls_back_unless_strict() {
        let gateway = Arc::new(InMemoryGateway::new());
        gateway.set_fail_reads(true);
        let scheduler = Arc::new(PriorityScheduler::new(
            QueueConfig::default(),
            gateway.clone(),
        ));

        let lenient = RecoveryManager::new(scheduler.clone(), RecoveryConfig::default());
        let report = lenient.recover().await.unwrap();
        assert!(report.load_error.is_some());

        let strict = RecoveryManager::new(
            scheduler,
            RecoveryConfig {
                strict: true,
                ..Default::default()
            },
        );
        assert!(matches!(
            strict.recover().await,
            Err(WorkerError::Recovery(_))
        ));
    }
}
