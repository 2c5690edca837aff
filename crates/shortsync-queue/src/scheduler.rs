//! Priority scheduler.
//!
//! One mutex guards the ready heap, the job and pipeline tables, the rate
//! limiter, the counters and the per-job result channels. Persistence runs
//! after the lock is released; failures are logged and counted, never
//! returned to the caller.
//!
//! Ordering: higher priority first, FIFO within a priority. There is no
//! aging, so a steady stream of high-priority work can starve lower
//! priorities indefinitely.

use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::cmp::Ordering;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shortsync_models::{
    Job, JobCounters, JobId, JobPriority, JobResult, JobStatus, JobType, Payload, PendingEntry,
    PipelineRun, PipelineStage, QueueSnapshot,
};
use shortsync_store::{SharedGateway, StoreResult};
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::clock::{SharedClock, SystemClock};
use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::metrics;
use crate::pipeline::PipelineStateMachine;
use crate::rate_limit::RateLimiter;

// =============================================================================
// Public handles
// =============================================================================

/// Cooperative cancellation flag handed to the executor with a job.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&mut self) {
        // A closed channel means the scheduler dropped the job; treat as cancelled.
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// A job released to an executor, which now owns it until `finish`.
#[derive(Debug)]
pub struct ClaimedJob {
    pub job: Job,
    pub cancel: CancelSignal,
}

/// Awaitable terminal result of one job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    job_id: JobId,
    rx: watch::Receiver<Option<JobResult>>,
}

impl JobHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// The result, if the job already finished.
    pub fn try_result(&self) -> Option<JobResult> {
        self.rx.borrow().clone()
    }

    /// Wait for the job to reach a terminal status.
    pub async fn wait(mut self) -> QueueResult<JobResult> {
        let closed = || QueueError::ResultChannelClosed(self.job_id.to_string());
        let result = {
            let current = self.rx.wait_for(Option::is_some).await.map_err(|_| closed())?;
            (*current).clone()
        };
        result.ok_or_else(closed)
    }
}

/// Per-type statistics.
#[derive(Debug, Clone, Serialize)]
pub struct TypeStats {
    #[serde(flatten)]
    pub counters: JobCounters,
    pub in_flight: u32,
    pub calls_in_window: usize,
    pub max_concurrent: u32,
    pub per_hour: u32,
    pub success_rate: f64,
}

/// Queue-wide statistics.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Jobs waiting in the ready queue
    pub queue_size: usize,
    /// Jobs owned by an executor
    pub active: usize,
    /// Jobs currently held in memory, including finished ones
    pub tracked_jobs: usize,
    /// Persistence failures since start
    pub persistence_errors: u64,
    pub per_type: BTreeMap<JobType, TypeStats>,
}

/// State handed back by recovery.
#[derive(Debug, Default)]
pub struct RestoredState {
    pub counters: BTreeMap<JobType, JobCounters>,
    /// Jobs to re-enqueue, in their original dequeue order
    pub pending: Vec<Job>,
    /// Terminal jobs to keep visible to status queries
    pub finished: Vec<Job>,
    /// Pipeline runs to keep visible
    pub runs: Vec<PipelineRun>,
}

// =============================================================================
// Internal state
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueEntry {
    priority: JobPriority,
    sequence: u64,
    job_id: JobId,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

enum Claim {
    Claimed(ClaimedJob),
    Saturated,
    Empty,
}

enum CancelOutcome {
    Dequeued(Job),
    Signalled(watch::Receiver<Option<JobResult>>),
    Unknown,
}

struct SchedulerState {
    ready: BinaryHeap<QueueEntry>,
    next_sequence: u64,
    jobs: HashMap<JobId, Job>,
    running: HashMap<JobId, watch::Sender<bool>>,
    counters: BTreeMap<JobType, JobCounters>,
    limiter: RateLimiter,
    runs: PipelineStateMachine,
    results: HashMap<JobId, watch::Sender<Option<JobResult>>>,
}

impl SchedulerState {
    fn new(config: &QueueConfig) -> Self {
        Self {
            ready: BinaryHeap::new(),
            next_sequence: 0,
            jobs: HashMap::new(),
            running: HashMap::new(),
            counters: BTreeMap::new(),
            limiter: RateLimiter::new(config),
            runs: PipelineStateMachine::new(),
            results: HashMap::new(),
        }
    }

    fn push_pending(&mut self, job: Job) {
        self.push_ready(job.id.clone(), job.priority);
        self.jobs.insert(job.id.clone(), job);
    }

    fn push_ready(&mut self, job_id: JobId, priority: JobPriority) {
        self.next_sequence += 1;
        self.ready.push(QueueEntry {
            priority,
            sequence: self.next_sequence,
            job_id,
        });
    }

    fn try_claim(&mut self, now: DateTime<Utc>) -> Claim {
        while let Some(entry) = self.ready.pop() {
            let Some(job) = self.jobs.get_mut(&entry.job_id) else {
                continue;
            };
            if job.status != JobStatus::Pending {
                continue;
            }

            let job_type = job.job_type;
            if !self.limiter.check(job_type, now) {
                debug!(job_id = %entry.job_id, job_type = %job_type, "Rate limit saturated, job stays pending");
                metrics::record_rate_limited(job_type);
                self.ready.push(entry);
                return Claim::Saturated;
            }

            if let Err(e) = job.start(now) {
                warn!(job_id = %entry.job_id, error = %e, "Skipping unstartable job");
                continue;
            }
            let job = job.clone();

            self.limiter.record(job_type, now);
            let (cancel_tx, cancel_rx) = watch::channel(false);
            self.running.insert(job.id.clone(), cancel_tx);
            self.runs.register(&job.id);
            self.update_gauges();

            return Claim::Claimed(ClaimedJob {
                job,
                cancel: CancelSignal { rx: cancel_rx },
            });
        }
        Claim::Empty
    }

    fn result_sender(&mut self, id: &JobId) -> &watch::Sender<Option<JobResult>> {
        let current = self
            .jobs
            .get(id)
            .filter(|job| job.is_terminal())
            .map(JobResult::from);
        self.results
            .entry(id.clone())
            .or_insert_with(|| watch::channel(current).0)
    }

    /// Record a terminal job: counters, limiter slot, table entry, waiters.
    fn settle(&mut self, job: Job, release_slot: bool) -> JobResult {
        if release_slot {
            self.limiter.release(job.job_type);
        }
        self.counters
            .entry(job.job_type)
            .or_default()
            .record_terminal(job.status);

        let result = JobResult::from(&job);
        if let Some(tx) = self.results.get(&job.id) {
            tx.send_replace(Some(result.clone()));
        }
        self.jobs.insert(job.id.clone(), job);
        self.update_gauges();
        result
    }

    fn snapshot(&self, now: DateTime<Utc>) -> QueueSnapshot {
        let mut snapshot = QueueSnapshot::empty(now);
        snapshot.pending = self
            .ready
            .iter()
            .filter_map(|entry| {
                self.jobs.get(&entry.job_id).map(|job| PendingEntry {
                    sequence: entry.sequence,
                    job: job.clone(),
                })
            })
            .collect();
        snapshot.counters = self.counters.clone();
        snapshot.jobs = self
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Processing)
            .cloned()
            .collect();
        snapshot.pipelines = self.runs.non_terminal().cloned().collect();
        snapshot.normalized()
    }

    fn update_gauges(&self) {
        metrics::set_queue_gauges(self.ready.len(), self.running.len());
    }
}

// =============================================================================
// Scheduler
// =============================================================================

pub struct PriorityScheduler {
    config: QueueConfig,
    state: Mutex<SchedulerState>,
    ready_signal: Notify,
    gateway: SharedGateway,
    clock: SharedClock,
    checkpoint_lock: Mutex<()>,
    persistence_errors: AtomicU64,
}

impl PriorityScheduler {
    pub fn new(config: QueueConfig, gateway: SharedGateway) -> Self {
        Self::with_clock(config, gateway, Arc::new(SystemClock))
    }

    pub fn with_clock(config: QueueConfig, gateway: SharedGateway, clock: SharedClock) -> Self {
        Self {
            state: Mutex::new(SchedulerState::new(&config)),
            config,
            ready_signal: Notify::new(),
            gateway,
            clock,
            checkpoint_lock: Mutex::new(()),
            persistence_errors: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn gateway(&self) -> &SharedGateway {
        &self.gateway
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Persistence failures since start.
    pub fn persistence_errors(&self) -> u64 {
        self.persistence_errors.load(AtomicOrdering::Relaxed)
    }

    // -------------------------------------------------------------------------
    // Submission
    // -------------------------------------------------------------------------

    /// Build and enqueue a new job.
    pub async fn create_job(
        &self,
        job_type: JobType,
        priority: JobPriority,
        payload: Payload,
    ) -> QueueResult<JobId> {
        let mut job = Job::new(job_type, priority, payload);
        job.created_at = self.clock.now();
        self.enqueue(job).await
    }

    /// Validate and enqueue a pending job.
    ///
    /// The id is reserved first, then the record is saved, and only then is
    /// the job made claimable, so the gateway never sees a status update for
    /// a job it has not stored.
    pub async fn enqueue(&self, job: Job) -> QueueResult<JobId> {
        if !job.id.is_valid() {
            return Err(QueueError::validation(format!("invalid job id: {:?}", job.id.as_str())));
        }
        if !self.config.accepts(job.job_type) {
            return Err(QueueError::validation(format!(
                "job type not accepted: {}",
                job.job_type
            )));
        }
        if job.status != JobStatus::Pending {
            return Err(QueueError::validation(format!(
                "job must be submitted as pending, got {}",
                job.status
            )));
        }

        {
            let mut state = self.state.lock().await;
            if state.jobs.contains_key(&job.id) {
                return Err(QueueError::DuplicateJob(job.id.to_string()));
            }
            state.counters.entry(job.job_type).or_default().total += 1;
            state.jobs.insert(job.id.clone(), job.clone());
        }

        self.persist("save_job", self.gateway.save_job(&job)).await;

        let queued = {
            let mut state = self.state.lock().await;
            // a cancel may have settled the job while it was being saved
            let still_pending = state
                .jobs
                .get(&job.id)
                .is_some_and(|j| j.status == JobStatus::Pending);
            if still_pending {
                state.push_ready(job.id.clone(), job.priority);
                state.update_gauges();
            }
            still_pending
        };
        if queued {
            self.ready_signal.notify_one();
        }

        metrics::record_enqueued(job.job_type);
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            priority = %job.priority,
            "Job enqueued"
        );

        self.checkpoint_logged().await;
        Ok(job.id)
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Release the highest-priority pending job.
    ///
    /// Waits up to `timeout` for work. If the head job's type is saturated
    /// it stays queued and `None` is returned at once; the caller retries on
    /// its next pass.
    ///
    /// # Cancel safety
    ///
    /// Cancel safe: a job is claimed and returned within a single poll, so
    /// dropping the future never loses a claimed job. Persisting the
    /// `processing` status is left to [`PriorityScheduler::record_started`].
    pub async fn dequeue(&self, timeout: Duration) -> Option<ClaimedJob> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.ready_signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let claim = {
                let mut state = self.state.lock().await;
                state.try_claim(self.clock.now())
            };

            match claim {
                Claim::Claimed(claimed) => {
                    debug!(job_id = %claimed.job.id, attempt = claimed.job.attempts, "Job released to executor");
                    return Some(claimed);
                }
                Claim::Saturated => return None,
                Claim::Empty => {}
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Persist the `processing` status of a freshly claimed job.
    pub async fn record_started(&self, job: &Job) {
        self.persist(
            "update_job_status",
            self.gateway
                .update_job_status(&job.id, JobStatus::Processing, None, None),
        )
        .await;
    }

    /// Hand back a job that reached a terminal status.
    pub async fn finish(&self, job: Job) -> QueueResult<JobResult> {
        if !job.is_terminal() {
            return Err(QueueError::validation(format!(
                "job {} finished with non-terminal status {}",
                job.id, job.status
            )));
        }

        let result = {
            let mut state = self.state.lock().await;
            if state.running.remove(&job.id).is_none() {
                return Err(QueueError::NotRunning {
                    id: job.id.to_string(),
                });
            }
            state.settle(job.clone(), true)
        };

        metrics::record_finished(job.job_type, job.status);
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            status = %job.status,
            "Job finished"
        );

        self.persist("save_job", self.gateway.save_job(&job)).await;
        self.checkpoint_logged().await;
        Ok(result)
    }

    /// Fail a running job whose executor went away without reporting.
    pub async fn abandon(&self, id: &JobId, reason: &str) -> QueueResult<JobResult> {
        let now = self.clock.now();
        let (job, result) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            if !state.running.contains_key(id) {
                return Err(QueueError::NotRunning { id: id.to_string() });
            }
            let mut job = state
                .jobs
                .get(id)
                .cloned()
                .ok_or_else(|| QueueError::job_not_found(id.as_str()))?;

            let failed_stage = state
                .runs
                .get(id)
                .map(|run| run.stage)
                .filter(|stage| !matches!(stage, PipelineStage::Idle) && !stage.is_terminal());
            job.fail(reason, failed_stage, now)?;
            state.runs.set_error(id, reason, now);
            state.running.remove(id);
            let result = state.settle(job.clone(), true);
            (job, result)
        };

        metrics::record_finished(job.job_type, job.status);
        warn!(job_id = %id, reason = %reason, "Job abandoned");

        self.persist("save_job", self.gateway.save_job(&job)).await;
        self.checkpoint_logged().await;
        Ok(result)
    }

    /// Cancel a job.
    ///
    /// A pending job is removed from the queue at once. A running job is
    /// signalled and given `cancel_ack_timeout` to stop at its next stage
    /// boundary. Returns false for unknown or already finished jobs.
    pub async fn cancel(&self, id: &JobId) -> bool {
        let now = self.clock.now();
        let outcome = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            match state.jobs.get(id).map(|job| job.status) {
                Some(JobStatus::Pending) => {
                    state.ready.retain(|entry| &entry.job_id != id);
                    match state.jobs.get(id).cloned() {
                        Some(mut job) => match job.cancel(now) {
                            Ok(()) => {
                                state.settle(job.clone(), false);
                                CancelOutcome::Dequeued(job)
                            }
                            Err(_) => CancelOutcome::Unknown,
                        },
                        None => CancelOutcome::Unknown,
                    }
                }
                Some(JobStatus::Processing) => {
                    if let Some(tx) = state.running.get(id) {
                        tx.send_replace(true);
                    }
                    CancelOutcome::Signalled(state.result_sender(id).subscribe())
                }
                _ => CancelOutcome::Unknown,
            }
        };

        match outcome {
            CancelOutcome::Dequeued(job) => {
                metrics::record_finished(job.job_type, job.status);
                info!(job_id = %id, "Pending job cancelled");
                self.persist("save_job", self.gateway.save_job(&job)).await;
                self.checkpoint_logged().await;
                true
            }
            CancelOutcome::Signalled(mut rx) => {
                info!(job_id = %id, "Cancellation requested for running job");
                let acked =
                    tokio::time::timeout(self.config.cancel_ack_timeout, rx.wait_for(Option::is_some))
                        .await;
                if !matches!(acked, Ok(Ok(_))) {
                    warn!(
                        job_id = %id,
                        timeout_secs = self.config.cancel_ack_timeout.as_secs(),
                        "Running job did not acknowledge cancellation in time"
                    );
                }
                true
            }
            CancelOutcome::Unknown => false,
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Current status, falling back to the persisted record.
    pub async fn get_status(&self, id: &JobId) -> Option<JobResult> {
        {
            let state = self.state.lock().await;
            if let Some(job) = state.jobs.get(id) {
                return Some(JobResult::from(job));
            }
        }

        match self.gateway.get_job(id).await {
            Ok(job) => job.as_ref().map(JobResult::from),
            Err(e) => {
                self.note_persistence_error("get_job", &e);
                None
            }
        }
    }

    /// Result channel for a job held in memory.
    pub async fn subscribe(&self, id: &JobId) -> Option<JobHandle> {
        let mut state = self.state.lock().await;
        if !state.jobs.contains_key(id) {
            return None;
        }
        let rx = state.result_sender(id).subscribe();
        Some(JobHandle {
            job_id: id.clone(),
            rx,
        })
    }

    pub async fn queue_stats(&self) -> QueueStats {
        let now = self.clock.now();
        let state = self.state.lock().await;

        let per_type = self
            .config
            .limits
            .iter()
            .map(|(job_type, limit)| {
                let counters = state.counters.get(job_type).copied().unwrap_or_default();
                let stats = TypeStats {
                    counters,
                    in_flight: state.limiter.in_flight(*job_type),
                    calls_in_window: state.limiter.calls_in_window(*job_type, now),
                    max_concurrent: limit.max_concurrent,
                    per_hour: limit.per_hour,
                    success_rate: counters.success_rate(),
                };
                (*job_type, stats)
            })
            .collect();

        QueueStats {
            queue_size: state.ready.len(),
            active: state.running.len(),
            tracked_jobs: state.jobs.len(),
            persistence_errors: self.persistence_errors(),
            per_type,
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    pub async fn active_count(&self) -> usize {
        self.state.lock().await.running.len()
    }

    // -------------------------------------------------------------------------
    // Pipeline runs
    // -------------------------------------------------------------------------

    /// Advance a run and checkpoint. Returns false if the move was rejected.
    pub async fn advance_stage(
        &self,
        run_id: &JobId,
        stage: PipelineStage,
        progress: f64,
        metadata: Option<Payload>,
    ) -> bool {
        let advanced = {
            let mut state = self.state.lock().await;
            state
                .runs
                .advance(run_id, stage, progress, metadata, self.clock.now())
        };
        if advanced {
            self.checkpoint_logged().await;
        }
        advanced
    }

    /// Force a run to `failed`.
    pub async fn set_stage_error(&self, run_id: &JobId, message: &str) -> bool {
        let mut state = self.state.lock().await;
        state.runs.set_error(run_id, message, self.clock.now())
    }

    pub async fn get_run(&self, run_id: &JobId) -> Option<PipelineRun> {
        self.state.lock().await.runs.get(run_id).cloned()
    }

    // -------------------------------------------------------------------------
    // Snapshots and maintenance
    // -------------------------------------------------------------------------

    /// Project the current state into a snapshot.
    pub async fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock().await;
        state.snapshot(self.clock.now())
    }

    /// Snapshot and save. Saves are serialized so a later state never gets
    /// overwritten by an earlier one.
    pub async fn checkpoint(&self) -> QueueResult<()> {
        let _ordered = self.checkpoint_lock.lock().await;
        let snapshot = self.snapshot().await;
        self.gateway.save_snapshot(&snapshot).await?;
        Ok(())
    }

    async fn checkpoint_logged(&self) {
        if let Err(QueueError::Store(e)) = self.checkpoint().await {
            self.note_persistence_error("save_snapshot", &e);
        }
    }

    /// Drop finished jobs older than the retention period.
    pub async fn prune_finished(&self, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(self.config.result_retention)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let cutoff = now - retention;

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let expired: Vec<JobId> = state
            .jobs
            .values()
            .filter(|job| job.is_terminal() && job.completed_at.is_some_and(|t| t <= cutoff))
            .map(|job| job.id.clone())
            .collect();

        for id in &expired {
            state.jobs.remove(id);
            state.runs.remove(id);
            state.results.remove(id);
        }
        if !expired.is_empty() {
            debug!(pruned = expired.len(), "Pruned finished jobs");
        }
        expired.len()
    }

    /// Install state reconstructed by recovery. Rate windows start empty.
    pub async fn restore(&self, restored: RestoredState) -> usize {
        let requeued = restored.pending.len();
        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            state.counters = restored.counters;
            for job in restored.finished {
                state.jobs.insert(job.id.clone(), job);
            }
            for run in restored.runs {
                state.runs.insert(run);
            }
            for job in restored.pending {
                state.push_pending(job);
            }
            state.update_gauges();
        }
        for _ in 0..requeued {
            self.ready_signal.notify_one();
        }
        requeued
    }

    // -------------------------------------------------------------------------
    // Persistence helpers
    // -------------------------------------------------------------------------

    async fn persist(&self, operation: &'static str, fut: impl Future<Output = StoreResult<()>>) {
        if let Err(e) = fut.await {
            self.note_persistence_error(operation, &e);
        }
    }

    fn note_persistence_error(&self, operation: &'static str, err: &dyn std::error::Error) {
        self.persistence_errors.fetch_add(1, AtomicOrdering::Relaxed);
        metrics::record_persistence_error(operation);
        error!(operation = operation, error = %err, "Persistence failed, continuing from memory");
    }
}
