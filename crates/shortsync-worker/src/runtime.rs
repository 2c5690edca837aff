//! Orchestrator loop.
//!
//! One loop dequeues jobs and spawns an executor task per job. Concurrency
//! is bounded only by the per-type rate limits. The same loop joins
//! finished tasks, saves a snapshot every `snapshot_interval` and prunes
//! expired results every `maintenance_interval`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use shortsync_models::{JobId, JobResult};
use shortsync_queue::{PriorityScheduler, QueueError};
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::executor::JobExecutor;
use crate::registry::StageRegistry;

type TaskOutput = (JobId, std::thread::Result<WorkerResult<JobResult>>);

pub struct Orchestrator {
    scheduler: Arc<PriorityScheduler>,
    executor: JobExecutor,
    config: WorkerConfig,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        scheduler: Arc<PriorityScheduler>,
        registry: Arc<StageRegistry>,
        config: WorkerConfig,
    ) -> Self {
        let executor = JobExecutor::new(scheduler.clone(), registry, config.clone());
        let (shutdown, _) = watch::channel(false);
        Self {
            scheduler,
            executor,
            config,
            shutdown,
            handle: Mutex::new(None),
        }
    }

    pub fn scheduler(&self) -> &Arc<PriorityScheduler> {
        &self.scheduler
    }

    /// Spawn the scheduler loop.
    pub async fn start(&self) -> WorkerResult<()> {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return Err(WorkerError::config_error("orchestrator already started"));
        }

        let worker = LoopWorker {
            scheduler: self.scheduler.clone(),
            executor: self.executor.clone(),
            config: self.config.clone(),
        };
        let shutdown_rx = self.shutdown.subscribe();
        *handle = Some(tokio::spawn(worker.run(shutdown_rx)));

        info!(
            snapshot_interval_secs = self.config.snapshot_interval.as_secs(),
            shutdown_timeout_secs = self.config.shutdown_timeout.as_secs(),
            "Orchestrator started"
        );
        Ok(())
    }

    /// Stop dequeuing, drain in-flight jobs up to `shutdown_timeout`, and
    /// save a final snapshot.
    pub async fn shutdown(&self) -> WorkerResult<()> {
        self.shutdown.send_replace(true);
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Orchestrator loop terminated abnormally");
            }
        }
        Ok(())
    }
}

struct LoopWorker {
    scheduler: Arc<PriorityScheduler>,
    executor: JobExecutor,
    config: WorkerConfig,
}

impl LoopWorker {
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut tasks: JoinSet<TaskOutput> = JoinSet::new();
        let mut snapshot_tick = ticker(self.config.snapshot_interval);
        let mut maintenance_tick = ticker(self.config.maintenance_interval);

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping orchestrator");
                        break;
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    self.reap(joined).await;
                }
                _ = snapshot_tick.tick() => {
                    if let Err(e) = self.scheduler.checkpoint().await {
                        warn!(error = %e, "Periodic snapshot failed");
                    }
                }
                _ = maintenance_tick.tick() => {
                    self.scheduler.prune_finished(self.scheduler.now()).await;
                }
                claimed = self.scheduler.dequeue(self.config.dequeue_timeout) => {
                    match claimed {
                        Some(claimed) => {
                            let executor = self.executor.clone();
                            let job_id = claimed.job.id.clone();
                            tasks.spawn(async move {
                                let result = AssertUnwindSafe(executor.run(claimed))
                                    .catch_unwind()
                                    .await;
                                (job_id, result)
                            });
                        }
                        None => tokio::time::sleep(self.config.poll_interval).await,
                    }
                }
            }
        }

        self.drain(&mut tasks).await;

        if let Err(e) = self.scheduler.checkpoint().await {
            error!(error = %e, "Final snapshot failed");
        } else {
            info!("Final snapshot saved");
        }
        info!("Orchestrator stopped");
    }

    async fn drain(&self, tasks: &mut JoinSet<TaskOutput>) {
        if tasks.is_empty() {
            return;
        }
        info!(in_flight = tasks.len(), "Waiting for in-flight jobs to complete");

        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            while let Some(joined) = tasks.join_next().await {
                self.reap(joined).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = tasks.len(),
                "Shutdown timeout reached, aborting in-flight jobs"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }

    /// Handle a finished executor task. A job whose task failed or panicked
    /// before reporting is abandoned so its rate-limit slot is released.
    async fn reap(&self, joined: Result<TaskOutput, JoinError>) {
        let (job_id, outcome) = match joined {
            Ok(output) => output,
            Err(e) => {
                if !e.is_cancelled() {
                    error!(error = %e, "Executor task failed to join");
                }
                return;
            }
        };

        let reason = match outcome {
            Ok(Ok(result)) => {
                debug!(job_id = %job_id, status = %result.status, "Executor task finished");
                return;
            }
            Ok(Err(e)) => {
                error!(job_id = %job_id, error = %e, "Executor bookkeeping failed");
                format!("executor error: {e}")
            }
            Err(_) => {
                error!(job_id = %job_id, "Executor task panicked");
                "executor panicked".to_string()
            }
        };

        match self.scheduler.abandon(&job_id, &reason).await {
            Ok(_) | Err(QueueError::NotRunning { .. }) => {}
            Err(e) => error!(job_id = %job_id, error = %e, "Failed to abandon job"),
        }
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}
