//! Job executor.
//!
//! Drives one claimed job through the stage plan of its type. Stage
//! failures, panics and timeouts end that job as `failed`; they never
//! escape as errors. Cancellation is checked before each stage.

use std::sync::Arc;
use std::time::Instant;

use shortsync_models::{Job, JobResult, Payload, PipelineStage};
use shortsync_queue::{CancelSignal, ClaimedJob, PriorityScheduler};
use tracing::Instrument;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::registry::StageRegistry;
use crate::stage::{StageContext, StageOutcome};

enum Outcome {
    Completed(Payload),
    Failed {
        stage: Option<PipelineStage>,
        message: String,
    },
    Cancelled,
}

/// Executes claimed jobs and reports them back to the scheduler.
#[derive(Clone)]
pub struct JobExecutor {
    scheduler: Arc<PriorityScheduler>,
    registry: Arc<StageRegistry>,
    config: Arc<WorkerConfig>,
}

impl JobExecutor {
    pub fn new(
        scheduler: Arc<PriorityScheduler>,
        registry: Arc<StageRegistry>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            scheduler,
            registry,
            config: Arc::new(config),
        }
    }

    /// Run a claimed job to a terminal status.
    ///
    /// The job is always handed back through `finish`, which releases its
    /// rate-limiter slot. An `Err` means the bookkeeping itself failed.
    pub async fn run(&self, claimed: ClaimedJob) -> WorkerResult<JobResult> {
        let ClaimedJob { job, cancel } = claimed;
        let logger = JobLogger::new(&job.id, job.job_type);
        let span = logger.create_span();
        self.run_claimed(job, cancel, logger).instrument(span).await
    }

    async fn run_claimed(
        &self,
        mut job: Job,
        cancel: CancelSignal,
        logger: JobLogger,
    ) -> WorkerResult<JobResult> {
        self.scheduler.record_started(&job).await;

        let outcome = self.execute(&job, &cancel, &logger).await;
        let now = self.scheduler.now();
        let transition = match outcome {
            Outcome::Completed(data) => job.complete(data, now),
            Outcome::Failed { stage, message } => job.fail(message, stage, now),
            Outcome::Cancelled => job.cancel(now),
        };

        if let Err(e) = transition {
            logger.log_error(&format!("invalid terminal transition: {e}"));
            self.scheduler.abandon(&job.id, &e.to_string()).await?;
            return Err(e.into());
        }

        logger.log_completion(job.status.as_str(), job.execution_time_secs());
        Ok(self.scheduler.finish(job).await?)
    }

    async fn execute(&self, job: &Job, cancel: &CancelSignal, logger: &JobLogger) -> Outcome {
        let Some(plan) = self.registry.plan(job.job_type) else {
            let message = format!("no stages registered for job type {}", job.job_type);
            logger.log_error(&message);
            self.scheduler.set_stage_error(&job.id, &message).await;
            return Outcome::Failed {
                stage: None,
                message,
            };
        };

        let total = plan.len() as f64;
        let mut data = Payload::new();
        logger.log_start(job.attempts, plan.len());

        for (index, (stage, handler)) in plan.iter().enumerate() {
            let stage = *stage;

            if cancel.is_cancelled() {
                logger.log_warning(&format!("cancelled before {stage}"));
                self.scheduler.set_stage_error(&job.id, "cancelled").await;
                return Outcome::Cancelled;
            }

            if !self
                .scheduler
                .advance_stage(&job.id, stage, index as f64 / total, None)
                .await
            {
                let err = WorkerError::stage_failure(stage, "stage transition rejected");
                logger.log_error(&err.to_string());
                self.scheduler.set_stage_error(&job.id, &err.to_string()).await;
                return Outcome::Failed {
                    stage: Some(stage),
                    message: err.to_string(),
                };
            }

            let ctx = StageContext {
                job_id: job.id.clone(),
                job_type: job.job_type,
                stage,
                payload: job.payload.clone(),
                data: data.clone(),
                attempt: job.attempts,
            };

            let started = Instant::now();
            let outcome = handler
                .run_guarded(ctx, self.config.stage_timeout(stage))
                .await;
            let elapsed = started.elapsed();
            metrics::record_stage(stage, outcome.label(), elapsed);

            match outcome {
                StageOutcome::Success(stage_data) => {
                    let progress = (index + 1) as f64 / total;
                    data.extend(stage_data.clone());
                    self.scheduler
                        .advance_stage(&job.id, stage, progress, Some(stage_data))
                        .await;
                    logger.log_stage(stage, elapsed, progress);
                }
                failed => {
                    let cause = failed.cause().unwrap_or_default();
                    let err = WorkerError::stage_failure(stage, cause);
                    logger.log_error(&err.to_string());
                    self.scheduler.set_stage_error(&job.id, &err.to_string()).await;
                    return Outcome::Failed {
                        stage: err.failed_stage(),
                        message: err.to_string(),
                    };
                }
            }
        }

        self.scheduler
            .advance_stage(&job.id, PipelineStage::Completed, 1.0, None)
            .await;
        Outcome::Completed(data)
    }
}
