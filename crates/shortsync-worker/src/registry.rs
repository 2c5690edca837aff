//! Static dispatch table from job type to its ordered stage handlers.
//!
//! Plans are resolved once at startup. A job type without a complete plan
//! fails the build instead of failing its first job.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use shortsync_models::{JobType, PipelineStage};
use tracing::info;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::{WorkerError, WorkerResult};
use crate::stage::{PassthroughStage, SharedStage};

/// Resolved stage plans, one per accepted job type.
pub struct StageRegistry {
    plans: BTreeMap<JobType, Vec<(PipelineStage, SharedStage)>>,
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let plans: BTreeMap<_, Vec<_>> = self
            .plans
            .iter()
            .map(|(t, plan)| (*t, plan.iter().map(|(s, _)| *s).collect()))
            .collect();
        f.debug_struct("StageRegistry").field("plans", &plans).finish()
    }
}

impl StageRegistry {
    pub fn builder() -> StageRegistryBuilder {
        StageRegistryBuilder::default()
    }

    /// Dry-run registry: every stage records a completion marker.
    pub fn passthrough(accepted: &[JobType]) -> WorkerResult<Self> {
        Self::passthrough_builder().build(accepted)
    }

    /// Builder with the passthrough handler registered for every stage.
    pub fn passthrough_builder() -> StageRegistryBuilder {
        let handler: SharedStage = Arc::new(PassthroughStage);
        PipelineStage::ALL
            .iter()
            .filter(|stage| **stage != PipelineStage::Idle && !stage.is_terminal())
            .fold(Self::builder(), |builder, stage| {
                builder.stage(*stage, handler.clone())
            })
    }

    /// Ordered handlers for a job type.
    pub fn plan(&self, job_type: JobType) -> Option<&[(PipelineStage, SharedStage)]> {
        self.plans.get(&job_type).map(Vec::as_slice)
    }

    pub fn stages(&self, job_type: JobType) -> Vec<PipelineStage> {
        self.plan(job_type)
            .map(|plan| plan.iter().map(|(stage, _)| *stage).collect())
            .unwrap_or_default()
    }

    pub fn job_types(&self) -> impl Iterator<Item = JobType> + '_ {
        self.plans.keys().copied()
    }
}

#[derive(Default)]
pub struct StageRegistryBuilder {
    handlers: HashMap<PipelineStage, SharedStage>,
    plans: HashMap<JobType, Vec<PipelineStage>>,
    breaker: Option<CircuitBreakerConfig>,
}

impl StageRegistryBuilder {
    /// Register the handler for a stage.
    pub fn stage(mut self, stage: PipelineStage, handler: SharedStage) -> Self {
        self.handlers.insert(stage, handler);
        self
    }

    /// Override the stage list of a job type. Defaults to
    /// [`JobType::default_stages`].
    pub fn plan(mut self, job_type: JobType, stages: &[PipelineStage]) -> Self {
        self.plans.insert(job_type, stages.to_vec());
        self
    }

    /// Put every stage behind its own circuit breaker. Job types sharing a
    /// stage share its breaker.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = Some(config);
        self
    }

    /// Resolve a plan for every accepted type.
    pub fn build(mut self, accepted: &[JobType]) -> WorkerResult<StageRegistry> {
        if let Some(config) = self.breaker.take() {
            for (stage, handler) in self.handlers.iter_mut() {
                *handler = Arc::new(CircuitBreaker::new(
                    stage.as_str(),
                    handler.clone(),
                    config.clone(),
                ));
            }
        }

        let mut plans = BTreeMap::new();

        for &job_type in accepted {
            let stages = self
                .plans
                .get(&job_type)
                .cloned()
                .unwrap_or_else(|| job_type.default_stages().to_vec());
            validate_order(job_type, &stages)?;

            let resolved = stages
                .iter()
                .map(|stage| {
                    self.handlers
                        .get(stage)
                        .cloned()
                        .map(|handler| (*stage, handler))
                        .ok_or(WorkerError::MissingStage {
                            job_type,
                            stage: *stage,
                        })
                })
                .collect::<WorkerResult<Vec<_>>>()?;

            plans.insert(job_type, resolved);
        }

        info!(job_types = plans.len(), "Stage registry built");
        Ok(StageRegistry { plans })
    }
}

fn validate_order(job_type: JobType, stages: &[PipelineStage]) -> WorkerResult<()> {
    if stages.is_empty() {
        return Err(WorkerError::config_error(format!(
            "empty stage plan for {job_type}"
        )));
    }
    if let Some(stage) = stages
        .iter()
        .find(|s| **s == PipelineStage::Idle || s.is_terminal())
    {
        return Err(WorkerError::config_error(format!(
            "stage {stage} cannot be part of the plan for {job_type}"
        )));
    }
    if stages.windows(2).any(|pair| pair[1].index() <= pair[0].index()) {
        return Err(WorkerError::config_error(format!(
            "stage plan for {job_type} must move strictly forward"
        )));
    }
    Ok(())
}
