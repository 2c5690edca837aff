//! Worker configuration.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use shortsync_models::PipelineStage;
use tracing::warn;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::WorkerError;

/// What recovery does with work that was in flight when the process died.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Mark interrupted jobs failed
    FailInterrupted,
    /// Put interrupted jobs back in the queue at their original priority
    #[default]
    Requeue,
}

impl fmt::Display for RecoveryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryPolicy::FailInterrupted => f.write_str("fail_interrupted"),
            RecoveryPolicy::Requeue => f.write_str("requeue"),
        }
    }
}

impl FromStr for RecoveryPolicy {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fail" | "fail_interrupted" => Ok(RecoveryPolicy::FailInterrupted),
            "requeue" | "resume" => Ok(RecoveryPolicy::Requeue),
            other => Err(WorkerError::config_error(format!(
                "unknown recovery policy: {other}"
            ))),
        }
    }
}

/// Recovery configuration.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub policy: RecoveryPolicy,
    /// Entries created longer ago than this are discarded at recovery
    pub staleness_threshold: Duration,
    /// Refuse to boot when the snapshot cannot be read
    pub strict: bool,
    /// False when `policy` fell back to the default
    pub policy_explicit: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            policy: RecoveryPolicy::default(),
            staleness_threshold: Duration::from_secs(24 * 3600),
            strict: false,
            policy_explicit: false,
        }
    }
}

impl RecoveryConfig {
    pub fn from_env() -> Result<Self, WorkerError> {
        Self::from_lookup(&env_lookup)
    }

    fn from_lookup(get: &dyn Fn(&str) -> Option<String>) -> Result<Self, WorkerError> {
        let defaults = Self::default();
        let (policy, policy_explicit) = match get("RECOVERY_POLICY") {
            Some(value) => (value.parse()?, true),
            None => {
                warn!(
                    default = %defaults.policy,
                    "RECOVERY_POLICY not set, interrupted jobs will be handled with the default policy"
                );
                (defaults.policy, false)
            }
        };

        Ok(Self {
            policy,
            staleness_threshold: parse_secs(get, "RECOVERY_STALE_AFTER_SECS")?
                .unwrap_or(defaults.staleness_threshold),
            strict: get("RECOVERY_STRICT")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.strict),
            policy_explicit,
        })
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long one dequeue call waits for work
    pub dequeue_timeout: Duration,
    /// Pause after a dequeue that released nothing
    pub poll_interval: Duration,
    /// Periodic snapshot interval
    pub snapshot_interval: Duration,
    /// Interval for pruning finished jobs
    pub maintenance_interval: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Stage timeout unless overridden per stage
    pub default_stage_timeout: Duration,
    pub stage_timeouts: HashMap<PipelineStage, Duration>,
    pub recovery: RecoveryConfig,
    /// Wrap each stage in a circuit breaker when set
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            dequeue_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
            snapshot_interval: Duration::from_secs(30),
            maintenance_interval: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
            default_stage_timeout: Duration::from_secs(600),
            stage_timeouts: HashMap::new(),
            recovery: RecoveryConfig::default(),
            circuit_breaker: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables. Malformed numbers are
    /// rejected rather than replaced by defaults.
    pub fn from_env() -> Result<Self, WorkerError> {
        let mut config = Self::from_lookup(&env_lookup)?;
        config.circuit_breaker = CircuitBreakerConfig::from_env();
        Ok(config)
    }

    fn from_lookup(get: &dyn Fn(&str) -> Option<String>) -> Result<Self, WorkerError> {
        let defaults = Self::default();

        let mut stage_timeouts = HashMap::new();
        for stage in PipelineStage::ALL.iter().filter(|s| !s.is_terminal()) {
            let key = format!("WORKER_STAGE_TIMEOUT_{}", stage.as_str().to_uppercase());
            if let Some(timeout) = parse_secs(get, &key)? {
                stage_timeouts.insert(*stage, timeout);
            }
        }

        Ok(Self {
            dequeue_timeout: parse_millis(get, "WORKER_DEQUEUE_TIMEOUT_MS")?
                .unwrap_or(defaults.dequeue_timeout),
            poll_interval: parse_millis(get, "WORKER_POLL_INTERVAL_MS")?
                .unwrap_or(defaults.poll_interval),
            snapshot_interval: parse_secs(get, "WORKER_SNAPSHOT_INTERVAL_SECS")?
                .unwrap_or(defaults.snapshot_interval),
            maintenance_interval: parse_secs(get, "WORKER_MAINTENANCE_INTERVAL_SECS")?
                .unwrap_or(defaults.maintenance_interval),
            shutdown_timeout: parse_secs(get, "WORKER_SHUTDOWN_TIMEOUT")?
                .unwrap_or(defaults.shutdown_timeout),
            default_stage_timeout: parse_secs(get, "WORKER_STAGE_TIMEOUT_SECS")?
                .unwrap_or(defaults.default_stage_timeout),
            stage_timeouts,
            recovery: RecoveryConfig::from_lookup(get)?,
            circuit_breaker: None,
        })
    }

    /// Timeout for one stage.
    pub fn stage_timeout(&self, stage: PipelineStage) -> Duration {
        self.stage_timeouts
            .get(&stage)
            .copied()
            .unwrap_or(self.default_stage_timeout)
    }

    pub fn with_stage_timeout(mut self, stage: PipelineStage, timeout: Duration) -> Self {
        self.stage_timeouts.insert(stage, timeout);
        self
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_u64(get: &dyn Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>, WorkerError> {
    match get(key) {
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            WorkerError::config_error(format!("{key} must be a whole number, got {raw:?}"))
        }),
        None => Ok(None),
    }
}

fn parse_secs(
    get: &dyn Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<Duration>, WorkerError> {
    Ok(parse_u64(get, key)?.map(Duration::from_secs))
}

fn parse_millis(
    get: &dyn Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<Duration>, WorkerError> {
    Ok(parse_u64(get, key)?.map(Duration::from_millis))
}
