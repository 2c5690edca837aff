//! Circuit breaker for stage collaborators.
//!
//! Wraps a stage handler. After `failure_threshold` consecutive failures the
//! circuit opens and the stage fails fast without calling the collaborator.
//! Timeouts and panics count as failures. Once `recovery_timeout` has
//! passed the circuit goes half-open and admits one trial call at a time;
//! `success_threshold` successful trials close it again, any failure
//! reopens it.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::metrics;
use crate::stage::{SharedStage, StageContext, StageHandler, StageOutcome, StageResult};

/// Circuit breaker states.
#[derive(Clone, Debug, PartialEq)]
pub enum CircuitState {
    /// Normal operation
    Closed { consecutive_failures: u32 },
    /// Failing fast
    Open { opened_at: Instant },
    /// Testing recovery. `trial_started` is set while a trial call is in
    /// flight.
    HalfOpen {
        success_count: u32,
        trial_started: Option<Instant>,
    },
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Thresholds from `STAGE_BREAKER_*`, or `None` unless
    /// `STAGE_CIRCUIT_BREAKER=true`.
    pub fn from_env() -> Option<Self> {
        let enabled = std::env::var("STAGE_CIRCUIT_BREAKER")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        if !enabled {
            return None;
        }

        let defaults = Self::default();
        Some(Self {
            failure_threshold: std::env::var("STAGE_BREAKER_FAILURES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.failure_threshold),
            recovery_timeout: std::env::var("STAGE_BREAKER_RECOVERY_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.recovery_timeout),
            success_threshold: std::env::var("STAGE_BREAKER_SUCCESSES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.success_threshold),
        })
    }
}

pub struct CircuitBreaker {
    name: String,
    inner: SharedStage,
    config: CircuitBreakerConfig,
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, inner: SharedStage, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner,
            config,
            state: Mutex::new(CircuitState::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check if a call is allowed, moving open to half-open once the
    /// recovery timeout has passed. Half-open admits a single trial; a trial
    /// that has not reported back within `recovery_timeout` is written off.
    pub fn allow(&self) -> bool {
        let mut state = self.lock();
        let now = Instant::now();
        match *state {
            CircuitState::Closed { .. } => true,
            CircuitState::HalfOpen {
                success_count,
                trial_started,
            } => {
                let busy = trial_started.is_some_and(|started| {
                    now.saturating_duration_since(started) < self.config.recovery_timeout
                });
                if busy {
                    return false;
                }
                *state = CircuitState::HalfOpen {
                    success_count,
                    trial_started: Some(now),
                };
                true
            }
            CircuitState::Open { opened_at } => {
                if now.saturating_duration_since(opened_at) >= self.config.recovery_timeout {
                    info!(stage = %self.name, "Circuit half-open, allowing trial call");
                    *state = CircuitState::HalfOpen {
                        success_count: 0,
                        trial_started: Some(now),
                    };
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        match *state {
            CircuitState::HalfOpen { success_count, .. } => {
                let count = success_count + 1;
                if count >= self.config.success_threshold {
                    info!(stage = %self.name, "Circuit closed");
                    *state = CircuitState::Closed {
                        consecutive_failures: 0,
                    };
                } else {
                    *state = CircuitState::HalfOpen {
                        success_count: count,
                        trial_started: None,
                    };
                }
            }
            CircuitState::Closed { .. } => {
                *state = CircuitState::Closed {
                    consecutive_failures: 0,
                };
            }
            CircuitState::Open { .. } => {}
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        let open = match *state {
            CircuitState::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.config.failure_threshold {
                    true
                } else {
                    *state = CircuitState::Closed {
                        consecutive_failures: failures,
                    };
                    false
                }
            }
            CircuitState::HalfOpen { .. } => true,
            CircuitState::Open { .. } => false,
        };

        if open {
            warn!(stage = %self.name, "Circuit opened");
            metrics::record_circuit_opened(&self.name);
            *state = CircuitState::Open {
                opened_at: Instant::now(),
            };
        }
    }

    /// Current state for monitoring.
    pub fn state(&self) -> CircuitState {
        self.lock().clone()
    }

    fn rejection(&self) -> String {
        format!("circuit open for {}", self.name)
    }

    fn record(&self, success: bool) {
        if success {
            self.record_success();
        } else {
            self.record_failure();
        }
    }
}

#[async_trait]
impl StageHandler for CircuitBreaker {
    async fn run(&self, ctx: StageContext) -> StageResult {
        if !self.allow() {
            return StageResult::failure(self.rejection());
        }

        let result = self.inner.run(ctx).await;
        self.record(result.success);
        result
    }

    async fn run_guarded(&self, ctx: StageContext, timeout: Duration) -> StageOutcome {
        if !self.allow() {
            return StageOutcome::Failure(self.rejection());
        }

        let outcome = self.inner.run_guarded(ctx, timeout).await;
        self.record(outcome.is_success());
        outcome
    }
}
