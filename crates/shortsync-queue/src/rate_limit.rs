//! Per-type concurrency and rolling-window bookkeeping.
//!
//! Pure state, no I/O and no clock of its own: every call takes `now` so the
//! scheduler decides which clock drives the window.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use shortsync_models::JobType;

use crate::config::{QueueConfig, RateLimit};

/// In-flight count and recent call timestamps for one job type.
#[derive(Debug, Default, Clone)]
struct RateWindow {
    in_flight: u32,
    calls: VecDeque<DateTime<Utc>>,
}

impl RateWindow {
    /// Drop timestamps that have left the window.
    fn evict(&mut self, now: DateTime<Utc>, width: Duration) {
        let cutoff = now - width;
        while self.calls.front().is_some_and(|t| *t <= cutoff) {
            self.calls.pop_front();
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    limits: HashMap<JobType, RateLimit>,
    windows: HashMap<JobType, RateWindow>,
    width: Duration,
}

impl RateLimiter {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            limits: config.limits.iter().map(|(t, l)| (*t, *l)).collect(),
            windows: HashMap::new(),
            width: Duration::from_std(config.window).unwrap_or_else(|_| Duration::hours(1)),
        }
    }

    /// True only if both the concurrency cap and the window cap have room.
    /// Types without a configured limit are never released.
    pub fn check(&mut self, job_type: JobType, now: DateTime<Utc>) -> bool {
        let Some(limit) = self.limits.get(&job_type).copied() else {
            return false;
        };
        let window = self.windows.entry(job_type).or_default();
        window.evict(now, self.width);

        window.in_flight < limit.max_concurrent && (window.calls.len() as u64) < limit.per_hour as u64
    }

    /// Record a released job: one more in flight, one more call in the window.
    pub fn record(&mut self, job_type: JobType, now: DateTime<Utc>) {
        let window = self.windows.entry(job_type).or_default();
        window.in_flight += 1;
        window.calls.push_back(now);
    }

    /// A job of this type reached a terminal status.
    pub fn release(&mut self, job_type: JobType) {
        if let Some(window) = self.windows.get_mut(&job_type) {
            window.in_flight = window.in_flight.saturating_sub(1);
        }
    }

    pub fn in_flight(&self, job_type: JobType) -> u32 {
        self.windows.get(&job_type).map_or(0, |w| w.in_flight)
    }

    /// Calls still inside the window at `now`.
    pub fn calls_in_window(&self, job_type: JobType, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.width;
        self.windows
            .get(&job_type)
            .map_or(0, |w| w.calls.iter().filter(|t| **t > cutoff).count())
    }
}
