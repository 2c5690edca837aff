//! Queue configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use shortsync_models::JobType;
use tracing::warn;

/// Per-type caps: concurrent in-flight jobs and calls per rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RateLimit {
    pub max_concurrent: u32,
    pub per_hour: u32,
}

impl RateLimit {
    pub const fn new(max_concurrent: u32, per_hour: u32) -> Self {
        Self {
            max_concurrent,
            per_hour,
        }
    }

    /// Parse `<concurrent>/<per_hour>`.
    pub fn parse(s: &str) -> Option<Self> {
        let (concurrent, per_hour) = s.trim().split_once('/')?;
        Some(Self::new(
            concurrent.trim().parse().ok()?,
            per_hour.trim().parse().ok()?,
        ))
    }
}

/// Default limits per job type.
pub fn default_limit(job_type: JobType) -> RateLimit {
    match job_type {
        JobType::TrendResearch => RateLimit::new(2, 50),
        JobType::ScriptGeneration => RateLimit::new(3, 100),
        JobType::AssetGathering => RateLimit::new(5, 200),
        JobType::VoiceoverGeneration => RateLimit::new(2, 50),
        JobType::VideoAssembly => RateLimit::new(2, 30),
        JobType::ThumbnailGeneration => RateLimit::new(3, 100),
        JobType::QualityCheck => RateLimit::new(3, 100),
        JobType::YoutubeUpload => RateLimit::new(1, 10),
        JobType::PipelineExecution => RateLimit::new(2, 20),
    }
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Rate limits per accepted job type. Types without an entry are rejected
    /// at submission.
    pub limits: BTreeMap<JobType, RateLimit>,
    /// Width of the rolling call window
    pub window: Duration,
    /// How long `cancel` waits for a running job to acknowledge
    pub cancel_ack_timeout: Duration,
    /// How long finished jobs stay in memory
    pub result_retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            limits: JobType::ALL
                .iter()
                .map(|t| (*t, default_limit(*t)))
                .collect(),
            window: Duration::from_secs(3600),
            cancel_ack_timeout: Duration::from_secs(30),
            result_retention: Duration::from_secs(24 * 3600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut limits = defaults.limits;

        for job_type in JobType::ALL {
            let key = format!("QUEUE_LIMIT_{}", job_type.as_str().to_uppercase());
            if let Ok(value) = std::env::var(&key) {
                match RateLimit::parse(&value) {
                    Some(limit) => {
                        limits.insert(job_type, limit);
                    }
                    None => warn!(key = %key, value = %value, "Ignoring malformed rate limit"),
                }
            }
        }

        Self {
            limits,
            window: env_secs("QUEUE_RATE_WINDOW_SECS").unwrap_or(defaults.window),
            cancel_ack_timeout: env_secs("QUEUE_CANCEL_ACK_TIMEOUT_SECS")
                .unwrap_or(defaults.cancel_ack_timeout),
            result_retention: env_secs("QUEUE_RESULT_RETENTION_SECS")
                .unwrap_or(defaults.result_retention),
        }
    }

    /// Override the limit for one type.
    pub fn with_limit(mut self, job_type: JobType, limit: RateLimit) -> Self {
        self.limits.insert(job_type, limit);
        self
    }

    /// Accept only the given job types.
    pub fn restrict_to(mut self, types: &[JobType]) -> Self {
        self.limits.retain(|t, _| types.contains(t));
        self
    }

    pub fn limit_for(&self, job_type: JobType) -> Option<RateLimit> {
        self.limits.get(&job_type).copied()
    }

    pub fn accepts(&self, job_type: JobType) -> bool {
        self.limits.contains_key(&job_type)
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_cover_every_type() {
        let config = QueueConfig::default();
        for t in JobType::ALL {
            assert!(config.accepts(t));
        }
        assert_eq!(
            config.limit_for(JobType::YoutubeUpload),
            Some(RateLimit::new(1, 10))
        );
        assert_eq!(config.window, Duration::from_secs(3600));
    }

    #[test]
    fn test_rate_limit_parsing() {
        assert_eq!(RateLimit::parse("2/50"), Some(RateLimit::new(2, 50)));
        assert_eq!(RateLimit::parse(" 4 / 8 "), Some(RateLimit::new(4, 8)));
        assert_eq!(RateLimit::parse("2"), None);
        assert_eq!(RateLimit::parse("a/b"), None);
    }

    #[test]
    fn test_restrict_to() {
        let config = QueueConfig::default().restrict_to(&[JobType::ScriptGeneration]);
        assert!(config.accepts(JobType::ScriptGeneration));
        assert!(!config.accepts(JobType::VideoAssembly));
    }
}
