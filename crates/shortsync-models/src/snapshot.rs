//! Versioned queue snapshot used for crash recovery.
//!
//! A snapshot holds the pending queue, per-type counters and every job or
//! pipeline record that was still non-terminal when it was taken. Encoding
//! is deterministic (sorted sections, `BTreeMap` counters) so that loading
//! a snapshot and saving it again reproduces the same bytes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::schema::RootSchema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::job::{Job, JobStatus, JobType};
use crate::pipeline::PipelineRun;

/// Current on-disk snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Lifetime counters for one job type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobCounters {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl JobCounters {
    /// Count a terminal outcome. Non-terminal statuses are ignored.
    pub fn record_terminal(&mut self, status: JobStatus) {
        match status {
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
            JobStatus::Pending | JobStatus::Processing => {}
        }
    }

    /// Completed share of all submitted jobs, in percent.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed as f64 / self.total as f64 * 100.0
    }
}

/// A job waiting in the ready queue, with its insertion sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PendingEntry {
    pub sequence: u64,
    pub job: Job,
}

/// Serializable projection of the scheduler state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueueSnapshot {
    /// Format version
    pub version: u32,

    /// When the snapshot was taken
    pub saved_at: DateTime<Utc>,

    /// Ready queue in dequeue order
    #[serde(default)]
    pub pending: Vec<PendingEntry>,

    /// Per-type lifetime counters
    #[serde(default)]
    pub counters: BTreeMap<JobType, JobCounters>,

    /// Jobs owned by an executor when the snapshot was taken
    #[serde(default)]
    pub jobs: Vec<Job>,

    /// Pipeline runs that had not reached a terminal stage
    #[serde(default)]
    pub pipelines: Vec<PipelineRun>,
}

impl QueueSnapshot {
    /// Empty snapshot at the current format version.
    pub fn empty(saved_at: DateTime<Utc>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at,
            pending: Vec::new(),
            counters: BTreeMap::new(),
            jobs: Vec::new(),
            pipelines: Vec::new(),
        }
    }

    /// Sort every section into its canonical order.
    pub fn normalized(mut self) -> Self {
        self.pending.sort_by(|a, b| {
            b.job
                .priority
                .cmp(&a.job.priority)
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        self.jobs.sort_by(|a, b| a.id.cmp(&b.id));
        self.pipelines.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        self
    }

    /// True when any job is pending/processing or any run is non-terminal.
    pub fn has_unfinished_work(&self) -> bool {
        !self.pending.is_empty()
            || self.jobs.iter().any(|job| !job.is_terminal())
            || self.pipelines.iter().any(|run| !run.is_terminal())
    }

    /// Encode as pretty-printed JSON.
    pub fn to_json_vec(&self) -> ModelResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decode, checking the format version before the body.
    pub fn from_json_slice(bytes: &[u8]) -> ModelResult<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let version = value
            .get("version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ModelError::malformed_snapshot("missing version field"))?;

        let version = u32::try_from(version)
            .map_err(|_| ModelError::malformed_snapshot("version out of range"))?;

        match version {
            SNAPSHOT_VERSION => Ok(serde_json::from_value(value)?),
            found => Err(ModelError::UnsupportedSnapshotVersion {
                found,
                supported: SNAPSHOT_VERSION,
            }),
        }
    }

    /// JSON Schema of the snapshot document.
    pub fn json_schema() -> RootSchema {
        schemars::schema_for!(QueueSnapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobPriority, Payload};
    use crate::pipeline::PipelineStage;

    fn sample() -> QueueSnapshot {
        let mut snapshot = QueueSnapshot::empty(Utc::now());

        let mut payload = Payload::new();
        payload.insert("topic".into(), "rust async".into());
        let low = Job::new(JobType::ScriptGeneration, JobPriority::Low, payload.clone());
        let high = Job::new(JobType::ScriptGeneration, JobPriority::High, payload);
        snapshot.pending.push(PendingEntry { sequence: 1, job: low });
        snapshot.pending.push(PendingEntry { sequence: 2, job: high });

        let mut running = Job::new(JobType::PipelineExecution, JobPriority::Normal, Payload::new());
        running.start(Utc::now()).unwrap();
        let mut run = PipelineRun::new(running.id.clone());
        run.stage = PipelineStage::AssetGathering;
        run.progress = 0.3;
        snapshot.jobs.push(running);
        snapshot.pipelines.push(run);

        snapshot.counters.insert(
            JobType::ScriptGeneration,
            JobCounters {
                total: 2,
                ..Default::default()
            },
        );
        snapshot.normalized()
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let snapshot = sample();
        let first = snapshot.to_json_vec().unwrap();
        let decoded = QueueSnapshot::from_json_slice(&first).unwrap();
        let second = decoded.to_json_vec().unwrap();

        assert_eq!(decoded, snapshot);
        assert_eq!(first, second);
    }

    #[test]
    fn test_normalized_orders_pending_by_priority_then_sequence() {
        let snapshot = sample();
        assert_eq!(snapshot.pending[0].job.priority, JobPriority::High);
        assert_eq!(snapshot.pending[1].job.priority, JobPriority::Low);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let body = br#"{"version": 99, "saved_at": "2024-01-01T00:00:00Z"}"#;
        let err = QueueSnapshot::from_json_slice(body).unwrap_err();
        assert!(matches!(
            err,
            ModelError::UnsupportedSnapshotVersion { found: 99, .. }
        ));
    }

    #[test]
    fn test_missing_version_rejected() {
        let err = QueueSnapshot::from_json_slice(br#"{"pending": []}"#).unwrap_err();
        assert!(matches!(err, ModelError::MalformedSnapshot(_)));
    }

    #[test]
    fn test_unfinished_work_detection() {
        assert!(!QueueSnapshot::empty(Utc::now()).has_unfinished_work());
        assert!(sample().has_unfinished_work());
    }

    #[test]
    fn test_counters() {
        let mut counters = JobCounters {
            total: 4,
            ..Default::default()
        };
        counters.record_terminal(JobStatus::Completed);
        counters.record_terminal(JobStatus::Failed);
        counters.record_terminal(JobStatus::Processing);
        assert_eq!(counters.completed, 1);
        assert_eq!(counters.failed, 1);
        assert_eq!(counters.success_rate(), 25.0);
    }

    #[test]
    fn test_schema_names_sections() {
        let schema = serde_json::to_value(QueueSnapshot::json_schema()).unwrap();
        let props = &schema["properties"];
        for key in ["version", "saved_at", "pending", "counters", "jobs", "pipelines"] {
            assert!(props.get(key).is_some(), "missing {key}");
        }
    }
}
