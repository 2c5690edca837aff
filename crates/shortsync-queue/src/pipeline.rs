//! Pipeline stage state machine.
//!
//! Holds one `PipelineRun` per job and enforces forward-only progress:
//! a run never moves to an earlier stage, `failed` is reachable from any
//! non-terminal stage, and nothing changes once a run is terminal.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shortsync_models::{JobId, Payload, PipelineRun, PipelineStage};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct PipelineStateMachine {
    runs: HashMap<JobId, PipelineRun>,
}

impl PipelineStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh run at `idle`, replacing any previous run for the ID.
    pub fn register(&mut self, run_id: &JobId) {
        self.runs.insert(run_id.clone(), PipelineRun::new(run_id.clone()));
    }

    /// Insert a run as-is (used when restoring from a snapshot).
    pub fn insert(&mut self, run: PipelineRun) {
        self.runs.insert(run.run_id.clone(), run);
    }

    fn get_or_create(&mut self, run_id: &JobId) -> &mut PipelineRun {
        self.runs.entry(run_id.clone()).or_insert_with(|| {
            warn!(run_id = %run_id, "Pipeline run not registered, creating at idle");
            PipelineRun::new(run_id.clone())
        })
    }

    /// Move a run to `stage`.
    ///
    /// Returns false, leaving the run untouched, when the move would go
    /// backwards or the run is already terminal.
    pub fn advance(
        &mut self,
        run_id: &JobId,
        stage: PipelineStage,
        progress: f64,
        metadata: Option<Payload>,
        now: DateTime<Utc>,
    ) -> bool {
        let run = self.get_or_create(run_id);

        if !run.stage.allows(stage) {
            warn!(
                run_id = %run_id,
                current = %run.stage,
                requested = %stage,
                "Rejected pipeline stage transition"
            );
            return false;
        }

        run.stage = stage;
        run.progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        };
        if let Some(metadata) = metadata {
            run.metadata.extend(metadata);
        }
        if stage != PipelineStage::Idle && run.start_time.is_none() {
            run.start_time = Some(now);
        }
        if stage.is_terminal() {
            run.end_time = Some(now);
        }

        debug!(run_id = %run_id, stage = %stage, progress = run.progress, "Pipeline advanced");
        true
    }

    /// Force a run to `failed` with a message.
    ///
    /// Idempotent on a failed run (the first message is kept). A completed
    /// run is left untouched and false is returned.
    pub fn set_error(&mut self, run_id: &JobId, message: &str, now: DateTime<Utc>) -> bool {
        let run = self.get_or_create(run_id);
        match run.stage {
            PipelineStage::Failed => true,
            PipelineStage::Completed => {
                warn!(run_id = %run_id, "Ignoring error for completed pipeline run");
                false
            }
            _ => {
                run.stage = PipelineStage::Failed;
                run.error_message = Some(message.to_string());
                run.end_time = Some(now);
                true
            }
        }
    }

    pub fn get(&self, run_id: &JobId) -> Option<&PipelineRun> {
        self.runs.get(run_id)
    }

    pub fn remove(&mut self, run_id: &JobId) -> Option<PipelineRun> {
        self.runs.remove(run_id)
    }

    pub fn non_terminal(&self) -> impl Iterator<Item = &PipelineRun> {
        self.runs.values().filter(|run| !run.is_terminal())
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_with_run() -> (PipelineStateMachine, JobId) {
        let mut machine = PipelineStateMachine::new();
        let id = JobId::new();
        machine.register(&id);
        (machine, id)
    }

    #[test]
    fn test_backwards_transition_is_a_no_op() {
        let (mut machine, id) = machine_with_run();
        let now = Utc::now();

        assert!(machine.advance(&id, PipelineStage::ScriptGeneration, 0.2, None, now));
        assert!(!machine.advance(&id, PipelineStage::Idle, 0.0, None, now));

        let run = machine.get(&id).unwrap();
        assert_eq!(run.stage, PipelineStage::ScriptGeneration);
        assert_eq!(run.progress, 0.2);
        assert_eq!(run.start_time, Some(now));
    }

    #[test]
    fn test_completed_is_terminal() {
        let (mut machine, id) = machine_with_run();
        let now = Utc::now();

        assert!(machine.advance(&id, PipelineStage::Completed, 1.0, None, now));
        assert!(!machine.advance(&id, PipelineStage::VideoAssembly, 0.5, None, now));
        assert!(!machine.set_error(&id, "late failure", now));

        let run = machine.get(&id).unwrap();
        assert_eq!(run.stage, PipelineStage::Completed);
        assert_eq!(run.end_time, Some(now));
        assert!(run.error_message.is_none());
    }

    #[test]
    fn test_metadata_accumulates() {
        let (mut machine, id) = machine_with_run();
        let now = Utc::now();

        let mut first = Payload::new();
        first.insert("topic".into(), "rust".into());
        let mut second = Payload::new();
        second.insert("script".into(), "hello".into());

        machine.advance(&id, PipelineStage::TrendDetection, 0.1, Some(first), now);
        machine.advance(&id, PipelineStage::ScriptGeneration, 0.2, Some(second), now);

        let run = machine.get(&id).unwrap();
        assert_eq!(run.metadata.len(), 2);
        assert_eq!(run.metadata["topic"], "rust");
    }

    #[test]
    fn test_progress_is_clamped() {
        let (mut machine, id) = machine_with_run();
        machine.advance(&id, PipelineStage::AssetGathering, 7.5, None, Utc::now());
        assert_eq!(machine.get(&id).unwrap().progress, 1.0);
        machine.advance(&id, PipelineStage::AssetGathering, f64::NAN, None, Utc::now());
        assert_eq!(machine.get(&id).unwrap().progress, 0.0);
    }

    #[test]
    fn test_unknown_run_is_auto_created() {
        let mut machine = PipelineStateMachine::new();
        let id = JobId::new();
        assert!(machine.advance(&id, PipelineStage::VideoAssembly, 0.5, None, Utc::now()));
        assert_eq!(machine.get(&id).unwrap().stage, PipelineStage::VideoAssembly);
    }

    #[test]
    fn test_set_error_is_idempotent() {
        let (mut machine, id) = machine_with_run();
        let now = Utc::now();
        machine.advance(&id, PipelineStage::AssetGathering, 0.3, None, now);

        assert!(machine.set_error(&id, "no assets", now));
        assert!(machine.set_error(&id, "second error", now));

        let run = machine.get(&id).unwrap();
        assert_eq!(run.stage, PipelineStage::Failed);
        assert_eq!(run.error_message.as_deref(), Some("no assets"));
        assert_eq!(machine.non_terminal().count(), 0);
    }
}
