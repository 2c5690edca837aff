//! Pipeline stages and per-job pipeline run records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;
use crate::job::{JobId, Payload};

/// Pipeline stage, declared in execution order.
///
/// `Failed` is a sink reachable from any non-terminal stage; it sorts last so
/// that the derived ordering stays monotonic for the forward stages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    TrendDetection,
    ScriptGeneration,
    AssetGathering,
    VoiceoverGeneration,
    VideoAssembly,
    ThumbnailGeneration,
    QualityCheck,
    ApprovalPending,
    YoutubeUpload,
    Completed,
    Failed,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 12] = [
        PipelineStage::Idle,
        PipelineStage::TrendDetection,
        PipelineStage::ScriptGeneration,
        PipelineStage::AssetGathering,
        PipelineStage::VoiceoverGeneration,
        PipelineStage::VideoAssembly,
        PipelineStage::ThumbnailGeneration,
        PipelineStage::QualityCheck,
        PipelineStage::ApprovalPending,
        PipelineStage::YoutubeUpload,
        PipelineStage::Completed,
        PipelineStage::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Idle => "idle",
            PipelineStage::TrendDetection => "trend_detection",
            PipelineStage::ScriptGeneration => "script_generation",
            PipelineStage::AssetGathering => "asset_gathering",
            PipelineStage::VoiceoverGeneration => "voiceover_generation",
            PipelineStage::VideoAssembly => "video_assembly",
            PipelineStage::ThumbnailGeneration => "thumbnail_generation",
            PipelineStage::QualityCheck => "quality_check",
            PipelineStage::ApprovalPending => "approval_pending",
            PipelineStage::YoutubeUpload => "youtube_upload",
            PipelineStage::Completed => "completed",
            PipelineStage::Failed => "failed",
        }
    }

    /// Position in the fixed forward ordering.
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Completed | PipelineStage::Failed)
    }

    /// Whether a run currently at `self` may move to `next`.
    ///
    /// Nothing leaves a terminal stage. `Failed` is reachable from every
    /// other stage; otherwise the index may not decrease.
    pub fn allows(&self, next: PipelineStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == PipelineStage::Failed || next.index() >= self.index()
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStage {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        PipelineStage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| ModelError::UnknownStage(s.to_string()))
    }
}

/// Execution record of a job that drives a multi-stage workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PipelineRun {
    /// Run ID, equal to the owning job ID
    pub run_id: JobId,

    /// Current stage
    #[serde(default = "default_stage")]
    pub stage: PipelineStage,

    /// Progress fraction in [0, 1]
    #[serde(default)]
    pub progress: f64,

    /// Metadata accumulated stage by stage
    #[serde(default)]
    pub metadata: Payload,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

fn default_stage() -> PipelineStage {
    PipelineStage::Idle
}

impl PipelineRun {
    /// Create a run at `idle`.
    pub fn new(run_id: JobId) -> Self {
        Self {
            run_id,
            stage: PipelineStage::Idle,
            progress: 0.0,
            metadata: Payload::new(),
            start_time: None,
            end_time: None,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_is_declaration_order() {
        for pair in PipelineStage::ALL.windows(2) {
            assert!(pair[0].index() < pair[1].index());
        }
        assert_eq!(PipelineStage::Idle.index(), 0);
    }

    #[test]
    fn test_forward_only_transitions() {
        let current = PipelineStage::ScriptGeneration;
        assert!(current.allows(PipelineStage::ScriptGeneration));
        assert!(current.allows(PipelineStage::VideoAssembly));
        assert!(!current.allows(PipelineStage::Idle));
        assert!(!current.allows(PipelineStage::TrendDetection));
        assert!(current.allows(PipelineStage::Failed));
    }

    #[test]
    fn test_terminal_stages_accept_nothing() {
        assert!(!PipelineStage::Completed.allows(PipelineStage::VideoAssembly));
        assert!(!PipelineStage::Completed.allows(PipelineStage::Failed));
        assert!(!PipelineStage::Failed.allows(PipelineStage::Failed));
    }

    #[test]
    fn test_stage_parsing() {
        assert_eq!(
            "voiceover-generation".parse::<PipelineStage>().unwrap(),
            PipelineStage::VoiceoverGeneration
        );
        assert!("render".parse::<PipelineStage>().is_err());
    }

    #[test]
    fn test_run_deserializes_with_defaults() {
        let run: PipelineRun = serde_json::from_str(r#"{"run_id":"abc"}"#).unwrap();
        assert_eq!(run.stage, PipelineStage::Idle);
        assert_eq!(run.progress, 0.0);
        assert!(!run.is_terminal());
    }
}
