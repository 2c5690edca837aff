//! Job definitions for queue processing.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};
use crate::pipeline::PipelineStage;

/// Opaque key/value payload attached to jobs and results.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Maximum accepted length of a caller-supplied job ID.
const MAX_JOB_ID_LEN: usize = 128;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An ID is usable as a map/storage key when it is non-empty, bounded
    /// and limited to `[A-Za-z0-9_.:-]`. IDs double as file names in the
    /// file-backed store, so path separators are rejected.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= MAX_JOB_ID_LEN
            && self.0 != "."
            && self.0 != ".."
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type of job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    TrendResearch,
    ScriptGeneration,
    AssetGathering,
    VoiceoverGeneration,
    VideoAssembly,
    ThumbnailGeneration,
    QualityCheck,
    YoutubeUpload,
    /// Full topic-to-upload workflow
    PipelineExecution,
}

impl JobType {
    pub const ALL: [JobType; 9] = [
        JobType::TrendResearch,
        JobType::ScriptGeneration,
        JobType::AssetGathering,
        JobType::VoiceoverGeneration,
        JobType::VideoAssembly,
        JobType::ThumbnailGeneration,
        JobType::QualityCheck,
        JobType::YoutubeUpload,
        JobType::PipelineExecution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::TrendResearch => "trend_research",
            JobType::ScriptGeneration => "script_generation",
            JobType::AssetGathering => "asset_gathering",
            JobType::VoiceoverGeneration => "voiceover_generation",
            JobType::VideoAssembly => "video_assembly",
            JobType::ThumbnailGeneration => "thumbnail_generation",
            JobType::QualityCheck => "quality_check",
            JobType::YoutubeUpload => "youtube_upload",
            JobType::PipelineExecution => "pipeline_execution",
        }
    }

    /// Ordered stage list a job of this type walks through by default.
    pub fn default_stages(&self) -> &'static [PipelineStage] {
        match self {
            JobType::TrendResearch => &[PipelineStage::TrendDetection],
            JobType::ScriptGeneration => &[PipelineStage::ScriptGeneration],
            JobType::AssetGathering => &[PipelineStage::AssetGathering],
            JobType::VoiceoverGeneration => &[PipelineStage::VoiceoverGeneration],
            JobType::VideoAssembly => &[PipelineStage::VideoAssembly],
            JobType::ThumbnailGeneration => &[PipelineStage::ThumbnailGeneration],
            JobType::QualityCheck => &[PipelineStage::QualityCheck],
            JobType::YoutubeUpload => &[PipelineStage::YoutubeUpload],
            JobType::PipelineExecution => &[
                PipelineStage::TrendDetection,
                PipelineStage::ScriptGeneration,
                PipelineStage::AssetGathering,
                PipelineStage::VoiceoverGeneration,
                PipelineStage::VideoAssembly,
                PipelineStage::ThumbnailGeneration,
                PipelineStage::QualityCheck,
                PipelineStage::ApprovalPending,
                PipelineStage::YoutubeUpload,
            ],
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        JobType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ModelError::UnknownJobType(s.to_string()))
    }
}

/// Job priority. Higher variants are dequeued first.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    Default,
)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl JobPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Low => "low",
            JobPriority::Normal => "normal",
            JobPriority::High => "high",
            JobPriority::Critical => "critical",
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobPriority {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" | "0" => Ok(JobPriority::Low),
            "normal" | "1" => Ok(JobPriority::Normal),
            "high" | "2" => Ok(JobPriority::High),
            "critical" | "3" => Ok(JobPriority::Critical),
            _ => Err(ModelError::UnknownPriority(s.to_string())),
        }
    }
}

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting in queue
    #[default]
    Pending,
    /// Job is owned by an executor
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// pending -> processing -> {completed | failed | cancelled},
    /// plus pending -> cancelled.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work tracked from submission to a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Job type
    pub job_type: JobType,

    /// Job priority
    #[serde(default)]
    pub priority: JobPriority,

    /// Caller-supplied input
    #[serde(default)]
    pub payload: Payload,

    /// Job status
    #[serde(default)]
    pub status: JobStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Started at timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Completed at timestamp (any terminal status)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Result payload, present only on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Payload>,

    /// Error message, present only on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Stage that failed, when the failure came from a pipeline stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<PipelineStage>,

    /// Number of times the job has been dispatched to an executor
    #[serde(default)]
    pub attempts: u32,
}

impl Job {
    /// Create a new pending job.
    pub fn new(job_type: JobType, priority: JobPriority, payload: Payload) -> Self {
        Self {
            id: JobId::new(),
            job_type,
            priority,
            payload,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error_message: None,
            failed_stage: None,
            attempts: 0,
        }
    }

    /// Set an explicit job ID.
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    fn transition(&mut self, next: JobStatus) -> ModelResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ModelError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Hand the job to an executor.
    pub fn start(&mut self, at: DateTime<Utc>) -> ModelResult<()> {
        self.transition(JobStatus::Processing)?;
        self.started_at = Some(at);
        self.attempts += 1;
        Ok(())
    }

    /// Mark job as completed.
    pub fn complete(&mut self, result: Payload, at: DateTime<Utc>) -> ModelResult<()> {
        self.transition(JobStatus::Completed)?;
        self.result = Some(result);
        self.error_message = None;
        self.completed_at = Some(at);
        Ok(())
    }

    /// Mark job as failed.
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        stage: Option<PipelineStage>,
        at: DateTime<Utc>,
    ) -> ModelResult<()> {
        self.transition(JobStatus::Failed)?;
        self.error_message = Some(error.into());
        self.failed_stage = stage;
        self.result = None;
        self.completed_at = Some(at);
        Ok(())
    }

    /// Mark job as cancelled.
    pub fn cancel(&mut self, at: DateTime<Utc>) -> ModelResult<()> {
        self.transition(JobStatus::Cancelled)?;
        self.completed_at = Some(at);
        Ok(())
    }

    /// Fresh pending copy for reprocessing after a restart. Keeps identity,
    /// priority, payload and attempt count; drops run state.
    pub fn requeued(&self) -> Self {
        Self {
            status: JobStatus::Pending,
            started_at: None,
            completed_at: None,
            result: None,
            error_message: None,
            failed_stage: None,
            ..self.clone()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Seconds between start and terminal status.
    pub fn execution_time_secs(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => {
                Some((end - start).num_milliseconds().max(0) as f64 / 1000.0)
            }
            _ => None,
        }
    }
}

/// Caller-facing view of a job's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobResult {
    pub job_id: JobId,
    pub job_type: JobType,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<PipelineStage>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_secs: Option<f64>,
}

impl From<&Job> for JobResult {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            job_type: job.job_type,
            status: job.status,
            result: job.result.clone(),
            error: job.error_message.clone(),
            failed_stage: job.failed_stage,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            execution_time_secs: job.execution_time_secs(),
        }
    }
}
