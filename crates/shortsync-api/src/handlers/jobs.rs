//! Job submission and status handlers.
//!
//! Provides REST API endpoints for:
//! - Submitting jobs to the scheduler
//! - Polling a job's status and pipeline progress
//! - Cancelling pending or running jobs
//! - Queue statistics and the snapshot JSON schema

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use schemars::schema::RootSchema;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use shortsync_models::{
    Job, JobId, JobPriority, JobResult, JobStatus, JobType, Payload, PipelineRun, QueueSnapshot,
};
use shortsync_queue::QueueStats;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// Types
// ============================================================================

/// Job submission request.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateJobRequest {
    #[validate(length(min = 1, max = 64))]
    pub job_type: String,
    /// `low`, `normal`, `high`, `critical` or `0`..`3`. Defaults to normal.
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub payload: Payload,
    /// Caller-chosen job id; generated when absent
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub job_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

/// Job status with its pipeline run, when one exists.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    #[serde(flatten)]
    pub job: JobResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineRun>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelJobResponse {
    pub job_id: JobId,
    /// Status right after the request. A running job reports `processing`
    /// until it reaches its next stage boundary.
    pub status: JobStatus,
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a job.
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<CreateJobResponse>)> {
    request
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let job_type: JobType = request
        .job_type
        .parse()
        .map_err(|e: shortsync_models::ModelError| ApiError::Validation(e.to_string()))?;
    let priority: JobPriority = match request.priority.as_deref() {
        Some(p) => p
            .parse()
            .map_err(|e: shortsync_models::ModelError| ApiError::Validation(e.to_string()))?,
        None => JobPriority::default(),
    };

    let mut job = Job::new(job_type, priority, request.payload);
    job.created_at = state.scheduler.now();
    if let Some(id) = request.job_id {
        job = job.with_id(JobId::from_string(id));
    }

    let job_id = state.scheduler.enqueue(job).await?;
    info!(job_id = %job_id, job_type = %job_type, priority = %priority, "Job submitted");

    Ok((
        StatusCode::CREATED,
        Json(CreateJobResponse {
            job_id,
            status: JobStatus::Pending,
        }),
    ))
}

/// Get a job's status and pipeline progress.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job_id = parse_job_id(job_id)?;

    let job = state
        .scheduler
        .get_status(&job_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("job {job_id}")))?;
    let pipeline = state.scheduler.get_run(&job_id).await;

    Ok(Json(JobStatusResponse { job, pipeline }))
}

/// Cancel a job.
///
/// A pending job is cancelled at once. A running job is signalled and
/// stops at its next stage boundary, so the request returns `202` without
/// waiting for it.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<(StatusCode, Json<CancelJobResponse>)> {
    let job_id = parse_job_id(job_id)?;

    let current = state
        .scheduler
        .get_status(&job_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("job {job_id}")))?;

    match current.status {
        JobStatus::Pending => {
            if !state.scheduler.cancel(&job_id).await {
                return Err(ApiError::conflict(format!("job {job_id} is no longer pending")));
            }
            Ok((
                StatusCode::OK,
                Json(CancelJobResponse {
                    job_id,
                    status: JobStatus::Cancelled,
                }),
            ))
        }
        JobStatus::Processing => {
            let scheduler = state.scheduler.clone();
            let id = job_id.clone();
            tokio::spawn(async move {
                scheduler.cancel(&id).await;
            });
            Ok((
                StatusCode::ACCEPTED,
                Json(CancelJobResponse {
                    job_id,
                    status: JobStatus::Processing,
                }),
            ))
        }
        status => Err(ApiError::conflict(format!("job {job_id} is already {status}"))),
    }
}

/// Queue and per-type statistics.
pub async fn queue_stats(State(state): State<AppState>) -> Json<QueueStats> {
    Json(state.scheduler.queue_stats().await)
}

/// JSON schema of the persisted queue snapshot.
pub async fn snapshot_schema() -> Json<RootSchema> {
    Json(QueueSnapshot::json_schema())
}

fn parse_job_id(raw: String) -> ApiResult<JobId> {
    let id = JobId::from_string(raw);
    if !id.is_valid() {
        return Err(ApiError::bad_request("Invalid job ID format"));
    }
    Ok(id)
}
