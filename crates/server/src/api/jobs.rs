//! Job API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use reelforge_core::{JobError, JobFilter, JobRecord, JobSpec, JobStatus, QueueError, StopOutcome};

use crate::state::AppState;

/// Maximum allowed limit for job queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for job queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for submitting a job
#[derive(Debug, Deserialize)]
pub struct SubmitJobBody {
    /// Registered pipeline to run
    pub pipeline: String,
    /// Pipeline input, handed to every stage
    #[serde(default)]
    pub input: Value,
    /// Priority for queue ordering (higher = more urgent)
    pub priority: Option<i32>,
}

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    /// Filter by status
    pub status: Option<String>,
    /// Filter by pipeline
    pub pipeline: Option<String>,
    /// Maximum number of jobs to return
    pub limit: Option<i64>,
    /// Pagination offset
    pub offset: Option<i64>,
}

/// Acknowledgment of a submission
#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub id: String,
    pub status: JobStatus,
}

/// Response for job operations
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub pipeline: String,
    pub input: Value,
    pub priority: i32,
    pub status: JobStatus,
    pub percent: u8,
    pub current_stage: Option<String>,
    pub output_path: Option<String>,
    pub error: Option<JobError>,
    pub retry_count: u32,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl From<JobRecord> for JobResponse {
    fn from(job: JobRecord) -> Self {
        Self {
            id: job.id,
            pipeline: job.pipeline,
            input: job.input,
            priority: job.priority,
            status: job.status,
            percent: job.percent,
            current_stage: job.current_stage,
            output_path: job.output_path,
            error: job.error,
            retry_count: job.retry_count,
            created_at: job.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            updated_at: job.updated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            started_at: job.started_at.map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            finished_at: job.finished_at.map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }
}

/// Response for listing jobs
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Response for a cancel or pause that a running execution will apply
#[derive(Debug, Serialize)]
pub struct StopRequestedResponse {
    pub id: String,
    pub requested: String,
}

/// Response for cancel and pause
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum StopResponse {
    /// Stored right away
    Applied(JobResponse),
    /// Left to the running execution
    Requested(StopRequestedResponse),
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map a queue error onto an HTTP status and JSON body.
pub fn error_response(err: QueueError) -> ApiError {
    let status = match &err {
        QueueError::NotFound(_) => StatusCode::NOT_FOUND,
        QueueError::UnknownPipeline(_) => StatusCode::BAD_REQUEST,
        QueueError::InvalidState { .. } => StatusCode::CONFLICT,
        QueueError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

fn bad_request(message: String) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse { error: message }),
    )
}

fn stop_response(
    id: String,
    requested: &str,
    outcome: StopOutcome,
) -> (StatusCode, Json<StopResponse>) {
    match outcome {
        StopOutcome::Signaled => (
            StatusCode::ACCEPTED,
            Json(StopResponse::Requested(StopRequestedResponse {
                id,
                requested: requested.to_string(),
            })),
        ),
        StopOutcome::Applied(job) => (
            StatusCode::OK,
            Json(StopResponse::Applied(JobResponse::from(job))),
        ),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a new job
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitJobBody>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), ApiError> {
    let input = match body.input {
        Value::Null => Value::Object(Default::default()),
        input => input,
    };
    let spec = JobSpec::new(body.pipeline, input).with_priority(body.priority.unwrap_or(0));

    let job = state.manager().submit(spec).map_err(error_response)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            id: job.id,
            status: job.status,
        }),
    ))
}

/// Get a job by ID
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.manager().get(&id).map_err(error_response)?;
    Ok(Json(JobResponse::from(job)))
}

/// List jobs with optional filters
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = JobFilter::new().with_limit(limit).with_offset(offset);

    if let Some(ref status) = params.status {
        let status: JobStatus = status.parse().map_err(bad_request)?;
        filter = filter.with_status(status);
    }

    if let Some(ref pipeline) = params.pipeline {
        filter = filter.with_pipeline(pipeline);
    }

    let jobs = state.manager().list(&filter).map_err(error_response)?;
    let total = state.manager().count(&filter).map_err(error_response)?;

    Ok(Json(ListJobsResponse {
        jobs: jobs.into_iter().map(JobResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

/// Cancel a job
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<StopResponse>), ApiError> {
    let outcome = state.manager().cancel(&id).map_err(error_response)?;
    Ok(stop_response(id, "cancel", outcome))
}

/// Pause a job, keeping finished stage outputs for resume
pub async fn pause_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<StopResponse>), ApiError> {
    let outcome = state.manager().pause(&id).map_err(error_response)?;
    Ok(stop_response(id, "pause", outcome))
}

/// Put a paused job back in the queue
pub async fn resume_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.manager().resume(&id).map_err(error_response)?;
    Ok(Json(JobResponse::from(job)))
}
