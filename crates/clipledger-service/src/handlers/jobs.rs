//! Job handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use clipledger_core::{Job, JobId, JobStatus, Quality};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::objects::ObjectStore;
use crate::state::AppState;

/// Create job request.
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    /// Processing mode (default: `lama`).
    #[serde(default)]
    pub quality: Quality,
    /// Key of an object previously uploaded by the caller.
    pub input_key: String,
}

/// Job response.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    /// Job ID.
    pub id: String,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Processing mode.
    pub quality: Quality,
    /// Credits reserved.
    pub cost: i64,
    /// Input object key.
    pub input_key: String,
    /// Public URL of the input.
    pub input_url: String,
    /// Public URL of the output, once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    /// Why the job failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

impl JobResponse {
    /// Render `job`, resolving object URLs through `objects`.
    pub fn new(job: &Job, objects: &dyn ObjectStore) -> Self {
        Self {
            id: job.id.to_string(),
            status: job.status,
            quality: job.quality,
            cost: job.cost,
            input_key: job.input_key.clone(),
            input_url: objects.public_url(&job.input_key),
            output_url: (job.status == JobStatus::Completed)
                .then(|| objects.public_url(&job.output_key)),
            failure_reason: job.failure_reason.clone(),
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
        }
    }
}

/// Reserve credits and submit a job.
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CreateJobRequest>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state
        .jobs
        .create(&auth.user_id, &body.input_key, body.quality)
        .await?;

    Ok(Json(JobResponse::new(&job, state.objects.as_ref())))
}

/// Get one of the caller's jobs, reconciling it first.
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job_id: JobId = job_id
        .parse()
        .map_err(|_| ApiError::NotFound(format!("job not found: {job_id}")))?;

    let job = state.jobs.status(&auth.user_id, &job_id).await?;

    Ok(Json(JobResponse::new(&job, state.objects.as_ref())))
}

/// Job list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    /// Maximum number of jobs to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// List jobs response.
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    /// Jobs (newest first).
    pub jobs: Vec<JobResponse>,
    /// Whether there are more jobs.
    pub has_more: bool,
}

/// List the caller's jobs.
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    // Fetch one more than requested to determine has_more
    let limit = query.limit.min(100);
    let jobs = state
        .jobs
        .list(&auth.user_id, limit + 1, query.offset)
        .await?;

    let has_more = jobs.len() > limit;
    let jobs = jobs
        .iter()
        .take(limit)
        .map(|job| JobResponse::new(job, state.objects.as_ref()))
        .collect();

    Ok(Json(ListJobsResponse { jobs, has_more }))
}
