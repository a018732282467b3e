//! Worker callbacks.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use clipledger_core::JobId;

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::handlers::jobs::JobResponse;
use crate::lifecycle::WorkerReport;
use crate::state::AppState;

/// Apply a worker's outcome report to a job.
pub async fn report_job(
    State(state): State<Arc<AppState>>,
    service: ServiceAuth,
    Path(job_id): Path<String>,
    Json(report): Json<WorkerReport>,
) -> Result<Json<JobResponse>, ApiError> {
    let job_id: JobId = job_id
        .parse()
        .map_err(|_| ApiError::NotFound(format!("job not found: {job_id}")))?;

    tracing::info!(
        job_id = %job_id,
        service = %service.service_name,
        report = ?report,
        "Worker report received"
    );

    let job = state.jobs.report(&job_id, &report).await?;

    Ok(Json(JobResponse::new(&job, state.objects.as_ref())))
}
