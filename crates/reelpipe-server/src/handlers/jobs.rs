//! Job submission, status and cancellation handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use reelpipe_models::{JobId, JobRecord, JobSpec};

use crate::error::ApiResult;
use crate::state::AppState;

/// Job submission request body.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub source_url: String,
    pub format: String,
}

/// Job submission response.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
}

/// Submit a new job.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let job_id = state
        .pipeline
        .submit(JobSpec::new(req.source_url, req.format))
        .await?;

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id })))
}

/// Get a job's current record.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> ApiResult<Json<JobRecord>> {
    let record = state.pipeline.status(job_id).await?;
    Ok(Json(record))
}

/// Cancel a job.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> ApiResult<StatusCode> {
    state.pipeline.cancel(job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
