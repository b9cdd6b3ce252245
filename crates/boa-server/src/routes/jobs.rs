//! Job queue routes

use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use boa::db::models::{Job, JobStatus, JobType, JsonMap};
use boa::error::{BoaError, BoaResult};

use crate::state::AppState;

#[derive(Deserialize)]
pub struct EnqueueJobRequest {
    pub job_type: String,
    #[serde(default)]
    pub params: JsonMap,
    #[serde(default)]
    pub campaign_id: Option<String>,
}

#[derive(Deserialize)]
pub struct ListJobsParams {
    pub campaign_id: Option<String>,
    pub status: Option<String>,
    pub job_type: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

async fn enqueue_job(
    State(state): State<AppState>,
    Json(request): Json<EnqueueJobRequest>,
) -> BoaResult<(StatusCode, Json<Job>)> {
    let job_type = JobType::from_str(&request.job_type).map_err(BoaError::Validation)?;
    let job = state
        .job_queue()
        .enqueue(job_type, request.params, request.campaign_id)
        .await?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsParams>,
) -> BoaResult<Json<Vec<Job>>> {
    let status = params
        .status
        .as_deref()
        .map(JobStatus::from_str)
        .transpose()
        .map_err(BoaError::Validation)?;
    let job_type = params
        .job_type
        .as_deref()
        .map(JobType::from_str)
        .transpose()
        .map_err(BoaError::Validation)?;

    let jobs = state
        .job_queue()
        .list(
            params.campaign_id.as_deref(),
            status,
            job_type,
            params.limit,
            params.offset,
        )
        .await?;
    Ok(Json(jobs))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> BoaResult<Json<Job>> {
    Ok(Json(state.job_queue().get_or_fail(&id).await?))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> BoaResult<Json<Job>> {
    Ok(Json(state.job_queue().cancel(&id).await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs).post(enqueue_job))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
}
