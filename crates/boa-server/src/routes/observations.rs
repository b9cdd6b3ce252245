//! Observation routes

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use boa::db::models::{JsonMap, Observation};
use boa::error::BoaResult;

use crate::routes::campaigns::engine_for;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ObservationRequest {
    pub x: JsonMap,
    pub y: JsonMap,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct ObservationBatchRequest {
    pub observations: Vec<ObservationRequest>,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "user".to_string()
}

async fn add_observation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ObservationRequest>,
) -> BoaResult<(StatusCode, Json<Observation>)> {
    let engine = engine_for(&state, &id).await?;
    let observation = engine
        .add_observation(request.x, request.y, &request.source, request.observed_at)
        .await?;
    Ok((StatusCode::CREATED, Json(observation)))
}

async fn add_observations_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ObservationBatchRequest>,
) -> BoaResult<(StatusCode, Json<Vec<Observation>>)> {
    let engine = engine_for(&state, &id).await?;
    let observations = engine
        .add_observations_batch(
            request
                .observations
                .into_iter()
                .map(|obs| (obs.x, obs.y))
                .collect(),
            &request.source,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(observations)))
}

async fn list_observations(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> BoaResult<Json<Vec<Observation>>> {
    let repos = state.repos();
    repos.campaigns.get_or_fail(&id).await?;
    Ok(Json(repos.observations.list(&id).await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/campaigns/{id}/observations",
            get(list_observations).post(add_observation),
        )
        .route(
            "/campaigns/{id}/observations/batch",
            post(add_observations_batch),
        )
}
