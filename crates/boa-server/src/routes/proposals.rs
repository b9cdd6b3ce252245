//! Proposal, iteration and decision routes

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use boa::core::executor::ExecutionResult;
use boa::core::ledger::PendingCandidate;
use boa::db::models::{AcceptedCandidates, Iteration, Proposal};
use boa::error::{BoaError, BoaResult};
use boa::spec::encoder::RawPoint;

use crate::routes::campaigns::engine_for;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct InitialDesignRequest {
    pub n_samples: usize,
    #[serde(default)]
    pub strategy: Option<String>,
}

#[derive(Deserialize)]
pub struct ProposeRequest {
    #[serde(default = "default_candidates")]
    pub n_candidates: usize,
    #[serde(default)]
    pub strategies: Option<Vec<String>>,
    #[serde(default)]
    pub ref_point: Option<Vec<f64>>,
}

#[derive(Deserialize)]
pub struct DecisionRequest {
    pub accepted: Vec<AcceptedCandidates>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_candidates() -> usize {
    1
}

/// Candidates of one strategy run, projected for API responses
#[derive(Serialize)]
pub struct ProposalResponse {
    pub strategy_name: String,
    pub candidates: Vec<RawPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acq_values: Option<Vec<f64>>,
}

impl From<&ExecutionResult> for ProposalResponse {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            strategy_name: result.strategy_name.clone(),
            candidates: result.candidates_raw.clone(),
            acq_values: result.acq_values.clone(),
        }
    }
}

async fn initial_design(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<InitialDesignRequest>,
) -> BoaResult<(StatusCode, Json<ProposalResponse>)> {
    let engine = engine_for(&state, &id).await?;
    let result = engine
        .initial_design(request.n_samples, request.strategy.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(ProposalResponse::from(&result))))
}

async fn propose(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ProposeRequest>,
) -> BoaResult<(StatusCode, Json<Vec<ProposalResponse>>)> {
    let engine = engine_for(&state, &id).await?;
    let ref_point = request.ref_point.map(ndarray::Array1::from_vec);
    let results = engine
        .optimization_iteration(
            request.n_candidates,
            request.strategies.as_deref(),
            ref_point.as_ref(),
        )
        .await?;
    let responses: Vec<ProposalResponse> =
        results.values().map(ProposalResponse::from).collect();
    Ok((StatusCode::CREATED, Json(responses)))
}

async fn list_iterations(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> BoaResult<Json<Vec<Iteration>>> {
    let engine = engine_for(&state, &id).await?;
    Ok(Json(engine.iterations().await?))
}

async fn iteration_proposals(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, i64)>,
) -> BoaResult<Json<Vec<Proposal>>> {
    let engine = engine_for(&state, &id).await?;
    Ok(Json(engine.iteration_proposals(index).await?))
}

/// Record the decision for an iteration. Decisions close the current
/// iteration to acceptance, so only the latest iteration is addressable.
async fn record_decision(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, i64)>,
    Json(request): Json<DecisionRequest>,
) -> BoaResult<StatusCode> {
    let engine = engine_for(&state, &id).await?;

    let current = engine
        .iterations()
        .await?
        .last()
        .map(|it| it.index)
        .ok_or_else(|| BoaError::Validation("No current iteration".to_string()))?;
    if index != current {
        return Err(BoaError::Validation(format!(
            "Decisions may only target the current iteration ({}), got {}",
            current, index
        )));
    }

    engine
        .accept_candidates(request.accepted, request.notes)
        .await?;
    Ok(StatusCode::CREATED)
}

async fn pending_candidates(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> BoaResult<Json<Vec<PendingCandidate>>> {
    let engine = engine_for(&state, &id).await?;
    Ok(Json(engine.pending_candidates().await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/campaigns/{id}/initial-design", post(initial_design))
        .route("/campaigns/{id}/propose", post(propose))
        .route("/campaigns/{id}/iterations", get(list_iterations))
        .route(
            "/campaigns/{id}/iterations/{index}/proposals",
            get(iteration_proposals),
        )
        .route(
            "/campaigns/{id}/iterations/{index}/decision",
            post(record_decision),
        )
        .route("/campaigns/{id}/pending", get(pending_candidates))
}
