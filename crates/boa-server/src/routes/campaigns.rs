//! Campaign routes: CRUD, lifecycle, metrics, export/import

use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use ndarray::Array1;
use serde::Deserialize;

use boa::bundle::{CampaignExporter, CampaignImporter, ExportBundle};
use boa::core::analyzer::ParetoPoint;
use boa::core::engine::CampaignEngine;
use boa::core::CampaignMetrics;
use boa::db::models::{Campaign, CampaignStatus, JsonMap};
use boa::error::{BoaError, BoaResult};

use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateCampaignRequest {
    pub process_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub strategy_config: JsonMap,
    #[serde(default)]
    pub metadata: JsonMap,
}

#[derive(Deserialize)]
pub struct ListCampaignsParams {
    pub process_id: Option<String>,
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Deserialize)]
pub struct UpdateCampaignRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub strategy_config: Option<JsonMap>,
    pub metadata: Option<JsonMap>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct MetricsParams {
    /// Comma-separated reference point, e.g. "0.0,5.0"
    pub ref_point: Option<String>,
}

fn default_limit() -> i64 {
    100
}

async fn create_campaign(
    State(state): State<AppState>,
    Json(request): Json<CreateCampaignRequest>,
) -> BoaResult<(StatusCode, Json<Campaign>)> {
    let repos = state.repos();
    // Verify the process exists before binding to it
    repos.processes.get_or_fail(&request.process_id).await?;

    let mut campaign = Campaign::new(request.process_id, request.name);
    campaign.description = request.description;
    campaign.strategy_config = request.strategy_config;
    campaign.metadata = request.metadata;

    let campaign = repos.campaigns.create(campaign).await?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

async fn list_campaigns(
    State(state): State<AppState>,
    Query(params): Query<ListCampaignsParams>,
) -> BoaResult<Json<Vec<Campaign>>> {
    let status = params
        .status
        .as_deref()
        .map(CampaignStatus::from_str)
        .transpose()
        .map_err(BoaError::Validation)?;

    let campaigns = state
        .repos()
        .campaigns
        .list(
            params.process_id.as_deref(),
            status,
            params.limit,
            params.offset,
        )
        .await?;
    Ok(Json(campaigns))
}

async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> BoaResult<Json<Campaign>> {
    let campaign = state.repos().campaigns.get_or_fail(&id).await?;
    Ok(Json(campaign))
}

async fn update_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateCampaignRequest>,
) -> BoaResult<Json<Campaign>> {
    let repos = state.repos();
    let mut campaign = repos.campaigns.get_or_fail(&id).await?;

    if let Some(name) = request.name {
        campaign.name = name;
    }
    if let Some(description) = request.description {
        campaign.description = Some(description);
    }
    if let Some(strategy_config) = request.strategy_config {
        campaign.strategy_config = strategy_config;
    }
    if let Some(metadata) = request.metadata {
        campaign.metadata = metadata;
    }
    repos.campaigns.update(&campaign).await?;

    if let Some(status) = request.status {
        let status = CampaignStatus::from_str(&status).map_err(BoaError::Validation)?;
        repos.campaigns.update_status(&id, status).await?;
    }

    let campaign = repos.campaigns.get_or_fail(&id).await?;
    Ok(Json(campaign))
}

pub(crate) async fn engine_for(state: &AppState, campaign_id: &str) -> BoaResult<CampaignEngine> {
    CampaignEngine::new(
        state.pool.clone(),
        campaign_id,
        Some(state.config.checkpoint_dir.clone()),
    )
    .await
    .map(|engine| engine.with_lock_ttl(state.config.lock_ttl_secs as f64))
}

async fn pause_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> BoaResult<Json<Campaign>> {
    let engine = engine_for(&state, &id).await?;
    Ok(Json(engine.pause().await?))
}

async fn resume_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> BoaResult<Json<Campaign>> {
    let engine = engine_for(&state, &id).await?;
    Ok(Json(engine.resume().await?))
}

async fn complete_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> BoaResult<Json<Campaign>> {
    let engine = engine_for(&state, &id).await?;
    Ok(Json(engine.complete().await?))
}

fn parse_ref_point(raw: Option<&str>) -> BoaResult<Option<Array1<f64>>> {
    let Some(raw) = raw else { return Ok(None) };
    let values: Result<Vec<f64>, _> = raw.split(',').map(|v| v.trim().parse()).collect();
    let values =
        values.map_err(|_| BoaError::Validation(format!("Invalid reference point: {}", raw)))?;
    Ok(Some(Array1::from_vec(values)))
}

async fn campaign_metrics(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<MetricsParams>,
) -> BoaResult<Json<CampaignMetrics>> {
    let engine = engine_for(&state, &id).await?;
    let ref_point = parse_ref_point(params.ref_point.as_deref())?;
    Ok(Json(engine.analyze(ref_point).await?))
}

async fn pareto_front(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> BoaResult<Json<Vec<ParetoPoint>>> {
    let engine = engine_for(&state, &id).await?;
    Ok(Json(engine.pareto_front().await?))
}

async fn export_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> BoaResult<Json<ExportBundle>> {
    let exporter = CampaignExporter::new(state.repos());
    Ok(Json(exporter.export(&id).await?))
}

async fn import_campaign(
    State(state): State<AppState>,
    Json(bundle): Json<serde_json::Value>,
) -> BoaResult<Json<serde_json::Value>> {
    let importer = CampaignImporter::new(state.repos());
    let campaign_id = importer.import(&bundle).await?;
    Ok(Json(serde_json::json!({
        "campaign_id": campaign_id,
        "message": "Campaign imported successfully",
    })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/campaigns", get(list_campaigns).post(create_campaign))
        .route("/campaigns/import", post(import_campaign))
        .route("/campaigns/{id}", get(get_campaign).put(update_campaign))
        .route("/campaigns/{id}/pause", post(pause_campaign))
        .route("/campaigns/{id}/resume", post(resume_campaign))
        .route("/campaigns/{id}/complete", post(complete_campaign))
        .route("/campaigns/{id}/metrics", get(campaign_metrics))
        .route("/campaigns/{id}/pareto", get(pareto_front))
        .route("/campaigns/{id}/export", get(export_campaign))
}
