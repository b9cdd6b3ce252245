//! Process routes

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use boa::db::models::{JsonMap, Process};
use boa::error::BoaResult;
use boa::spec::loader::load_process_spec;

use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateProcessRequest {
    pub spec_yaml: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: JsonMap,
}

#[derive(Deserialize)]
pub struct ListProcessesParams {
    pub name: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Deserialize)]
pub struct UpdateProcessRequest {
    pub description: Option<String>,
    pub metadata: Option<JsonMap>,
}

fn default_limit() -> i64 {
    100
}

/// Create a process from a YAML specification. The spec name determines
/// the process name; re-posting a name creates the next version and
/// deactivates the previous one.
async fn create_process(
    State(state): State<AppState>,
    Json(request): Json<CreateProcessRequest>,
) -> BoaResult<(StatusCode, Json<Process>)> {
    let spec = load_process_spec(&request.spec_yaml, true)?;

    let repos = state.repos();
    let version = repos.processes.next_version(&spec.name).await?;

    let mut process = Process::new(
        spec.name.clone(),
        request.spec_yaml,
        serde_json::to_value(&spec)?,
        version,
    );
    process.description = request.description.or_else(|| spec.description.clone());
    process.metadata = request.metadata;

    let process = repos.processes.create(process).await?;
    Ok((StatusCode::CREATED, Json(process)))
}

async fn list_processes(
    State(state): State<AppState>,
    Query(params): Query<ListProcessesParams>,
) -> BoaResult<Json<Vec<Process>>> {
    let processes = state
        .repos()
        .processes
        .list(params.name.as_deref(), params.limit, params.offset)
        .await?;
    Ok(Json(processes))
}

async fn get_process(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> BoaResult<Json<Process>> {
    let process = state.repos().processes.get_or_fail(&id).await?;
    Ok(Json(process))
}

async fn update_process(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateProcessRequest>,
) -> BoaResult<Json<Process>> {
    let repos = state.repos();
    let mut process = repos.processes.get_or_fail(&id).await?;

    if let Some(description) = request.description {
        process.description = Some(description);
    }
    if let Some(metadata) = request.metadata {
        process.metadata = metadata;
    }
    repos.processes.update(&process).await?;

    let process = repos.processes.get_or_fail(&id).await?;
    Ok(Json(process))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/processes", get(list_processes).post(create_process))
        .route("/processes/{id}", get(get_process).put(update_process))
}
