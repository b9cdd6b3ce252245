//! HTTP routes over the campaign operations

pub mod campaigns;
pub mod jobs;
pub mod observations;
pub mod processes;
pub mod proposals;

use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Assemble the full router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(processes::router())
        .merge(campaigns::router())
        .merge(observations::router())
        .merge(proposals::router())
        .merge(jobs::router())
        .with_state(state)
}
