//! Health check endpoint handler

use axum::{extract::State, Json};
use chrono::Utc;

use crate::api::{models::HealthResponse, routes::AppState};

/// Handler for GET /health
pub async fn health(State(app_state): State<AppState>) -> Json<HealthResponse> {
    let workers = app_state.workers.list_workers(true).len();
    Json(HealthResponse {
        status: "ok".to_string(),
        name: app_state.config.server.name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        workers,
        uptime_secs: (Utc::now() - app_state.started_at).num_seconds(),
    })
}
