use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// `live` or `offline`.
    pub render_backend: &'static str,
    /// Whether the execution database is reachable; `None` without one.
    pub db_healthy: Option<bool>,
    pub ws_connections: usize,
    pub active_jobs: usize,
}

/// GET /health -- returns service, backend and database health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = match &state.pool {
        Some(pool) => Some(renderflow_db::health_check(pool).await.is_ok()),
        None => None,
    };

    let status = if db_healthy == Some(false) {
        "degraded"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        render_backend: state.adapter.backend_name(),
        db_healthy,
        ws_connections: state.ws_manager.connection_count().await,
        active_jobs: state.adapter.active_job_count(),
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
