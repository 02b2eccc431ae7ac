pub mod combinations;
pub mod health;
pub mod jobs;
pub mod render;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /render                      submit (POST)
/// /render/preview              preview (POST)
/// /render/batch                batch submit (POST)
/// /render/webhook              renderer status push (POST)
/// /render/{job_id}             status (GET)
///
/// /combinations/generate       expand slots into combinations (POST)
/// /combinations/rank           score combinations (POST)
///
/// /jobs                        list (GET), enqueue (POST)
/// /jobs/regenerate             regenerate one combination (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/render", render::router())
        .nest("/combinations", combinations::router())
        .nest("/jobs", jobs::router())
}
