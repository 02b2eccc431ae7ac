use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                -> list_jobs
/// POST   /                -> enqueue_jobs
/// POST   /regenerate      -> regenerate_combination
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::enqueue_jobs))
        .route("/regenerate", post(jobs::regenerate_combination))
}
