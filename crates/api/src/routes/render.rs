use axum::routing::{get, post};
use axum::Router;

use crate::handlers::render;
use crate::state::AppState;

/// Routes mounted at `/render`.
///
/// ```text
/// POST   /                -> submit_render
/// POST   /preview         -> preview_render
/// POST   /batch           -> submit_batch
/// POST   /webhook         -> render_webhook
/// GET    /{job_id}        -> get_render_status
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(render::submit_render))
        .route("/preview", post(render::preview_render))
        .route("/batch", post(render::submit_batch))
        .route("/webhook", post(render::render_webhook))
        .route("/{job_id}", get(render::get_render_status))
}
