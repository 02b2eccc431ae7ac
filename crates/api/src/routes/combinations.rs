use axum::routing::post;
use axum::Router;

use crate::handlers::combinations;
use crate::state::AppState;

/// Routes mounted at `/combinations`.
///
/// ```text
/// POST   /generate        -> generate_combinations
/// POST   /rank            -> rank_combinations
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/generate", post(combinations::generate_combinations))
        .route("/rank", post(combinations::rank_combinations))
}
