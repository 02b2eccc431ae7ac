//! Handlers for the `/combinations` resource.

use std::collections::HashMap;

use axum::extract::State;
use axum::Json;
use renderflow_core::combination::{self, Combination, GenerateOptions, Selection, Slot};
use renderflow_core::ranking::{self, RankedCombination};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[validate(length(min = 1, message = "at least one slot is required"))]
    pub slots: Vec<Slot>,
    #[serde(default)]
    pub selections: HashMap<String, Selection>,
    #[serde(default)]
    pub max_combinations: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub count: usize,
    pub combinations: Vec<Combination>,
}

#[derive(Debug, Deserialize)]
pub struct RankRequest {
    pub combinations: Vec<Combination>,
}

/// POST /api/v1/combinations/generate
///
/// Expand slots and selections into the cartesian product of candidates.
/// The requested cap is clamped to the server's `MAX_COMBINATIONS`, which
/// also applies when the request sets none.
pub async fn generate_combinations(
    State(state): State<AppState>,
    Json(input): Json<GenerateRequest>,
) -> AppResult<Json<DataResponse<GenerateResponse>>> {
    input.validate()?;
    let limit = state.config.max_combinations;
    let options = GenerateOptions {
        max_combinations: Some(input.max_combinations.map_or(limit, |cap| cap.min(limit))),
    };
    let combinations = combination::generate(&input.slots, &input.selections, &options);

    tracing::info!(
        slots = input.slots.len(),
        count = combinations.len(),
        "Combinations generated",
    );

    Ok(Json(DataResponse {
        data: GenerateResponse {
            count: combinations.len(),
            combinations,
        },
    }))
}

/// POST /api/v1/combinations/rank
///
/// Score combinations, highest first. Optimizer failures fall back to the
/// local heuristic and never surface as errors.
pub async fn rank_combinations(
    State(state): State<AppState>,
    Json(input): Json<RankRequest>,
) -> Json<DataResponse<Vec<RankedCombination>>> {
    let ranked = ranking::rank_combinations(state.ranker.as_deref(), &input.combinations).await;
    Json(DataResponse { data: ranked })
}
