//! Handlers for the `/render` resource.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use renderflow_core::render::{RenderRequest, RenderStatus, RenderStatusReport};
use renderflow_core::types::JobId;
use renderflow_render::batch::BatchRequest;
use renderflow_render::TransitionOutcome;
use serde::Serialize;
use validator::Validate;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRenderResponse {
    pub job_id: JobId,
    pub status: RenderStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub received: bool,
    /// Whether the report changed the tracked job.
    pub applied: bool,
    /// Whether a matching execution record existed, when one was written.
    pub record_found: Option<bool>,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/render
///
/// Submit one render. Returns 202 with the backend job id; progress is
/// pushed over the realtime channel.
pub async fn submit_render(
    State(state): State<AppState>,
    Json(input): Json<RenderRequest>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let job_id = state.adapter.submit(&input).await?;
    let status = state
        .adapter
        .snapshot(&job_id)
        .map(|s| s.status)
        .unwrap_or(RenderStatus::Queued);

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: SubmitRenderResponse { job_id, status },
        }),
    ))
}

/// POST /api/v1/render/preview
///
/// Lower-fidelity render. Completes immediately when the backend renders
/// previews synchronously.
pub async fn preview_render(
    State(state): State<AppState>,
    Json(input): Json<RenderRequest>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let snapshot = state.adapter.preview(&input).await?;

    tracing::info!(
        job_id = %snapshot.job_id,
        status = %snapshot.status,
        "Preview requested",
    );

    Ok(Json(DataResponse { data: snapshot }))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// GET /api/v1/render/{job_id}
pub async fn get_render_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<DataResponse<RenderStatusReport>>> {
    let report = state.adapter.status(&job_id).await?;
    Ok(Json(DataResponse { data: report }))
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// POST /api/v1/render/batch
///
/// Fan out over templates x asset sets x output formats. Individual
/// submission failures are reported in place; a fan-out larger than
/// `RENDER_BATCH_MAX_JOBS` is rejected with 400.
pub async fn submit_batch(
    State(state): State<AppState>,
    Json(input): Json<BatchRequest>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let render = &state.config.render;
    let response = state
        .adapter
        .submit_batch(&input, render.batch_wave_size, render.batch_max_jobs)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: response })))
}

// ---------------------------------------------------------------------------
// Webhook
// ---------------------------------------------------------------------------

/// POST /api/v1/render/webhook
///
/// Status push from the renderer. Always answers 200 so the renderer does
/// not retry reports for jobs this server no longer knows about.
pub async fn render_webhook(
    State(state): State<AppState>,
    Json(report): Json<RenderStatusReport>,
) -> Json<DataResponse<WebhookResponse>> {
    let outcome = state.adapter.handle_webhook(report).await;

    Json(DataResponse {
        data: WebhookResponse {
            received: true,
            applied: matches!(outcome.transition, TransitionOutcome::Applied(_)),
            record_found: outcome.record_found,
        },
    })
}
