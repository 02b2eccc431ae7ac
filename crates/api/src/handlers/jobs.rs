//! Handlers for the `/jobs` resource backed by the render scheduler.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use renderflow_core::combination::Combination;
use renderflow_core::render::{OutputFormat, Priority, RenderJob};
use renderflow_scheduler::JobTarget;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueJobsRequest {
    #[validate(length(min = 1, message = "at least one combination is required"))]
    pub combinations: Vec<Combination>,
    #[validate(length(min = 1, message = "templateId is required"))]
    pub template_id: String,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegenerateRequest {
    pub combination: Combination,
    #[validate(length(min = 1, message = "templateId is required"))]
    pub template_id: String,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub campaign_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueuedJobs {
    pub job_ids: Vec<String>,
}

fn target(template_id: String, output_format: OutputFormat, campaign_id: Option<String>) -> JobTarget {
    JobTarget {
        template_id,
        output_format,
        campaign_id,
    }
}

// ---------------------------------------------------------------------------
// Enqueue
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Queue one render job per combination. Returns 202 with the scheduler
/// job ids in request order.
pub async fn enqueue_jobs(
    State(state): State<AppState>,
    Json(input): Json<EnqueueJobsRequest>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let job_ids = state.scheduler.enqueue_many(
        &input.combinations,
        target(input.template_id, input.output_format, input.campaign_id),
        input.priority,
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: EnqueuedJobs { job_ids },
        }),
    ))
}

/// POST /api/v1/jobs/regenerate
///
/// Render one combination again at high priority, superseding any job
/// still running for it.
pub async fn regenerate_combination(
    State(state): State<AppState>,
    Json(input): Json<RegenerateRequest>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let job_id = state.scheduler.regenerate(
        &input.combination,
        target(input.template_id, input.output_format, input.campaign_id),
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: EnqueuedJobs {
                job_ids: vec![job_id],
            },
        }),
    ))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// Every job the scheduler tracks, in enqueue order.
pub async fn list_jobs(State(state): State<AppState>) -> Json<DataResponse<Vec<RenderJob>>> {
    Json(DataResponse {
        data: state.scheduler.list_jobs(),
    })
}
