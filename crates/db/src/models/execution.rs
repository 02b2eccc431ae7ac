//! Render execution entity model.

use renderflow_core::types::Timestamp;
use serde::Serialize;
use sqlx::FromRow;

/// A row of the `render_executions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RenderExecution {
    pub id: i64,
    pub campaign_id: String,
    pub job_id: String,
    pub template_id: String,
    pub output_format: String,
    pub status: String,
    pub result_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
