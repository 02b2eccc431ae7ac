//! Repository for the `render_executions` table.

use sqlx::PgPool;

use crate::models::execution::RenderExecution;

/// Column list for `render_executions` queries.
const COLUMNS: &str = "\
    id, campaign_id, job_id, template_id, output_format, status, \
    result_url, thumbnail_url, error_message, created_at, updated_at";

/// Provides query operations for render execution tracking.
pub struct ExecutionRepo;

impl ExecutionRepo {
    // ── Queries ──────────────────────────────────────────────────────

    /// Insert a new execution record, or refresh it if the job id is
    /// already known. Returns the stored row.
    pub async fn upsert_submission(
        pool: &PgPool,
        campaign_id: &str,
        job_id: &str,
        template_id: &str,
        output_format: &str,
    ) -> Result<RenderExecution, sqlx::Error> {
        let query = format!(
            "INSERT INTO render_executions (campaign_id, job_id, template_id, output_format) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (job_id) DO UPDATE \
             SET campaign_id = EXCLUDED.campaign_id, updated_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, RenderExecution>(&query)
            .bind(campaign_id)
            .bind(job_id)
            .bind(template_id)
            .bind(output_format)
            .fetch_one(pool)
            .await
    }

    // ── Status transitions ───────────────────────────────────────────

    /// Record a terminal outcome. Returns `true` if a row was updated.
    pub async fn mark_finished(
        pool: &PgPool,
        job_id: &str,
        status: &str,
        result_url: Option<&str>,
        thumbnail_url: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE render_executions \
             SET status = $2, result_url = $3, thumbnail_url = $4, \
                 error_message = $5, updated_at = NOW() \
             WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(status)
        .bind(result_url)
        .bind(thumbnail_url)
        .bind(error_message)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
