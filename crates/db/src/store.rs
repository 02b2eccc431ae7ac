use renderflow_core::execution::{ExecutionOutcome, ExecutionStore, ExecutionSubmission, StoreError};

use crate::repositories::ExecutionRepo;
use crate::DbPool;

/// [`ExecutionStore`] backed by the `render_executions` table.
#[derive(Clone)]
pub struct PgExecutionStore {
    pool: DbPool,
}

impl PgExecutionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn record_submission(&self, submission: &ExecutionSubmission) -> Result<(), StoreError> {
        ExecutionRepo::upsert_submission(
            &self.pool,
            &submission.campaign_id,
            &submission.job_id,
            &submission.template_id,
            submission.output_format.extension(),
        )
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn record_outcome(&self, outcome: &ExecutionOutcome) -> Result<bool, StoreError> {
        let found = ExecutionRepo::mark_finished(
            &self.pool,
            &outcome.job_id,
            outcome.status.as_str(),
            outcome.result_url.as_deref(),
            outcome.thumbnail_url.as_deref(),
            outcome.error.as_deref(),
        )
        .await
        .map_err(map_sqlx)?;

        if !found {
            tracing::debug!(job_id = %outcome.job_id, "No execution record for finished job");
        }
        Ok(found)
    }
}

/// Pool exhaustion and I/O failures mean the store is unreachable;
/// everything else is a query problem.
fn map_sqlx(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}
