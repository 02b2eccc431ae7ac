//! Contract for the durable campaign-execution record.
//!
//! The render adapter writes to the store opportunistically: a failing or
//! unavailable store is logged and never fails the render itself.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::render::{OutputFormat, RenderStatus};
use crate::types::{JobId, Timestamp};

/// A render was accepted by the backend on behalf of a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSubmission {
    pub campaign_id: String,
    pub job_id: JobId,
    pub template_id: String,
    pub output_format: OutputFormat,
}

/// Terminal result of a render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub job_id: JobId,
    pub status: RenderStatus,
    pub result_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub error: Option<String>,
}

/// A stored execution row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub campaign_id: String,
    pub job_id: JobId,
    pub template_id: String,
    pub output_format: OutputFormat,
    pub status: RenderStatus,
    pub result_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub error: Option<String>,
    pub updated_at: Timestamp,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Execution store unavailable: {0}")]
    Unavailable(String),

    #[error("Execution store query failed: {0}")]
    Query(String),
}

/// Durable record of campaign executions.
#[async_trait::async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Record a freshly submitted render.
    async fn record_submission(&self, submission: &ExecutionSubmission) -> Result<(), StoreError>;

    /// Record a terminal outcome. Returns `false` when no execution row
    /// matches the job id.
    async fn record_outcome(&self, outcome: &ExecutionOutcome) -> Result<bool, StoreError>;
}

/// Process-local store used in offline mode and tests.
#[derive(Default)]
pub struct InMemoryExecutionStore {
    records: Mutex<HashMap<JobId, ExecutionRecord>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, job_id: &str) -> Option<ExecutionRecord> {
        self.records
            .lock()
            .ok()
            .and_then(|records| records.get(job_id).cloned())
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn record_submission(&self, submission: &ExecutionSubmission) -> Result<(), StoreError> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        records.insert(
            submission.job_id.clone(),
            ExecutionRecord {
                campaign_id: submission.campaign_id.clone(),
                job_id: submission.job_id.clone(),
                template_id: submission.template_id.clone(),
                output_format: submission.output_format,
                status: RenderStatus::Queued,
                result_url: None,
                thumbnail_url: None,
                error: None,
                updated_at: chrono::Utc::now(),
            },
        );
        Ok(())
    }

    async fn record_outcome(&self, outcome: &ExecutionOutcome) -> Result<bool, StoreError> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let Some(record) = records.get_mut(&outcome.job_id) else {
            return Ok(false);
        };
        record.status = outcome.status;
        record.result_url = outcome.result_url.clone();
        record.thumbnail_url = outcome.thumbnail_url.clone();
        record.error = outcome.error.clone();
        record.updated_at = chrono::Utc::now();
        Ok(true)
    }
}
