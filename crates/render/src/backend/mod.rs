//! Swappable rendering backends.
//!
//! [`RenderBackend`] is the seam between the adapter's job tracking and
//! whatever actually produces renders. [`LiveBackend`] talks to the real
//! renderer over HTTP; [`OfflineBackend`] synthesises deterministic
//! progressions so dependent components run without one.

mod live;
mod offline;

pub use live::LiveBackend;
pub use offline::OfflineBackend;

use renderflow_core::render::{RenderRequest, RenderStatus, RenderStatusReport};
use renderflow_core::types::JobId;
use serde::{Deserialize, Serialize};

use crate::api::RenderApiError;

/// Acknowledgement for a creation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: RenderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl SubmitResponse {
    /// The acknowledgement expressed as a status report.
    pub fn as_report(&self) -> RenderStatusReport {
        RenderStatusReport {
            job_id: self.job_id.clone(),
            status: self.status,
            progress: None,
            url: self.url.clone(),
            thumbnail_url: self.thumbnail_url.clone(),
            error: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Api(#[from] RenderApiError),

    #[error("Backend does not know job {0}")]
    UnknownJob(JobId),

    #[error("Backend rejected the request: {0}")]
    Rejected(String),
}

/// A rendering backend.
#[async_trait::async_trait]
pub trait RenderBackend: Send + Sync {
    /// Short name for logs and the health endpoint.
    fn name(&self) -> &'static str;

    async fn submit(&self, request: &RenderRequest) -> Result<SubmitResponse, BackendError>;

    async fn preview(&self, request: &RenderRequest) -> Result<SubmitResponse, BackendError>;

    async fn fetch_status(&self, job_id: &str) -> Result<RenderStatusReport, BackendError>;
}
