use renderflow_core::render::{RenderRequest, RenderStatusReport};

use super::{BackendError, RenderBackend, SubmitResponse};
use crate::api::RenderApi;

/// The real renderer, reached over HTTP.
pub struct LiveBackend {
    api: RenderApi,
}

impl LiveBackend {
    pub fn new(api: RenderApi) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl RenderBackend for LiveBackend {
    fn name(&self) -> &'static str {
        "live"
    }

    async fn submit(&self, request: &RenderRequest) -> Result<SubmitResponse, BackendError> {
        Ok(self.api.submit_render(request).await?)
    }

    async fn preview(&self, request: &RenderRequest) -> Result<SubmitResponse, BackendError> {
        Ok(self.api.submit_preview(request).await?)
    }

    async fn fetch_status(&self, job_id: &str) -> Result<RenderStatusReport, BackendError> {
        Ok(self.api.get_status(job_id).await?)
    }
}
