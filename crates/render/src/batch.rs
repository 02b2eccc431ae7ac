//! Batch submission over templates x asset sets x output formats.

use std::collections::HashMap;

use renderflow_core::error::CoreError;
use renderflow_core::render::{OutputFormat, RenderRequest, RenderStatus};
use renderflow_core::types::JobId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::adapter::RenderAdapter;
use crate::waves::run_in_waves;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    #[validate(length(min = 1, message = "campaignId is required"))]
    pub campaign_id: String,
    #[validate(length(min = 1, message = "at least one template is required"))]
    pub templates: Vec<String>,
    /// Each entry is one set of slot modifications.
    #[validate(length(min = 1, message = "at least one asset set is required"))]
    pub asset_sets: Vec<HashMap<String, String>>,
    #[serde(default = "default_formats")]
    #[validate(length(min = 1, message = "at least one output format is required"))]
    pub output_formats: Vec<OutputFormat>,
}

fn default_formats() -> Vec<OutputFormat> {
    vec![OutputFormat::Mp4]
}

/// One entry of the fan-out. Failed submissions carry no job id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub status: RenderStatus,
    pub template_id: String,
    pub output_format: OutputFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub job_count: usize,
    pub jobs: Vec<BatchJob>,
}

impl BatchRequest {
    /// Size of the fan-out, or `None` if it overflows `usize`.
    pub fn job_count(&self) -> Option<usize> {
        self.templates
            .len()
            .checked_mul(self.asset_sets.len())?
            .checked_mul(self.output_formats.len())
    }

    /// Expand into one render request per template, asset set and format,
    /// in that nesting order.
    ///
    /// Rejects batches that expand past `max_jobs` entries.
    pub fn expand(&self, max_jobs: usize) -> Result<Vec<RenderRequest>, CoreError> {
        let count = self
            .job_count()
            .filter(|count| *count <= max_jobs)
            .ok_or_else(|| {
                CoreError::Validation(format!("batch expands past the limit of {max_jobs} jobs"))
            })?;

        let mut requests = Vec::with_capacity(count);
        for template_id in &self.templates {
            for assets in &self.asset_sets {
                for format in &self.output_formats {
                    requests.push(RenderRequest {
                        template_id: template_id.clone(),
                        modifications: assets.clone(),
                        output_format: *format,
                        campaign_id: Some(self.campaign_id.clone()),
                    });
                }
            }
        }
        Ok(requests)
    }
}

impl RenderAdapter {
    /// Submit every combination of the batch in waves of `wave_size`.
    ///
    /// A failed entry is reported in place and does not stop the batch.
    /// Nothing is submitted when the batch expands past `max_jobs`.
    pub async fn submit_batch(
        &self,
        batch: &BatchRequest,
        wave_size: usize,
        max_jobs: usize,
    ) -> Result<BatchResponse, CoreError> {
        let requests = batch.expand(max_jobs)?;
        tracing::info!(
            campaign_id = %batch.campaign_id,
            jobs = requests.len(),
            wave_size,
            "Submitting render batch",
        );

        let jobs = run_in_waves(requests, wave_size, |request| async move {
            match self.submit(&request).await {
                Ok(job_id) => BatchJob {
                    job_id: Some(job_id),
                    status: RenderStatus::Queued,
                    template_id: request.template_id,
                    output_format: request.output_format,
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(
                        template_id = %request.template_id,
                        error = %e,
                        "Batch entry submission failed",
                    );
                    BatchJob {
                        job_id: None,
                        status: RenderStatus::Failed,
                        template_id: request.template_id,
                        output_format: request.output_format,
                        error: Some(e.to_string()),
                    }
                }
            }
        })
        .await;

        Ok(BatchResponse {
            job_count: jobs.len(),
            jobs,
        })
    }
}
