//! Synthetic backend used when no renderer is configured.
//!
//! Every job starts `queued`; the first status fetch reports `processing`
//! at 50%, the second reports `completed` with placeholder URLs and
//! forgets the job. Previews complete synchronously.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use renderflow_core::render::{RenderRequest, RenderStatus, RenderStatusReport};

use super::{BackendError, RenderBackend, SubmitResponse};

const PLACEHOLDER_HOST: &str = "https://placeholder.renderflow.local";

struct OfflineJob {
    extension: &'static str,
    fetches: u32,
}

#[derive(Default)]
pub struct OfflineBackend {
    jobs: Mutex<HashMap<String, OfflineJob>>,
}

impl OfflineBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn result_urls(job_id: &str, extension: &str) -> (String, String) {
        (
            format!("{PLACEHOLDER_HOST}/renders/{job_id}.{extension}"),
            format!("{PLACEHOLDER_HOST}/thumbnails/{job_id}.jpg"),
        )
    }
}

#[async_trait::async_trait]
impl RenderBackend for OfflineBackend {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn submit(&self, request: &RenderRequest) -> Result<SubmitResponse, BackendError> {
        let job_id = format!("offline-{}", uuid::Uuid::new_v4());
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                job_id.clone(),
                OfflineJob {
                    extension: request.output_format.extension(),
                    fetches: 0,
                },
            );

        Ok(SubmitResponse {
            job_id,
            status: RenderStatus::Queued,
            url: None,
            thumbnail_url: None,
        })
    }

    async fn preview(&self, request: &RenderRequest) -> Result<SubmitResponse, BackendError> {
        let job_id = format!("offline-preview-{}", uuid::Uuid::new_v4());
        let (url, thumbnail_url) = Self::result_urls(&job_id, request.output_format.extension());
        Ok(SubmitResponse {
            job_id,
            status: RenderStatus::Completed,
            url: Some(url),
            thumbnail_url: Some(thumbnail_url),
        })
    }

    async fn fetch_status(&self, job_id: &str) -> Result<RenderStatusReport, BackendError> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| BackendError::UnknownJob(job_id.to_string()))?;
        job.fetches += 1;

        let report = if job.fetches == 1 {
            RenderStatusReport {
                job_id: job_id.to_string(),
                status: RenderStatus::Processing,
                progress: Some(50),
                url: None,
                thumbnail_url: None,
                error: None,
            }
        } else {
            let (url, thumbnail_url) = Self::result_urls(job_id, job.extension);
            jobs.remove(job_id);
            RenderStatusReport {
                job_id: job_id.to_string(),
                status: RenderStatus::Completed,
                progress: Some(100),
                url: Some(url),
                thumbnail_url: Some(thumbnail_url),
                error: None,
            }
        };
        Ok(report)
    }
}
