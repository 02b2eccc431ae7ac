//! REST API client for the external renderer's HTTP endpoints.
//!
//! Wraps render creation, preview creation and status retrieval using
//! [`reqwest`].

use renderflow_core::render::{RenderRequest, RenderStatusReport};
use serde::Deserialize;

use crate::backend::SubmitResponse;

/// HTTP client for a single renderer deployment.
pub struct RenderApi {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

/// Errors from the renderer REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum RenderApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The renderer returned a non-2xx status code.
    #[error("Render API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

/// Status payload as returned by `GET /render/{id}`.
///
/// Some deployments omit the job id from the body, so it is filled in
/// from the path when missing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    #[serde(default)]
    job_id: Option<String>,
    #[serde(flatten)]
    rest: StatusFields,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusFields {
    status: renderflow_core::render::RenderStatus,
    #[serde(default)]
    progress: Option<u8>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    thumbnail_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl RenderApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `https://render.example.com/v1`.
    /// * `api_key` - Bearer token sent with every request, if any.
    pub fn new(api_url: String, api_key: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, api_key)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Queue a full-quality render. Sends `POST /render`.
    pub async fn submit_render(
        &self,
        request: &RenderRequest,
    ) -> Result<SubmitResponse, RenderApiError> {
        let response = self
            .authorized(self.client.post(format!("{}/render", self.api_url)))
            .json(request)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Queue a low-resolution preview. Sends `POST /render/preview`.
    pub async fn submit_preview(
        &self,
        request: &RenderRequest,
    ) -> Result<SubmitResponse, RenderApiError> {
        let response = self
            .authorized(self.client.post(format!("{}/render/preview", self.api_url)))
            .json(request)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Fetch the current status of a job. Sends `GET /render/{job_id}`.
    pub async fn get_status(&self, job_id: &str) -> Result<RenderStatusReport, RenderApiError> {
        let response = self
            .authorized(self.client.get(format!("{}/render/{}", self.api_url, job_id)))
            .send()
            .await?;

        let body: StatusBody = Self::parse_response(response).await?;
        Ok(RenderStatusReport {
            job_id: body.job_id.unwrap_or_else(|| job_id.to_string()),
            status: body.rest.status,
            progress: body.rest.progress,
            url: body.rest.url,
            thumbnail_url: body.rest.thumbnail_url,
            error: body.rest.error,
        })
    }

    // ---- private helpers ----

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`RenderApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, RenderApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(RenderApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RenderApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
