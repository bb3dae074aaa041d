// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::job::{JobRequest, JobStatus, OperationKind, RemoteJobHandle};
use crate::remote::error::RemoteError;
use crate::remote::traits::{RemoteExecutor, ResultStream};

/// Remote executor speaking the feature service's JSON job API
#[derive(Debug, Clone)]
pub struct HttpJobExecutor {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    request_timeout: Duration,
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    operation: OperationKind,
    parameters: &'a serde_json::Value,
    target: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct SubmitResponse {
    job_id: String,
}

impl HttpJobExecutor {
    pub fn new(base_url: &str, api_key: Option<String>) -> anyhow::Result<Self> {
        // Url::join drops the last segment unless the base ends with a slash
        let mut base_url = crate::utils::validate_url(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        // No client-wide timeout: result bodies can take longer than any fixed bound.
        // Job API calls carry their own `request_timeout`.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("OfflineSyncDaemon/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key,
            request_timeout: Duration::from_secs(30),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        self.base_url
            .join(path)
            .map_err(|e| RemoteError::Fatal(format!("Invalid endpoint path '{}': {}", path, e)))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key {
            Some(ref key) => request.header("Authorization", format!("Bearer {}", key)),
            None => request,
        }
    }

    /// The API key only goes to the service's own origin (scheme, host and port)
    fn authorize_for(&self, url: &Url, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if url.origin() == self.base_url.origin() {
            self.authorize(request)
        } else {
            debug!(url = %url, "Result locator is on another origin, sending it unauthenticated");
            request
        }
    }

    /// Locators are either absolute URLs or paths relative to the service
    fn resolve_locator(&self, locator: &str) -> Result<Url, RemoteError> {
        let url = match Url::parse(locator) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => self.endpoint(locator.trim_start_matches('/'))?,
            Err(e) => return Err(RemoteError::Fatal(format!("Invalid result locator '{}': {}", locator, e))),
        };

        crate::utils::validate_result_locator(&url, &self.base_url)
            .map_err(|e| RemoteError::Fatal(format!("Rejected result locator: {}", e)))?;
        Ok(url)
    }

    async fn open_result(&self, url: &Url) -> Result<reqwest::Response, RemoteError> {
        let response = self
            .authorize_for(url, self.client.get(url.clone()))
            .send()
            .await
            .map_err(|e| RemoteError::Transient(format!("Result download failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if is_retryable(status) {
            Err(RemoteError::Transient(format!("Result download returned {}", status)))
        } else {
            Err(RemoteError::Fatal(format!("Result download returned {}", status)))
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

#[async_trait]
impl RemoteExecutor for HttpJobExecutor {
    async fn submit(&self, request: &JobRequest) -> Result<RemoteJobHandle, RemoteError> {
        crate::package::params::validate_request(request).map_err(RemoteError::Submission)?;

        info!(operation = ?request.operation, "Submitting job to feature service");

        let body = SubmitRequest {
            operation: request.operation,
            parameters: &request.parameters,
            target: &request.target,
        };
        let response = self
            .authorize(self.client.post(self.endpoint("jobs")?))
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| RemoteError::Submission(format!("Feature service unreachable: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %text, "Job submission rejected");
            return Err(RemoteError::Submission(format!("{} - {}", status, text)));
        }

        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Submission(format!("Malformed submission response: {}", e)))?;

        info!(job_id = %submitted.job_id, "Job accepted by feature service");
        Ok(RemoteJobHandle::new(submitted.job_id))
    }

    async fn query_status(&self, handle: &RemoteJobHandle) -> Result<JobStatus, RemoteError> {
        let url = self.endpoint(&format!("jobs/{}", handle.job_id))?;
        let response = self
            .authorize(self.client.get(url))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| RemoteError::Transient(format!("Status query failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return if is_retryable(status) {
                Err(RemoteError::Transient(format!("{} - {}", status, text)))
            } else {
                Err(RemoteError::Fatal(format!("{} - {}", status, text)))
            };
        }

        let job_status: JobStatus = response
            .json()
            .await
            .map_err(|e| RemoteError::Fatal(format!("Malformed job status: {}", e)))?;

        debug!(job_id = %handle.job_id, phase = ?job_status.phase, "Queried job status");
        Ok(job_status)
    }

    /// Opens the result body once. Retrying a broken download, body included,
    /// is up to the caller.
    async fn fetch_result(&self, locator: &str) -> Result<ResultStream, RemoteError> {
        let url = self.resolve_locator(locator)?;
        let response = self.open_result(&url).await?;
        debug!(url = %url, length = ?response.content_length(), "Streaming job result");

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| RemoteError::Transient(format!("Result stream interrupted: {}", e))));
        Ok(stream.boxed())
    }
}
