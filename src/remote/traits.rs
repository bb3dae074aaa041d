// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::job::{JobRequest, JobStatus, RemoteJobHandle};
use crate::remote::error::RemoteError;

/// Streamed body of a job result
pub type ResultStream = BoxStream<'static, Result<Bytes, RemoteError>>;

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Hand a job to the remote side. Nothing is started when this fails.
    async fn submit(&self, request: &JobRequest) -> Result<RemoteJobHandle, RemoteError>;

    /// Current status of a submitted job
    async fn query_status(&self, handle: &RemoteJobHandle) -> Result<JobStatus, RemoteError>;

    /// Open the result payload a completed job points at
    async fn fetch_result(&self, locator: &str) -> Result<ResultStream, RemoteError>;
}
