// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::remote::ResultStream;

#[async_trait]
pub trait PackageStore: Send + Sync {
    /// Write a result stream to `file_name`, replacing any previous file atomically.
    /// Returns the final path. A cancelled write leaves no partial file and
    /// keeps the previous file.
    async fn persist(&self, stream: ResultStream, file_name: &str, cancel: &CancellationToken)
        -> anyhow::Result<PathBuf>;

    /// Delete a stored file. Paths outside the store are refused.
    async fn remove(&self, path: &Path) -> anyhow::Result<()>;
}
