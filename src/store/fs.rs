// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::remote::ResultStream;
use crate::store::traits::PackageStore;

/// Stores packages as plain files under one directory
pub struct FsPackageStore {
    root: PathBuf,
}

impl FsPackageStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn write_stream(mut stream: ResultStream, path: &Path, cancel: &CancellationToken) -> anyhow::Result<u64> {
        let mut file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("Failed to create {}", path.display()))?;

        let mut written = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(anyhow::anyhow!("Package write cancelled")),
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl PackageStore for FsPackageStore {
    async fn persist(
        &self,
        stream: ResultStream,
        file_name: &str,
        cancel: &CancellationToken,
    ) -> anyhow::Result<PathBuf> {
        let file_name = crate::utils::sanitize_filename(file_name);
        if file_name.is_empty() {
            return Err(anyhow::anyhow!("Package file name is empty after sanitization"));
        }

        crate::utils::validate_path_within_base_new(Path::new(&file_name), &self.root)
            .context("Package destination would escape the packages directory")?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create packages directory {}", self.root.display()))?;

        let destination = self.root.join(&file_name);
        let partial = self.root.join(format!(".{}.{}.part", file_name, Uuid::new_v4()));

        let written = match Self::write_stream(stream, &partial, cancel).await {
            Ok(written) => written,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    warn!(error = %cleanup, path = %partial.display(), "Failed to clean up partial package");
                }
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&partial, &destination).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e).with_context(|| format!("Failed to move package into place at {}", destination.display()));
        }

        info!(path = %destination.display(), bytes = written, "Package stored");
        Ok(destination)
    }

    async fn remove(&self, path: &Path) -> anyhow::Result<()> {
        if !path.exists() {
            warn!(path = %path.display(), "Package file already gone");
            return Ok(());
        }

        crate::utils::validate_path_within_base(path, &self.root)
            .context("Refusing to delete a file outside the packages directory")?;

        tokio::fs::remove_file(path)
            .await
            .with_context(|| format!("Failed to delete {}", path.display()))?;

        info!(path = %path.display(), "Package file deleted");
        Ok(())
    }
}
