// SPDX-License-Identifier: GPL-3.0-only
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::job::{CompletionSink, JobOutcome, JobResult, Slot};
use crate::registry::{PackageEntry, Registry};
use crate::remote::{RemoteError, RemoteExecutor};
use crate::store::PackageStore;

pub(crate) const DEFAULT_PACKAGE_NAME: &str = "offline_package";
const PACKAGE_EXTENSION: &str = "geodatabase";

/// What happened after a job finished, for whoever drives the daemon
#[derive(Debug, Clone, PartialEq)]
pub enum SinkReport {
    PackageStored(PackageEntry),
    PackageSynced { package_id: String },
    JobFailed { slot: Slot, detail: String },
    JobCancelled { slot: Slot },
    /// The remote job succeeded but local follow-up work did not
    FollowUpFailed { slot: Slot, error: String },
    /// Local follow-up work was cancelled before it finished
    FollowUpCancelled { slot: Slot },
}

/// How a broken package download is started over
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadRetry {
    pub max_attempts: u32,
    /// Wait after the first failed attempt, doubled after each further one
    pub base_delay: Duration,
}

impl Default for DownloadRetry {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_secs(2) }
    }
}

impl DownloadRetry {
    fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2_u32.pow(attempt.saturating_sub(1))
    }
}

fn is_retryable(e: &anyhow::Error) -> bool {
    e.downcast_ref::<RemoteError>().is_some_and(|remote| remote.is_transient())
}

/// File name a package called `name` is stored under
pub fn package_file_name(name: &str) -> String {
    let stem = crate::utils::sanitize_package_name(name).unwrap_or_else(|e| {
        warn!(name = %name, error = %e, "Unusable package name, using default");
        DEFAULT_PACKAGE_NAME.to_string()
    });
    format!("{}.{}", stem, PACKAGE_EXTENSION)
}

fn report(reports: &mpsc::UnboundedSender<SinkReport>, report: SinkReport) {
    if reports.send(report).is_err() {
        warn!("Sink report dropped, nobody is listening");
    }
}

fn report_unsuccessful(reports: &mpsc::UnboundedSender<SinkReport>, slot: Slot, outcome: JobOutcome) {
    match outcome {
        JobOutcome::Failed(detail) => report(reports, SinkReport::JobFailed { slot, detail }),
        JobOutcome::Cancelled => report(reports, SinkReport::JobCancelled { slot }),
        JobOutcome::Succeeded(_) => {}
    }
}

/// Downloads a generated package into the store and registers it
pub struct PackageDownloadSink {
    pub executor: Arc<dyn RemoteExecutor>,
    pub store: Arc<dyn PackageStore>,
    pub registry: Arc<dyn Registry>,
    pub name: String,
    pub service_url: String,
    pub reports: mpsc::UnboundedSender<SinkReport>,
    /// Stops the download; fired by cancelling the download slot
    pub cancel: CancellationToken,
    pub retry: DownloadRetry,
    pub tasks: TaskTracker,
}

impl PackageDownloadSink {
    async fn download(self, result: JobResult) {
        match self.store_package(&result).await {
            Ok(entry) => {
                info!(package_id = %entry.id, path = %entry.local_path, "Package registered");
                report(&self.reports, SinkReport::PackageStored(entry));
            }
            Err(_) if self.cancel.is_cancelled() => {
                info!(job_id = %result.job_id, "Package download cancelled");
                report(&self.reports, SinkReport::FollowUpCancelled { slot: Slot::Download });
            }
            Err(e) => {
                error!(job_id = %result.job_id, error = %format!("{:#}", e), "Failed to store generated package");
                report(
                    &self.reports,
                    SinkReport::FollowUpFailed { slot: Slot::Download, error: format!("{:#}", e) },
                );
            }
        }
    }

    async fn store_package(&self, result: &JobResult) -> anyhow::Result<PackageEntry> {
        let locator = result
            .result_locator
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Job {} completed without a result locator", result.job_id))?;

        let path = self.download_with_retry(locator, &package_file_name(&self.name)).await?;
        let checksum = crate::utils::calculate_file_md5(&path).await?;
        let local_path = path.to_string_lossy().to_string();

        // Regenerating into an existing file refreshes its entry
        match self.registry.find_by_local_path(&local_path).await? {
            Some(mut existing) => {
                existing.name = self.name.clone();
                existing.service_url = self.service_url.clone();
                existing.created_at = Utc::now();
                existing.last_synced_at = None;
                existing.checksum = Some(checksum);
                existing.checksum_kind = Some("md5".to_string());
                self.registry.update_package(existing.clone()).await?;
                Ok(existing)
            }
            None => {
                let entry = PackageEntry::new(self.name.clone(), self.service_url.clone(), local_path)
                    .with_md5(checksum);
                self.registry.add_package(entry.clone()).await?;
                Ok(entry)
            }
        }
    }

    /// Fetch and persist the result, starting over from the first byte after a transient failure
    async fn download_with_retry(&self, locator: &str, file_name: &str) -> anyhow::Result<PathBuf> {
        let mut last_error = None;

        for attempt in 1..=self.retry.max_attempts {
            match self.download_once(locator, file_name).await {
                Ok(path) => {
                    if attempt > 1 {
                        info!(locator = %locator, attempt, "Package download succeeded after retry");
                    }
                    return Ok(path);
                }
                Err(e) if self.cancel.is_cancelled() || !is_retryable(&e) => return Err(e),
                Err(e) => {
                    warn!(locator = %locator, attempt, error = %format!("{:#}", e), "Package download attempt failed");
                    last_error = Some(e);
                    if attempt < self.retry.max_attempts {
                        tokio::select! {
                            _ = self.cancel.cancelled() => return Err(anyhow::anyhow!("Package download cancelled")),
                            _ = tokio::time::sleep(self.retry.delay_after(attempt)) => {}
                        }
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            anyhow::anyhow!("Package download failed after {} attempts", self.retry.max_attempts)
        }))
    }

    async fn download_once(&self, locator: &str, file_name: &str) -> anyhow::Result<PathBuf> {
        let stream = tokio::select! {
            _ = self.cancel.cancelled() => return Err(anyhow::anyhow!("Package download cancelled")),
            stream = self.executor.fetch_result(locator) => stream?,
        };
        self.store.persist(stream, file_name, &self.cancel).await
    }
}

impl CompletionSink for PackageDownloadSink {
    fn complete(self: Box<Self>, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Succeeded(result) => {
                let tasks = self.tasks.clone();
                tasks.spawn(self.download(result));
            }
            other => report_unsuccessful(&self.reports, Slot::Download, other),
        }
    }
}

/// Records a finished synchronization on the package entry
pub struct SyncCompleteSink {
    pub registry: Arc<dyn Registry>,
    pub package_id: String,
    pub reports: mpsc::UnboundedSender<SinkReport>,
    pub tasks: TaskTracker,
}

impl SyncCompleteSink {
    async fn record(self) {
        match self.registry.mark_synced(&self.package_id, Utc::now()).await {
            Ok(true) => {
                info!(package_id = %self.package_id, "Package synchronized");
                report(&self.reports, SinkReport::PackageSynced { package_id: self.package_id });
            }
            Ok(false) => {
                warn!(package_id = %self.package_id, "Synchronized package is no longer registered");
                report(
                    &self.reports,
                    SinkReport::FollowUpFailed {
                        slot: Slot::Sync,
                        error: format!("Package {} is no longer registered", self.package_id),
                    },
                );
            }
            Err(e) => {
                error!(package_id = %self.package_id, error = %e, "Failed to record synchronization");
                report(&self.reports, SinkReport::FollowUpFailed { slot: Slot::Sync, error: e.to_string() });
            }
        }
    }
}

impl CompletionSink for SyncCompleteSink {
    fn complete(self: Box<Self>, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Succeeded(_) => {
                let tasks = self.tasks.clone();
                tasks.spawn(self.record());
            }
            other => report_unsuccessful(&self.reports, Slot::Sync, other),
        }
    }
}
