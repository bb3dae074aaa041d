// SPDX-License-Identifier: GPL-3.0-only
mod api;
mod config;
mod job;
mod logging;
mod package;
mod registry;
mod remote;
mod store;
mod utils;

#[cfg(test)]
mod test_helpers;

use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use api::HttpServer;
use config::Config;
use job::JobCoordinator;
use logging::setup_logging;
use package::{PackageService, SinkReport};
use registry::{Registry, SqliteRegistry};
use remote::{HttpJobExecutor, RemoteExecutor};
use store::{FsPackageStore, PackageStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    setup_logging(&config.log_level, config.log_json)?;

    info!("Starting OfflineSyncDaemon v{}", env!("CARGO_PKG_VERSION"));

    let packages_dir = config.packages_dir();
    tokio::fs::create_dir_all(&packages_dir).await?;

    // Initialize registry
    if let Some(parent) = config.registry_db_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let registry: Arc<dyn Registry> = Arc::new(SqliteRegistry::new(&config.registry_db_path).await?);
    info!("Registry initialized at {}", config.registry_db_path.display());

    // Remote executor and coordinator
    let executor: Arc<dyn RemoteExecutor> = Arc::new(HttpJobExecutor::new(
        &config.service_url,
        config.service_api_key.clone(),
    )?);
    let coordinator = Arc::new(JobCoordinator::new(Arc::clone(&executor), config.poll_policy()));
    info!(service_url = %config.service_url, "Remote job executor ready");
    let fs_store = FsPackageStore::new(packages_dir);
    info!("Packages stored in {}", fs_store.root().display());
    let store: Arc<dyn PackageStore> = Arc::new(fs_store);

    let (reports_tx, mut reports_rx) = mpsc::unbounded_channel();
    let service = Arc::new(
        PackageService::new(
            coordinator,
            executor,
            registry,
            store,
            reports_tx,
            config.service_url.clone(),
            config.generate_poll_interval(),
            config.sync_poll_interval(),
        )
        .with_download_retry(config.download_retry()),
    );

    let report_task = tokio::spawn(async move {
        while let Some(report) = reports_rx.recv().await {
            match report {
                SinkReport::PackageStored(entry) => {
                    info!(package_id = %entry.id, path = %entry.local_path, "Offline package ready")
                }
                SinkReport::PackageSynced { package_id } => info!(package_id = %package_id, "Offline package synchronized"),
                SinkReport::JobFailed { slot, detail } => warn!(%slot, error = %detail, "Job failed"),
                SinkReport::JobCancelled { slot } => info!(%slot, "Job cancelled"),
                SinkReport::FollowUpFailed { slot, error } => error!(%slot, error = %error, "Job follow-up failed"),
                SinkReport::FollowUpCancelled { slot } => info!(%slot, "Job follow-up cancelled"),
            }
        }
    });

    // Start HTTP server
    let http_server = HttpServer::new(Arc::clone(&service), config.local_api_bind);
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.serve().await {
            error!(error = %e, "HTTP server error");
        }
    });

    info!("All services started. Waiting for shutdown signal...");

    // Wait for shutdown signal
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal (Ctrl+C)");
        }
        Err(err) => {
            error!(error = %err, "Unable to listen for shutdown signal");
        }
    }

    // Graceful shutdown
    info!("Initiating graceful shutdown...");

    http_task.abort();
    service.shutdown(std::time::Duration::from_secs(10)).await;
    report_task.abort();

    info!("Shutdown complete");
    Ok(())
}
