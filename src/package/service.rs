// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::job::{JobCoordinator, JobRequest, JobStatus, OperationKind, Slot};
use crate::package::params::{GenerateParameters, SyncParameters};
use crate::package::sinks::{
    DownloadRetry, PackageDownloadSink, SinkReport, SyncCompleteSink, DEFAULT_PACKAGE_NAME,
};
use crate::registry::{PackageEntry, Registry};
use crate::remote::RemoteExecutor;
use crate::store::PackageStore;

/// Generates offline packages on the download slot and synchronizes them on the sync slot
pub struct PackageService {
    coordinator: Arc<JobCoordinator>,
    executor: Arc<dyn RemoteExecutor>,
    registry: Arc<dyn Registry>,
    store: Arc<dyn PackageStore>,
    reports: mpsc::UnboundedSender<SinkReport>,
    service_url: String,
    generate_poll_interval: Duration,
    sync_poll_interval: Duration,
    download_retry: DownloadRetry,
    /// Cancels the package download that follows a finished generate job
    download_follow_up: Mutex<CancellationToken>,
    follow_ups: TaskTracker,
}

impl PackageService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        coordinator: Arc<JobCoordinator>,
        executor: Arc<dyn RemoteExecutor>,
        registry: Arc<dyn Registry>,
        store: Arc<dyn PackageStore>,
        reports: mpsc::UnboundedSender<SinkReport>,
        service_url: String,
        generate_poll_interval: Duration,
        sync_poll_interval: Duration,
    ) -> Self {
        Self {
            coordinator,
            executor,
            registry,
            store,
            reports,
            service_url,
            generate_poll_interval,
            sync_poll_interval,
            download_retry: DownloadRetry::default(),
            download_follow_up: Mutex::new(CancellationToken::new()),
            follow_ups: TaskTracker::new(),
        }
    }

    pub fn with_download_retry(mut self, retry: DownloadRetry) -> Self {
        self.download_retry = retry;
        self
    }

    /// Fresh token for the next download, cancelling the one it replaces
    fn renew_download_follow_up(&self) -> CancellationToken {
        let mut current = self.download_follow_up.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        current.cancel();
        *current = CancellationToken::new();
        current.clone()
    }

    fn cancel_download_follow_up(&self) {
        self.download_follow_up
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .cancel();
    }

    /// Start exporting a package. Supersedes a generate job already running.
    ///
    /// Parameters are checked by the executor at submission, so bad input
    /// surfaces as a failed outcome on the report channel.
    pub fn generate(
        &self,
        params: GenerateParameters,
        name: Option<String>,
        progress: Option<mpsc::UnboundedSender<JobStatus>>,
    ) -> anyhow::Result<u64> {
        let name = name.unwrap_or_else(|| DEFAULT_PACKAGE_NAME.to_string());
        let target = serde_json::to_value(params.extent)?;
        let request = JobRequest::new(
            OperationKind::Generate,
            serde_json::to_value(&params)?,
            self.generate_poll_interval,
        )
        .with_target(target);

        let sink = PackageDownloadSink {
            executor: Arc::clone(&self.executor),
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            name: name.clone(),
            service_url: self.service_url.clone(),
            reports: self.reports.clone(),
            cancel: self.renew_download_follow_up(),
            retry: self.download_retry,
            tasks: self.follow_ups.clone(),
        };

        let generation = self.coordinator.start_job(Slot::Download, request, progress, Box::new(sink));
        info!(generation, package = %name, "Package generation started");
        Ok(generation)
    }

    /// Start synchronizing a registered package. Supersedes a sync job already running.
    pub async fn synchronize(
        &self,
        package_id: &str,
        params: SyncParameters,
        progress: Option<mpsc::UnboundedSender<JobStatus>>,
    ) -> anyhow::Result<u64> {
        let package = self
            .registry
            .get_package(package_id)
            .await?
            .with_context(|| format!("Package not found: {}", package_id))?;

        let request = JobRequest::new(
            OperationKind::Synchronize,
            serde_json::to_value(params)?,
            self.sync_poll_interval,
        )
        .with_target(serde_json::json!({
            "package_id": package.id,
            "local_path": package.local_path,
        }));

        let sink = SyncCompleteSink {
            registry: Arc::clone(&self.registry),
            package_id: package.id.clone(),
            reports: self.reports.clone(),
            tasks: self.follow_ups.clone(),
        };

        let generation = self.coordinator.start_job(Slot::Sync, request, progress, Box::new(sink));
        info!(generation, package_id = %package.id, "Package synchronization started");
        Ok(generation)
    }

    /// Cancel the slot's job, or the package download that follows it
    pub fn cancel(&self, slot: Slot) {
        self.coordinator.cancel_job(slot);
        if slot == Slot::Download {
            self.cancel_download_follow_up();
        }
    }

    pub fn cancel_all(&self) {
        self.coordinator.cancel_all();
        self.cancel_download_follow_up();
    }

    /// Cancel everything and wait up to `grace` for follow-up work to wind down
    pub async fn shutdown(&self, grace: Duration) {
        self.cancel_all();
        self.follow_ups.close();
        if tokio::time::timeout(grace, self.follow_ups.wait()).await.is_err() {
            warn!(pending = self.follow_ups.len(), "Follow-up work still running at shutdown");
        }
    }

    pub fn subscribe(&self, slot: Slot) -> Option<mpsc::UnboundedReceiver<JobStatus>> {
        self.coordinator.subscribe(slot)
    }

    pub fn is_active(&self, slot: Slot) -> bool {
        self.coordinator.is_active(slot)
    }

    pub fn active_generation(&self, slot: Slot) -> Option<u64> {
        self.coordinator.active_generation(slot)
    }

    pub async fn list_packages(&self) -> anyhow::Result<Vec<PackageEntry>> {
        self.registry.list_packages().await
    }

    pub async fn get_package(&self, id: &str) -> anyhow::Result<Option<PackageEntry>> {
        self.registry.get_package(id).await
    }

    /// Delete a package file and its registry entry. Returns false if the package is unknown.
    pub async fn remove_package(&self, id: &str) -> anyhow::Result<bool> {
        let Some(entry) = self.registry.get_package(id).await? else {
            return Ok(false);
        };

        self.store.remove(Path::new(&entry.local_path)).await?;
        self.registry.remove_package(id).await?;
        info!(package_id = %id, "Package removed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobPhase, PollPolicy};
    use crate::package::params::{Extent, SyncDirection, SyncModel};
    use crate::remote::RemoteError;
    use crate::store::FsPackageStore;
    use crate::test_helpers::{create_temp_dir, setup_test_database, ScriptedExecutor};

    struct Harness {
        _dir: tempfile::TempDir,
        executor: Arc<ScriptedExecutor>,
        registry: Arc<crate::registry::SqliteRegistry>,
        service: PackageService,
        reports: mpsc::UnboundedReceiver<SinkReport>,
    }

    // Real time: the registry's SQLite worker does not hold back paused-clock auto-advance
    const GENERATE_INTERVAL: Duration = Duration::from_millis(20);
    const SYNC_INTERVAL: Duration = Duration::from_millis(10);

    async fn harness(executor: ScriptedExecutor) -> Harness {
        let dir = create_temp_dir();
        let executor = Arc::new(executor);
        let registry = Arc::new(setup_test_database().await.unwrap());
        let store = Arc::new(FsPackageStore::new(dir.path().join("packages")));
        let coordinator = Arc::new(JobCoordinator::new(executor.clone(), PollPolicy::default()));
        let (tx, reports) = mpsc::unbounded_channel();

        let service = PackageService::new(
            coordinator,
            executor.clone(),
            registry.clone(),
            store,
            tx,
            "https://gis.example.com/FeatureServer".to_string(),
            GENERATE_INTERVAL,
            SYNC_INTERVAL,
        )
        .with_download_retry(DownloadRetry { max_attempts: 2, base_delay: Duration::from_millis(10) });

        Harness { _dir: dir, executor, registry, service, reports }
    }

    fn package_files(h: &Harness) -> Vec<String> {
        match std::fs::read_dir(h._dir.path().join("packages")) {
            Ok(entries) => entries.map(|e| e.unwrap().file_name().to_string_lossy().to_string()).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn generate_params() -> GenerateParameters {
        GenerateParameters {
            layers: vec![0, 1],
            extent: Extent { xmin: -122.5, ymin: 37.6, xmax: -122.3, ymax: 37.8 },
            out_spatial_reference: Some(4326),
            sync_model: SyncModel::PerLayer,
            return_attachments: false,
        }
    }

    #[tokio::test]
    async fn test_generate_downloads_and_registers_package() {
        let executor = ScriptedExecutor::new().with_result("replica/1", b"hello world");
        executor.push_job(vec![
            Ok(JobStatus::running("exporting").with_percent(50.0)),
            Ok(JobStatus::completed(Some("replica/1".to_string()))),
        ]);
        let mut h = harness(executor).await;
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

        h.service.generate(generate_params(), Some("Bay Area".to_string()), Some(progress_tx)).unwrap();

        let entry = match h.reports.recv().await.unwrap() {
            SinkReport::PackageStored(entry) => entry,
            other => panic!("unexpected report {:?}", other),
        };
        assert!(entry.local_path.ends_with("bay_area.geodatabase"));
        assert_eq!(entry.service_url, "https://gis.example.com/FeatureServer");
        assert_eq!(h.service.list_packages().await.unwrap(), vec![entry]);

        let mut phases = Vec::new();
        while let Ok(status) = progress_rx.try_recv() {
            phases.push(status.phase);
        }
        assert_eq!(phases, vec![JobPhase::Pending, JobPhase::Running, JobPhase::Completed]);

        let submitted = h.executor.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].operation, OperationKind::Generate);
        assert_eq!(submitted[0].poll_interval, GENERATE_INTERVAL);
        assert_eq!(submitted[0].target["xmin"], -122.5);
        assert_eq!(submitted[0].parameters["layers"], serde_json::json!([0, 1]));
    }

    #[tokio::test]
    async fn test_generate_submission_failure_is_reported() {
        let executor = ScriptedExecutor::new();
        executor.push_submit_error(RemoteError::Submission("Layer set cannot be empty".to_string()));
        let mut h = harness(executor).await;

        h.service.generate(generate_params(), None, None).unwrap();

        match h.reports.recv().await.unwrap() {
            SinkReport::JobFailed { slot, detail } => {
                assert_eq!(slot, Slot::Download);
                assert!(detail.contains("Layer set cannot be empty"), "{}", detail);
            }
            other => panic!("unexpected report {:?}", other),
        }
        assert_eq!(h.executor.total_queries(), 0);
    }

    #[tokio::test]
    async fn test_second_generate_supersedes_first() {
        let executor = ScriptedExecutor::new().with_result("replica/2", b"second");
        executor.push_job(vec![]);
        executor.push_job(vec![Ok(JobStatus::completed(Some("replica/2".to_string())))]);
        let mut h = harness(executor).await;

        h.service.generate(generate_params(), Some("first".to_string()), None).unwrap();
        tokio::task::yield_now().await;
        h.service.generate(generate_params(), Some("second".to_string()), None).unwrap();

        let mut reports = vec![h.reports.recv().await.unwrap(), h.reports.recv().await.unwrap()];
        reports.sort_by_key(|r| matches!(r, SinkReport::PackageStored(_)));
        assert_eq!(reports[0], SinkReport::JobCancelled { slot: Slot::Download });
        match &reports[1] {
            SinkReport::PackageStored(entry) => assert!(entry.local_path.ends_with("second.geodatabase")),
            other => panic!("unexpected report {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_synchronize_marks_package() {
        let executor = ScriptedExecutor::new();
        executor.push_job(vec![Ok(JobStatus::running("syncing")), Ok(JobStatus::completed(None))]);
        let mut h = harness(executor).await;
        let entry = PackageEntry::new("a".to_string(), "u".to_string(), "/data/a.geodatabase".to_string());
        h.registry.add_package(entry.clone()).await.unwrap();

        let params = SyncParameters { sync_direction: SyncDirection::Upload, rollback_on_failure: true };
        h.service.synchronize(&entry.id, params, None).await.unwrap();

        assert_eq!(h.reports.recv().await.unwrap(), SinkReport::PackageSynced { package_id: entry.id.clone() });
        assert!(h.service.get_package(&entry.id).await.unwrap().unwrap().last_synced_at.is_some());
        assert!(!h.service.is_active(Slot::Sync));

        let submitted = h.executor.submitted();
        assert_eq!(submitted[0].operation, OperationKind::Synchronize);
        assert_eq!(submitted[0].poll_interval, SYNC_INTERVAL);
        assert_eq!(submitted[0].target["package_id"], entry.id.as_str());
        assert_eq!(submitted[0].parameters["sync_direction"], "upload");
    }

    #[tokio::test]
    async fn test_synchronize_unknown_package() {
        let h = harness(ScriptedExecutor::new()).await;

        let result = h.service.synchronize("missing", SyncParameters::default(), None).await;
        assert!(result.unwrap_err().to_string().contains("Package not found"));
        assert!(h.executor.submitted().is_empty());
        assert!(!h.service.is_active(Slot::Sync));
    }

    #[tokio::test]
    async fn test_remove_package_deletes_file_and_entry() {
        let executor = ScriptedExecutor::new().with_result("replica/1", b"data");
        executor.push_job(vec![Ok(JobStatus::completed(Some("replica/1".to_string())))]);
        let mut h = harness(executor).await;

        h.service.generate(generate_params(), Some("doomed".to_string()), None).unwrap();
        let entry = match h.reports.recv().await.unwrap() {
            SinkReport::PackageStored(entry) => entry,
            other => panic!("unexpected report {:?}", other),
        };

        assert!(h.service.remove_package(&entry.id).await.unwrap());
        assert!(!std::path::Path::new(&entry.local_path).exists());
        assert!(h.service.get_package(&entry.id).await.unwrap().is_none());
        assert!(!h.service.remove_package(&entry.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_sync_leaves_download_running() {
        let executor = ScriptedExecutor::new();
        executor.push_job(vec![]);
        executor.push_job(vec![]);
        let mut h = harness(executor).await;
        let entry = PackageEntry::new("a".to_string(), "u".to_string(), "/data/a.geodatabase".to_string());
        h.registry.add_package(entry.clone()).await.unwrap();

        h.service.generate(generate_params(), None, None).unwrap();
        h.service.synchronize(&entry.id, SyncParameters::default(), None).await.unwrap();
        tokio::task::yield_now().await;

        h.service.cancel(Slot::Sync);

        assert_eq!(h.reports.recv().await.unwrap(), SinkReport::JobCancelled { slot: Slot::Sync });
        assert!(h.service.is_active(Slot::Download));

        h.service.cancel_all();
        assert_eq!(h.reports.recv().await.unwrap(), SinkReport::JobCancelled { slot: Slot::Download });
    }

    #[tokio::test]
    async fn test_generate_without_name_uses_default() {
        let executor = ScriptedExecutor::new().with_result("replica/1", b"data");
        executor.push_job(vec![Ok(JobStatus::completed(Some("replica/1".to_string())))]);
        let mut h = harness(executor).await;

        h.service.generate(generate_params(), None, None).unwrap();

        match h.reports.recv().await.unwrap() {
            SinkReport::PackageStored(entry) => {
                assert_eq!(entry.name, DEFAULT_PACKAGE_NAME);
                assert!(entry.local_path.ends_with("offline_package.geodatabase"));
            }
            other => panic!("unexpected report {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_download_after_job_finished() {
        let executor = ScriptedExecutor::new()
            .with_result("replica/1", b"hello world")
            .with_chunk_delay(Duration::from_millis(300));
        executor.push_job(vec![Ok(JobStatus::completed(Some("replica/1".to_string())))]);
        let mut h = harness(executor).await;

        h.service.generate(generate_params(), Some("Bay Area".to_string()), None).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        // The remote job is done, only the download is left
        assert!(!h.service.is_active(Slot::Download));

        h.service.cancel(Slot::Download);

        assert_eq!(h.reports.recv().await.unwrap(), SinkReport::FollowUpCancelled { slot: Slot::Download });
        assert!(h.service.list_packages().await.unwrap().is_empty());
        assert!(package_files(&h).is_empty(), "{:?}", package_files(&h));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_cancelled_download() {
        let executor = ScriptedExecutor::new()
            .with_result("replica/1", b"hello world")
            .with_chunk_delay(Duration::from_millis(300));
        executor.push_job(vec![Ok(JobStatus::completed(Some("replica/1".to_string())))]);
        let mut h = harness(executor).await;

        h.service.generate(generate_params(), None, None).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        h.service.shutdown(Duration::from_secs(5)).await;

        // Already reported by the time shutdown returns
        assert_eq!(h.reports.try_recv().unwrap(), SinkReport::FollowUpCancelled { slot: Slot::Download });
        assert!(package_files(&h).is_empty(), "{:?}", package_files(&h));
    }

    #[tokio::test]
    async fn test_new_generate_cancels_previous_download() {
        let executor = ScriptedExecutor::new()
            .with_result("replica/1", b"first")
            .with_result("replica/2", b"second")
            .with_chunk_delay(Duration::from_millis(200));
        executor.push_job(vec![Ok(JobStatus::completed(Some("replica/1".to_string())))]);
        executor.push_job(vec![Ok(JobStatus::completed(Some("replica/2".to_string())))]);
        let mut h = harness(executor).await;

        h.service.generate(generate_params(), Some("first".to_string()), None).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.service.generate(generate_params(), Some("second".to_string()), None).unwrap();

        assert_eq!(h.reports.recv().await.unwrap(), SinkReport::FollowUpCancelled { slot: Slot::Download });
        match h.reports.recv().await.unwrap() {
            SinkReport::PackageStored(entry) => assert!(entry.local_path.ends_with("second.geodatabase")),
            other => panic!("unexpected report {:?}", other),
        }
        assert_eq!(package_files(&h), vec!["second.geodatabase"]);
    }
}
