// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::Config;
use crate::job::{JobRequest, JobStatus, RemoteJobHandle};
use crate::registry::SqliteRegistry;
use crate::remote::{RemoteError, RemoteExecutor, ResultStream};

type Script = VecDeque<Result<JobStatus, RemoteError>>;

/// In-memory executor replaying scripted statuses.
///
/// Each `submit` takes the next queued submission: a status script (job ids
/// are `job-1`, `job-2`, ... in submission order) or a submission error. A
/// job whose script has run out keeps reporting `Running`.
#[derive(Default)]
pub struct ScriptedExecutor {
    submissions: Mutex<VecDeque<Result<Script, RemoteError>>>,
    scripts: Mutex<HashMap<String, Script>>,
    queries: Mutex<Vec<String>>,
    submitted: Mutex<Vec<JobRequest>>,
    results: Mutex<HashMap<String, Vec<u8>>>,
    stream_failures: Mutex<HashMap<String, usize>>,
    fetches: Mutex<Vec<String>>,
    query_delay: Option<Duration>,
    chunk_delay: Option<Duration>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = Some(delay);
        self
    }

    /// Pause before every result chunk
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn with_result(self, locator: &str, body: &[u8]) -> Self {
        self.results.lock().unwrap().insert(locator.to_string(), body.to_vec());
        self
    }

    /// Like `with_result`, but the first `failures` fetches break off after the first chunk
    pub fn with_flaky_result(self, locator: &str, body: &[u8], failures: usize) -> Self {
        self.stream_failures.lock().unwrap().insert(locator.to_string(), failures);
        self.with_result(locator, body)
    }

    pub fn push_job(&self, script: Vec<Result<JobStatus, RemoteError>>) {
        self.submissions.lock().unwrap().push_back(Ok(script.into()));
    }

    pub fn push_submit_error(&self, error: RemoteError) {
        self.submissions.lock().unwrap().push_back(Err(error));
    }

    pub fn query_count(&self, job_id: &str) -> usize {
        self.queries.lock().unwrap().iter().filter(|id| id.as_str() == job_id).count()
    }

    pub fn total_queries(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    pub fn fetch_count(&self, locator: &str) -> usize {
        self.fetches.lock().unwrap().iter().filter(|l| l.as_str() == locator).count()
    }

    pub fn submitted(&self) -> Vec<JobRequest> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn submit(&self, request: &JobRequest) -> Result<RemoteJobHandle, RemoteError> {
        let script = self.submissions.lock().unwrap().pop_front().unwrap_or_else(|| Ok(Script::new()))?;

        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(request.clone());
        let job_id = format!("job-{}", submitted.len());
        self.scripts.lock().unwrap().insert(job_id.clone(), script);

        Ok(RemoteJobHandle::new(job_id))
    }

    async fn query_status(&self, handle: &RemoteJobHandle) -> Result<JobStatus, RemoteError> {
        self.queries.lock().unwrap().push(handle.job_id.clone());
        if let Some(delay) = self.query_delay {
            tokio::time::sleep(delay).await;
        }

        self.scripts
            .lock()
            .unwrap()
            .get_mut(&handle.job_id)
            .and_then(|script| script.pop_front())
            .unwrap_or_else(|| Ok(JobStatus::running("still running")))
    }

    async fn fetch_result(&self, locator: &str) -> Result<ResultStream, RemoteError> {
        self.fetches.lock().unwrap().push(locator.to_string());
        let body = self
            .results
            .lock()
            .unwrap()
            .get(locator)
            .cloned()
            .ok_or_else(|| RemoteError::Fatal(format!("No result at {}", locator)))?;

        let interrupted = match self.stream_failures.lock().unwrap().get_mut(locator) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        };

        // Split into two chunks to exercise streaming writes
        let middle = body.len() / 2;
        let second = if interrupted {
            Err(RemoteError::Transient("Result stream interrupted: connection reset".to_string()))
        } else {
            Ok(Bytes::copy_from_slice(&body[middle..]))
        };
        let chunks = vec![Ok(Bytes::copy_from_slice(&body[..middle])), second];

        let delay = self.chunk_delay;
        let stream = futures_util::stream::iter(chunks).then(move |chunk| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            chunk
        });
        Ok(stream.boxed())
    }
}

/// Create an in-memory SQLite database for testing
pub async fn setup_test_database() -> anyhow::Result<SqliteRegistry> {
    let db_path = PathBuf::from(":memory:");
    SqliteRegistry::new(&db_path).await
}

/// Create a test configuration with temporary paths
pub fn create_test_config() -> Config {
    use std::net::SocketAddr;
    use std::str::FromStr;

    let temp_dir = std::env::temp_dir().join(format!("offline-sync-test-{}", uuid::Uuid::new_v4()));

    Config {
        service_url: "http://localhost:3000/FeatureServer".to_string(),
        service_api_key: None,
        data_dir: temp_dir.clone(),
        registry_db_path: temp_dir.join("test_registry.db"),
        local_api_bind: SocketAddr::from_str("127.0.0.1:0").unwrap(), // Use port 0 to auto-assign
        generate_poll_interval_secs: 1,
        sync_poll_interval_secs: 1,
        max_poll_duration_secs: 60,
        max_transient_errors: 3,
        download_attempts: 2,
        log_level: "error".to_string(), // Reduce log noise in tests
        log_json: false,
    }
}

/// Create a temporary directory for tests
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::TempDir::new().expect("Failed to create temp directory")
}
