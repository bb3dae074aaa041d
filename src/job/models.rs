// SPDX-License-Identifier: GPL-3.0-only
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Logical operation category. Each slot runs at most one job at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    /// Generating and downloading an offline package
    Download,
    /// Synchronizing edits of a downloaded package
    Sync,
}

impl Slot {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Sync => "sync",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown job slot: {0}")]
pub struct SlotParseError(pub String);

impl FromStr for Slot {
    type Err = SlotParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "download" => Ok(Self::Download),
            "sync" => Ok(Self::Sync),
            _ => Err(SlotParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Generate,
    Synchronize,
}

/// A request for one remote job. Immutable once handed to the coordinator.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub operation: OperationKind,

    /// Operation parameters, opaque to the coordinator
    pub parameters: serde_json::Value,

    /// Target extent or resource the operation applies to
    pub target: serde_json::Value,

    /// Delay between two status queries
    pub poll_interval: Duration,
}

impl JobRequest {
    pub fn new(operation: OperationKind, parameters: serde_json::Value, poll_interval: Duration) -> Self {
        Self {
            operation,
            parameters,
            target: serde_json::Value::Null,
            poll_interval,
        }
    }

    pub fn with_target(mut self, target: serde_json::Value) -> Self {
        self.target = target;
        self
    }
}

/// Handle to a job accepted by the remote executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJobHandle {
    pub job_id: String,
    pub created_at: DateTime<Utc>,
}

impl RemoteJobHandle {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub phase: JobPhase,

    #[serde(default)]
    pub message: String,

    /// Where the result can be fetched from, usually set on completion
    #[serde(default)]
    pub result_locator: Option<String>,

    #[serde(default)]
    pub percent_complete: Option<f32>,
}

impl JobStatus {
    pub fn new(phase: JobPhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
            result_locator: None,
            percent_complete: None,
        }
    }

    pub fn pending(message: impl Into<String>) -> Self {
        Self::new(JobPhase::Pending, message)
    }

    pub fn running(message: impl Into<String>) -> Self {
        Self::new(JobPhase::Running, message)
    }

    pub fn completed(result_locator: Option<String>) -> Self {
        Self {
            result_locator,
            percent_complete: Some(100.0),
            ..Self::new(JobPhase::Completed, "Job completed")
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(JobPhase::Failed, message)
    }

    pub fn cancelled() -> Self {
        Self::new(JobPhase::Cancelled, "Job cancelled")
    }

    pub fn with_percent(mut self, percent: f32) -> Self {
        self.percent_complete = Some(percent);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub job_id: String,
    pub result_locator: Option<String>,
    pub message: String,
}

/// Terminal outcome of one job, delivered exactly once to its completion sink
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded(JobResult),
    Failed(String),
    Cancelled,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn result_locator(&self) -> Option<&str> {
        match self {
            Self::Succeeded(result) => result.result_locator.as_deref(),
            _ => None,
        }
    }
}

/// Limits applied while polling a remote job
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Total time a job may spend polling before it is failed
    pub max_poll_duration: Option<Duration>,

    /// Consecutive transient query errors tolerated before the job is failed
    pub max_transient_errors: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_poll_duration: Some(Duration::from_secs(3600)),
            max_transient_errors: 5,
        }
    }
}
