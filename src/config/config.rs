// SPDX-License-Identifier: GPL-3.0-only
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::job::PollPolicy;
use crate::package::sinks::DownloadRetry;

fn default_download_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Feature service the offline packages are generated from
    pub service_url: String,

    /// Optional bearer token for the feature service
    #[serde(default)]
    pub service_api_key: Option<String>,

    /// Directory holding downloaded packages
    pub data_dir: PathBuf,

    /// SQLite database path for the package registry
    pub registry_db_path: PathBuf,

    /// Local API bind address (e.g., "127.0.0.1:8080")
    pub local_api_bind: SocketAddr,

    /// Status poll interval for package generation jobs
    pub generate_poll_interval_secs: u64,

    /// Status poll interval for synchronization jobs
    pub sync_poll_interval_secs: u64,

    /// Maximum time a job may be polled, 0 disables the limit
    pub max_poll_duration_secs: u64,

    /// Consecutive transient status errors tolerated per job
    pub max_transient_errors: u32,

    /// Times a package download is attempted before giving up
    #[serde(default = "default_download_attempts")]
    pub download_attempts: u32,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,
}

impl Config {
    /// Load configuration from TOML file with environment variable overrides
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("OFFLINE_SYNC_CONFIG")
            .unwrap_or_else(|_| "config.toml".to_string());

        let mut config: Config = if std::path::Path::new(&config_path).exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            toml::from_str(&contents)?
        } else {
            Config::default()
        };

        if let Ok(val) = std::env::var("OFFLINE_SYNC_SERVICE_URL") {
            config.service_url = val;
        }
        if let Ok(val) = std::env::var("OFFLINE_SYNC_SERVICE_API_KEY") {
            config.service_api_key = Some(val);
        }
        if let Ok(val) = std::env::var("OFFLINE_SYNC_DATA_DIR") {
            config.data_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("OFFLINE_SYNC_REGISTRY_DB_PATH") {
            config.registry_db_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("OFFLINE_SYNC_LOCAL_API_BIND") {
            config.local_api_bind = SocketAddr::from_str(&val)?;
        }
        if let Ok(val) = std::env::var("OFFLINE_SYNC_GENERATE_POLL_INTERVAL_SECS") {
            config.generate_poll_interval_secs = val.parse()?;
        }
        if let Ok(val) = std::env::var("OFFLINE_SYNC_SYNC_POLL_INTERVAL_SECS") {
            config.sync_poll_interval_secs = val.parse()?;
        }
        if let Ok(val) = std::env::var("OFFLINE_SYNC_MAX_POLL_DURATION_SECS") {
            config.max_poll_duration_secs = val.parse()?;
        }
        if let Ok(val) = std::env::var("OFFLINE_SYNC_MAX_TRANSIENT_ERRORS") {
            config.max_transient_errors = val.parse()?;
        }
        if let Ok(val) = std::env::var("OFFLINE_SYNC_DOWNLOAD_ATTEMPTS") {
            config.download_attempts = val.parse()?;
        }
        if let Ok(val) = std::env::var("OFFLINE_SYNC_LOG_LEVEL") {
            config.log_level = val;
        }
        if let Ok(val) = std::env::var("OFFLINE_SYNC_LOG_JSON") {
            config.log_json = val.parse()?;
        }

        Ok(config)
    }

    /// Get the directory downloaded packages are stored in
    pub fn packages_dir(&self) -> PathBuf {
        self.data_dir.join("packages")
    }

    pub fn generate_poll_interval(&self) -> Duration {
        Duration::from_secs(self.generate_poll_interval_secs.max(1))
    }

    pub fn sync_poll_interval(&self) -> Duration {
        Duration::from_secs(self.sync_poll_interval_secs.max(1))
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            max_poll_duration: match self.max_poll_duration_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            max_transient_errors: self.max_transient_errors,
        }
    }

    pub fn download_retry(&self) -> DownloadRetry {
        DownloadRetry { max_attempts: self.download_attempts.max(1), ..DownloadRetry::default() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_url: String::from("http://localhost:3000/FeatureServer"),
            service_api_key: None,
            data_dir: PathBuf::from("/var/lib/offline-sync"),
            registry_db_path: PathBuf::from("packages.db"),
            local_api_bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            generate_poll_interval_secs: 60,
            sync_poll_interval_secs: 2,
            max_poll_duration_secs: 3600, // 1 hour
            max_transient_errors: 5,
            download_attempts: default_download_attempts(),
            log_level: String::from("info"),
            log_json: false,
        }
    }
}
