//! Worker configuration
//!
//! Defaults first, then an optional TOML file (`WORKER_CONFIG_PATH`), then
//! environment overrides. Environment wins so deployments can tune a shared
//! file per instance.

use crate::error::{Result, WorkerError};
use crate::types::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Stable worker name; a uuid suffix is appended per process.
    pub worker_name: String,
    pub engine: EngineConfig,
    pub acquisition: AcquisitionMode,
    /// Per-task-type defaults, overridable at registration time.
    pub task_defaults: TaskTypeConfig,
    /// Retry policy for engine report calls.
    pub report_retry: RetryPolicy,
    /// Grace period for in-flight jobs during shutdown.
    pub shutdown_grace_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_name: "lead-enrichment-worker".to_string(),
            engine: EngineConfig::default(),
            acquisition: AcquisitionMode::Poll,
            task_defaults: TaskTypeConfig::default(),
            report_retry: RetryPolicy::default(),
            shutdown_grace_ms: 10_000,
        }
    }
}

/// Connection parameters for the orchestration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    /// Client-credentials auth; `None` for engines without auth (local dev).
    pub oauth: Option<OAuthConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_ms: 30000,
            oauth: None,
        }
    }
}

/// OAuth client-credentials exchange parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_server_url: String,
    #[serde(default = "default_audience")]
    pub audience: String,
}

fn default_audience() -> String {
    "zeebe.camunda.io".to_string()
}

/// How jobs are acquired from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    #[default]
    Poll,
    Stream,
}

impl std::str::FromStr for AcquisitionMode {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "poll" => Ok(AcquisitionMode::Poll),
            "stream" => Ok(AcquisitionMode::Stream),
            other => Err(WorkerError::Configuration(format!(
                "Invalid acquisition mode '{other}', expected 'poll' or 'stream'"
            ))),
        }
    }
}

impl std::fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcquisitionMode::Poll => write!(f, "poll"),
            AcquisitionMode::Stream => write!(f, "stream"),
        }
    }
}

/// Per-task-type tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskTypeConfig {
    pub max_concurrent_jobs: usize,
    pub lock_duration_ms: u64,
    /// Re-poll interval when a lease request returns no jobs (pull mode).
    pub poll_interval_ms: u64,
    /// Cap on jobs requested per lease call.
    pub max_jobs_per_acquire: u32,
    /// Backoff handed to the engine when failing a job with retries left.
    pub retry_backoff_ms: u64,
    /// Buffered jobs per type in stream mode before backpressure kicks in.
    pub stream_buffer: usize,
}

impl Default for TaskTypeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 10,
            lock_duration_ms: 30_000,
            poll_interval_ms: 1_000,
            max_jobs_per_acquire: 32,
            retry_backoff_ms: 5_000,
            stream_buffer: 32,
        }
    }
}

impl TaskTypeConfig {
    pub fn lock_duration(&self) -> Duration {
        Duration::from_millis(self.lock_duration_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Reject values the dispatch machinery cannot run with: the concurrency
    /// ceiling and the stream buffer both need at least one slot.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(WorkerError::Configuration(
                "max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        if self.stream_buffer == 0 {
            return Err(WorkerError::Configuration(
                "stream_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl WorkerConfig {
    /// Defaults overridden from the environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.task_defaults.validate()?;
        Ok(config)
    }

    /// Full load order: defaults, then `WORKER_CONFIG_PATH` file if set,
    /// then environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("WORKER_CONFIG_PATH") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env()?;
        config.task_defaults.validate()?;
        Ok(config)
    }

    /// Load from a TOML file. Missing keys fall back to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()
            .map_err(|e| {
                WorkerError::Configuration(format!("Failed to read config file: {e}"))
            })?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| WorkerError::Configuration(format!("Invalid config file: {e}")))?;
        config.task_defaults.validate()?;
        Ok(config)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(name) = std::env::var("WORKER_NAME") {
            self.worker_name = name;
        }

        if let Ok(address) = std::env::var("ENGINE_ADDRESS") {
            self.engine.base_url = address;
        } else if let Ok(cluster_id) = std::env::var("ENGINE_CLUSTER_ID") {
            let region = std::env::var("ENGINE_REGION").map_err(|_| {
                WorkerError::Configuration(
                    "ENGINE_REGION is required when ENGINE_CLUSTER_ID is set".to_string(),
                )
            })?;
            self.engine.base_url =
                format!("https://{cluster_id}.{region}.zeebe.camunda.io");
        }

        if let Ok(timeout) = std::env::var("ENGINE_REQUEST_TIMEOUT_MS") {
            self.engine.request_timeout_ms = timeout.parse().map_err(|e| {
                WorkerError::Configuration(format!("Invalid request_timeout_ms: {e}"))
            })?;
        }

        self.apply_oauth_env()?;

        if let Ok(mode) = std::env::var("WORKER_ACQUISITION") {
            self.acquisition = mode.parse()?;
        }

        if let Ok(max_concurrent) = std::env::var("WORKER_MAX_CONCURRENT_JOBS") {
            self.task_defaults.max_concurrent_jobs = max_concurrent.parse().map_err(|e| {
                WorkerError::Configuration(format!("Invalid max_concurrent_jobs: {e}"))
            })?;
        }

        if let Ok(lock_duration) = std::env::var("WORKER_LOCK_DURATION_MS") {
            self.task_defaults.lock_duration_ms = lock_duration.parse().map_err(|e| {
                WorkerError::Configuration(format!("Invalid lock_duration_ms: {e}"))
            })?;
        }

        if let Ok(poll_interval) = std::env::var("WORKER_POLL_INTERVAL_MS") {
            self.task_defaults.poll_interval_ms = poll_interval.parse().map_err(|e| {
                WorkerError::Configuration(format!("Invalid poll_interval_ms: {e}"))
            })?;
        }

        if let Ok(grace) = std::env::var("WORKER_SHUTDOWN_GRACE_MS") {
            self.shutdown_grace_ms = grace.parse().map_err(|e| {
                WorkerError::Configuration(format!("Invalid shutdown_grace_ms: {e}"))
            })?;
        }

        Ok(())
    }

    fn apply_oauth_env(&mut self) -> Result<()> {
        let client_id = std::env::var("ENGINE_CLIENT_ID").ok();
        let client_secret = std::env::var("ENGINE_CLIENT_SECRET").ok();
        let auth_server_url = std::env::var("ENGINE_AUTHORIZATION_SERVER_URL").ok();

        match (client_id, client_secret, auth_server_url) {
            (Some(client_id), Some(client_secret), Some(auth_server_url)) => {
                let audience = std::env::var("ENGINE_TOKEN_AUDIENCE")
                    .unwrap_or_else(|_| default_audience());
                self.engine.oauth = Some(OAuthConfig {
                    client_id,
                    client_secret,
                    auth_server_url,
                    audience,
                });
                Ok(())
            }
            (None, None, None) => Ok(()),
            _ => Err(WorkerError::Configuration(
                "Partial OAuth config: ENGINE_CLIENT_ID, ENGINE_CLIENT_SECRET and \
                 ENGINE_AUTHORIZATION_SERVER_URL must be set together"
                    .to_string(),
            )),
        }
    }
}
