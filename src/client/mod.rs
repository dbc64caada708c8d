//! # Orchestration Engine Client
//!
//! The only layer that touches network and credentials. Everything above it
//! (job sources, reporter, dispatcher) talks to the engine through the
//! [`JobLifecycle`] trait, so tests can substitute an in-process engine.
//!
//! ## Architecture
//!
//! - **JobLifecycle**: the engine's job-lifecycle API as a trait seam
//! - **EngineClient**: HTTP implementation with transparent OAuth refresh
//! - **TokenProvider**: client-credentials token cache
//!
//! ## Usage
//!
//! ```rust,no_run
//! use leadflow_worker::client::{EngineClient, JobLifecycle};
//! use leadflow_worker::config::EngineConfig;
//!
//! # async fn example() -> leadflow_worker::error::Result<()> {
//! let client = EngineClient::new(&EngineConfig::default())?;
//! let topology = client.topology().await?;
//! println!("cluster size: {}", topology.cluster_size);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod engine_client;

// Re-export main types for easy access
pub use auth::TokenProvider;
pub use engine_client::EngineClient;

use crate::error::Result;
use crate::types::{Job, TaskType, Variables};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

/// Stream of pushed jobs from a long-lived engine subscription.
pub type JobStream = Pin<Box<dyn Stream<Item = Result<Job>> + Send>>;

/// Parameters for one lease request (pull mode).
#[derive(Debug, Clone)]
pub struct LeaseRequest {
    pub task_type: TaskType,
    pub max_jobs: u32,
    pub lock_duration: Duration,
    /// Worker identity the engine records on the lock.
    pub worker: String,
}

/// Parameters for opening a job subscription (stream mode).
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub task_type: TaskType,
    pub lock_duration: Duration,
    pub worker: String,
}

/// Cluster topology returned by the engine; used as the startup health probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTopology {
    pub cluster_size: u32,
    #[serde(default)]
    pub brokers: Vec<BrokerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerInfo {
    pub node_id: u32,
    pub host: String,
    pub port: u16,
}

/// The engine's job-lifecycle API.
///
/// Implementations must be safe for concurrent use by every dispatcher loop
/// and in-flight execution unit at once.
#[async_trait::async_trait]
pub trait JobLifecycle: Send + Sync {
    /// Lease up to `max_jobs` jobs of one task type, locked to this worker.
    /// An empty result is normal and means no work is pending.
    async fn lease_jobs(&self, request: LeaseRequest) -> Result<Vec<Job>>;

    /// Complete a job, merging `variables` into the process instance.
    async fn complete_job(&self, job_key: i64, variables: &Variables) -> Result<()>;

    /// Fail a job, leaving `retries_remaining` on its budget. The engine
    /// re-delivers after `retry_backoff` if retries remain.
    async fn fail_job(
        &self,
        job_key: i64,
        error_message: &str,
        retries_remaining: u32,
        retry_backoff: Duration,
    ) -> Result<()>;

    /// Raise an incident; the engine stops retrying and flags the instance
    /// for operator attention.
    async fn raise_incident(&self, job_key: i64, error_message: &str) -> Result<()>;

    /// Cluster topology; doubles as the startup health probe.
    async fn topology(&self) -> Result<ClusterTopology>;

    /// Open a long-lived subscription that pushes locked jobs as they
    /// become available.
    async fn open_job_stream(&self, request: StreamRequest) -> Result<JobStream>;
}
