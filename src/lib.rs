#![allow(clippy::doc_markdown)] // Allow technical terms like OAuth, NDJSON in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Leadflow Worker
//!
//! Job-worker dispatch core for a lead-enrichment workflow: leases jobs from
//! an orchestration engine, runs the registered handler for each task type
//! under per-type concurrency limits, and reports completion, failure, or an
//! incident back to the engine.
//!
//! ## Architecture
//!
//! The worker splits into three layers with trait seams between them:
//!
//! - [`client`] - Engine HTTP client behind the `JobLifecycle` trait, with
//!   transparent OAuth client-credentials refresh
//! - [`source`] - Job acquisition as a `JobSource`: long polling or a pushed
//!   job stream with bounded buffering, selected by configuration
//! - [`dispatch`] - Per-task-type scheduling loops, deadline-bounded handler
//!   execution, and outcome reporting with bounded retry
//!
//! Around them sit the [`registry`] of task-type handlers, the built-in
//! lead-pipeline [`handlers`], and the [`worker`] lifecycle that wires it
//! all together.
//!
//! ## Job Lifecycle
//!
//! ```text
//! lease (locked, deadline) -> execute handler -> complete
//!                                             -> fail (retries remain)
//!                                             -> incident (escalate)
//! ```
//!
//! A job is never silently dropped: every leased job ends in exactly one
//! report, or is abandoned to reappear when its lock expires.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use leadflow_worker::config::WorkerConfig;
//! use leadflow_worker::handlers;
//! use leadflow_worker::registry::HandlerRegistry;
//! use leadflow_worker::worker::Worker;
//!
//! # async fn example() -> leadflow_worker::error::Result<()> {
//! let config = WorkerConfig::load()?;
//!
//! let mut registry = HandlerRegistry::new();
//! handlers::register_builtin(&mut registry, config.task_defaults.clone())?;
//!
//! let mut worker = Worker::new(config, registry)?;
//! worker.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod registry;
pub mod source;
pub mod types;
pub mod worker;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use client::{EngineClient, JobLifecycle};
pub use config::{AcquisitionMode, EngineConfig, TaskTypeConfig, WorkerConfig};
pub use error::{Result, WorkerError};
pub use registry::HandlerRegistry;
pub use types::{HandlerResult, Job, JobHandler, JobOutcome, TaskType, Variables};
pub use worker::Worker;

/// Crate version, reported in the HTTP user agent and startup logs.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
