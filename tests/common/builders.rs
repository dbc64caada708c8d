//! Shared fixtures for worker integration tests.

#![allow(dead_code)] // Not every test binary uses every fixture

use std::sync::Arc;

use leadflow_worker::config::{AcquisitionMode, TaskTypeConfig, WorkerConfig};
use leadflow_worker::handlers;
use leadflow_worker::registry::HandlerRegistry;
use leadflow_worker::test_support::MockEngine;
use leadflow_worker::types::{Job, Variables};
use leadflow_worker::worker::Worker;
use serde_json::json;

/// A complete, well-formed lead record.
pub fn jane_doe() -> Variables {
    lead("Jane Doe", "jane@x.com", "Acme")
}

pub fn lead(name: &str, email: &str, company: &str) -> Variables {
    let mut variables = Variables::new();
    variables.insert("leadName".to_string(), json!(name));
    variables.insert("email".to_string(), json!(email));
    variables.insert("company".to_string(), json!(company));
    variables
}

/// Short intervals so integration tests spin quickly under virtual time.
pub fn fast_task_config() -> TaskTypeConfig {
    TaskTypeConfig {
        poll_interval_ms: 20,
        ..Default::default()
    }
}

pub fn fast_worker_config(mode: AcquisitionMode) -> WorkerConfig {
    WorkerConfig {
        acquisition: mode,
        task_defaults: fast_task_config(),
        shutdown_grace_ms: 5_000,
        ..Default::default()
    }
}

/// A running worker with the four built-in pipeline handlers registered.
pub async fn started_pipeline_worker(engine: Arc<MockEngine>, mode: AcquisitionMode) -> Worker {
    let config = fast_worker_config(mode);
    let mut registry = HandlerRegistry::new();
    handlers::register_builtin(&mut registry, config.task_defaults.clone())
        .expect("builtin registration");
    let mut worker = Worker::with_engine(config, registry, engine);
    worker.start().await.expect("worker start");
    worker
}

/// A running worker with a single caller-supplied registry.
pub async fn started_worker(
    engine: Arc<MockEngine>,
    mode: AcquisitionMode,
    registry: HandlerRegistry,
) -> Worker {
    let mut worker = Worker::with_engine(fast_worker_config(mode), registry, engine);
    worker.start().await.expect("worker start");
    worker
}

pub fn job_with_variables(job_key: i64, task_type: &str, variables: Variables) -> Job {
    let mut job = MockEngine::job(job_key, task_type);
    job.variables = variables;
    job
}
