//! Leadflow Worker Binary
//!
//! Standalone worker process for the lead-enrichment pipeline: loads
//! configuration, registers the built-in handlers, and runs until Ctrl+C
//! or a fatal engine error.

use tokio::signal;
use tracing::{error, info};

use leadflow_worker::config::WorkerConfig;
use leadflow_worker::handlers;
use leadflow_worker::logging::init_structured_logging;
use leadflow_worker::registry::HandlerRegistry;
use leadflow_worker::worker::Worker;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_structured_logging();

    let config = WorkerConfig::load()?;
    info!(
        version = leadflow_worker::VERSION,
        engine = config.engine.base_url.as_str(),
        acquisition = %config.acquisition,
        "Starting leadflow worker"
    );

    let mut registry = HandlerRegistry::new();
    handlers::register_builtin(&mut registry, config.task_defaults.clone())?;

    let mut worker = Worker::new(config, registry)?;
    worker.start().await?;
    info!("Worker running, press Ctrl+C to stop");

    let mut fatal_error = None;
    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received");
        }
        fatal = worker.wait_for_fatal() => {
            error!(error = %fatal, "Worker stopping on fatal error");
            fatal_error = Some(fatal);
        }
    }

    worker.shutdown().await;

    match fatal_error {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}
