//! Worker lifecycle: startup probe, dispatcher fan-out, graceful shutdown.
//!
//! A [`Worker`] owns one engine connection and one dispatcher loop per
//! registered task type. Startup is fail-fast: the topology probe runs
//! before any job is leased so bad credentials or a bad endpoint surface
//! immediately instead of as a stream of acquisition errors.

use std::future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::client::{EngineClient, JobLifecycle};
use crate::config::WorkerConfig;
use crate::dispatch::{Dispatcher, ExecutionUnit, Reporter, ShutdownSignal};
use crate::error::{Result, WorkerError};
use crate::registry::HandlerRegistry;
use crate::source::build_source;

pub struct Worker {
    config: WorkerConfig,
    registry: Arc<HandlerRegistry>,
    engine: Arc<dyn JobLifecycle>,
    identity: String,
    shutdown: Arc<ShutdownSignal>,
    dispatchers: Vec<JoinHandle<()>>,
    fatal_rx: Option<mpsc::UnboundedReceiver<WorkerError>>,
}

impl Worker {
    /// Build a worker against a real engine endpoint.
    pub fn new(config: WorkerConfig, registry: HandlerRegistry) -> Result<Self> {
        let engine = Arc::new(EngineClient::new(&config.engine)?);
        Ok(Self::with_engine(config, registry, engine))
    }

    /// Build a worker on an injected engine connection.
    pub fn with_engine(
        config: WorkerConfig,
        registry: HandlerRegistry,
        engine: Arc<dyn JobLifecycle>,
    ) -> Self {
        let identity = format!("{}-{}", config.worker_name, uuid::Uuid::new_v4());
        Self {
            config,
            registry: Arc::new(registry),
            engine,
            identity,
            shutdown: Arc::new(ShutdownSignal::new()),
            dispatchers: Vec::new(),
            fatal_rx: None,
        }
    }

    /// Worker identity sent on lease requests: stable name plus a per-process
    /// uuid suffix.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Probe the engine and start one dispatcher loop per registered task
    /// type. Returns once all loops are running.
    pub async fn start(&mut self) -> Result<()> {
        if self.registry.is_empty() {
            return Err(WorkerError::Configuration(
                "Cannot start a worker with no registered handlers".to_string(),
            ));
        }
        if !self.dispatchers.is_empty() {
            return Err(WorkerError::Configuration(
                "Worker is already running".to_string(),
            ));
        }

        let topology = self.engine.topology().await.map_err(|e| {
            error!(error = %e, "🛑 WORKER: Engine topology probe failed");
            e
        })?;
        info!(
            worker = self.identity.as_str(),
            cluster_size = topology.cluster_size,
            brokers = topology.brokers.len(),
            acquisition = %self.config.acquisition,
            task_types = self.registry.len(),
            "🚀 WORKER: Connected to engine cluster"
        );

        let source = build_source(
            self.config.acquisition,
            self.engine.clone(),
            self.registry.clone(),
            self.identity.clone(),
        );
        let reporter = Arc::new(Reporter::new(
            self.engine.clone(),
            self.config.report_retry.clone(),
        ));

        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        self.fatal_rx = Some(fatal_rx);

        for task_type in self.registry.task_types() {
            let registration = self.registry.lookup(&task_type)?.clone();
            let unit = Arc::new(ExecutionUnit::new(
                registration.handler,
                registration.config.clone(),
                reporter.clone(),
            ));
            let dispatcher = Dispatcher::new(
                task_type,
                registration.config,
                source.clone(),
                unit,
                self.shutdown.clone(),
                fatal_tx.clone(),
                self.config.shutdown_grace(),
            );
            self.dispatchers.push(tokio::spawn(dispatcher.run()));
        }

        Ok(())
    }

    /// Wait for a dispatcher to report a fatal error. Pends forever once all
    /// loops have exited without one, so this is safe to race against a
    /// shutdown trigger.
    pub async fn wait_for_fatal(&mut self) -> WorkerError {
        match self.fatal_rx.as_mut() {
            Some(rx) => match rx.recv().await {
                Some(error) => error,
                None => future::pending().await,
            },
            None => future::pending().await,
        }
    }

    /// Stop acquiring, drain in-flight jobs within the grace period, and
    /// join every dispatcher loop.
    pub async fn shutdown(&mut self) {
        info!(
            worker = self.identity.as_str(),
            grace_ms = self.config.shutdown_grace().as_millis() as u64,
            "🛑 WORKER: Shutdown requested"
        );
        self.shutdown.trigger();
        for handle in self.dispatchers.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Dispatcher task ended abnormally during shutdown");
            }
        }
        self.fatal_rx = None;
        info!(worker = self.identity.as_str(), "✅ WORKER: Shutdown complete");
    }
}
