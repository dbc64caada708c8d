//! Per-task-type dispatch loop.
//!
//! Each registered task type gets one loop: acquire jobs from the source
//! while slots are free, spawn an execution unit per job, and keep the
//! per-type concurrency ceiling exact by holding one semaphore permit per
//! in-flight job until its outcome report finishes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::TaskTypeConfig;
use crate::dispatch::execution::ExecutionUnit;
use crate::dispatch::ShutdownSignal;
use crate::error::WorkerError;
use crate::source::JobSource;
use crate::types::TaskType;

/// First backoff after a transient acquire failure. Doubles per consecutive
/// failure up to [`ERROR_BACKOFF_MAX`], resets on the next success.
const ERROR_BACKOFF_BASE: Duration = Duration::from_secs(1);
const ERROR_BACKOFF_MAX: Duration = Duration::from_secs(30);

pub struct Dispatcher {
    task_type: TaskType,
    config: TaskTypeConfig,
    source: Arc<dyn JobSource>,
    unit: Arc<ExecutionUnit>,
    semaphore: Arc<Semaphore>,
    shutdown: Arc<ShutdownSignal>,
    fatal_tx: mpsc::UnboundedSender<WorkerError>,
    grace: Duration,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_type: TaskType,
        config: TaskTypeConfig,
        source: Arc<dyn JobSource>,
        unit: Arc<ExecutionUnit>,
        shutdown: Arc<ShutdownSignal>,
        fatal_tx: mpsc::UnboundedSender<WorkerError>,
        grace: Duration,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        Self {
            task_type,
            config,
            source,
            unit,
            semaphore,
            shutdown,
            fatal_tx,
            grace,
        }
    }

    /// Drive the loop until shutdown or a fatal error, then drain in-flight
    /// jobs within the grace period.
    pub async fn run(self) {
        info!(
            task_type = %self.task_type,
            max_concurrent = self.config.max_concurrent_jobs,
            "🎯 DISPATCHER: Starting loop"
        );

        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut backoff = ERROR_BACKOFF_BASE;

        loop {
            if self.shutdown.is_shutdown() {
                break;
            }

            // Reap finished execution units so the set does not grow
            // unbounded on a long-lived worker.
            while in_flight.try_join_next().is_some() {}

            // All slots busy: wait for a permit to free up (or shutdown),
            // then re-evaluate. The probe permit is released immediately so
            // the acquisition below sees the true free count.
            if self.semaphore.available_permits() == 0 {
                tokio::select! {
                    permit = self.semaphore.clone().acquire_owned() => {
                        if let Ok(permit) = permit {
                            drop(permit);
                        }
                    }
                    _ = self.shutdown.notified() => {}
                }
                continue;
            }

            let slots = self.semaphore.available_permits();
            match self.source.acquire(&self.task_type, slots).await {
                Ok(jobs) => {
                    backoff = ERROR_BACKOFF_BASE;
                    if jobs.is_empty() {
                        continue;
                    }
                    info!(
                        task_type = %self.task_type,
                        count = jobs.len(),
                        "📨 DISPATCHER: Acquired jobs"
                    );
                    for job in jobs {
                        if self.shutdown.is_shutdown() {
                            warn!(
                                job_key = job.job_key,
                                task_type = %self.task_type,
                                "Shutdown during dispatch, abandoning leased job to lock expiry"
                            );
                            continue;
                        }
                        let permit = tokio::select! {
                            permit = self.semaphore.clone().acquire_owned() => match permit {
                                Ok(permit) => permit,
                                Err(_) => break,
                            },
                            _ = self.shutdown.notified() => {
                                warn!(
                                    job_key = job.job_key,
                                    task_type = %self.task_type,
                                    "Shutdown while waiting for a slot, abandoning leased job"
                                );
                                continue;
                            }
                        };
                        let unit = self.unit.clone();
                        in_flight.spawn(async move {
                            unit.run(job).await;
                            drop(permit);
                        });
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(
                        task_type = %self.task_type,
                        error = %e,
                        "🛑 DISPATCHER: Fatal error, requesting worker shutdown"
                    );
                    let _ = self.fatal_tx.send(e);
                    break;
                }
                Err(e) => {
                    warn!(
                        task_type = %self.task_type,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Job acquisition failed, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = self.shutdown.notified() => break,
                    }
                    backoff = (backoff * 2).min(ERROR_BACKOFF_MAX);
                }
            }
        }

        self.drain(in_flight).await;
        info!(task_type = %self.task_type, "✅ DISPATCHER: Loop finished");
    }

    /// Let in-flight jobs finish within the grace period; whatever remains
    /// is force-cancelled and abandoned to lock expiry.
    async fn drain(&self, mut in_flight: JoinSet<()>) {
        if in_flight.is_empty() {
            return;
        }
        info!(
            task_type = %self.task_type,
            in_flight = in_flight.len(),
            grace_ms = self.grace.as_millis() as u64,
            "🛑 DISPATCHER: Draining in-flight jobs"
        );
        let drained = tokio::time::timeout(self.grace, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                task_type = %self.task_type,
                remaining = in_flight.len(),
                "Grace period expired, cancelling remaining executions"
            );
            in_flight.abort_all();
            while in_flight.join_next().await.is_some() {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::JobLifecycle;
    use crate::config::AcquisitionMode;
    use crate::dispatch::reporter::Reporter;
    use crate::registry::HandlerRegistry;
    use crate::source::build_source;
    use crate::test_support::{wait_for, MockEngine};
    use crate::types::{HandlerResult, RetryPolicy, Variables};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Harness {
        engine: Arc<MockEngine>,
        shutdown: Arc<ShutdownSignal>,
        fatal_rx: mpsc::UnboundedReceiver<WorkerError>,
        handle: tokio::task::JoinHandle<()>,
    }

    fn spawn_dispatcher<H>(task_type: &str, config: TaskTypeConfig, handler: H) -> Harness
    where
        H: crate::types::JobHandler + 'static,
    {
        let engine = Arc::new(MockEngine::new());
        let mut registry = HandlerRegistry::new();
        registry
            .register(task_type, config.clone(), Arc::new(handler))
            .unwrap();
        let registry = Arc::new(registry);

        let lifecycle: Arc<dyn JobLifecycle> = engine.clone();
        let source = build_source(
            AcquisitionMode::Poll,
            lifecycle.clone(),
            registry.clone(),
            "test-worker".to_string(),
        );
        let reporter = Arc::new(Reporter::new(lifecycle, RetryPolicy::default()));
        let registration = registry.lookup(&TaskType::new(task_type)).unwrap().clone();
        let unit = Arc::new(ExecutionUnit::new(
            registration.handler,
            config.clone(),
            reporter,
        ));

        let shutdown = Arc::new(ShutdownSignal::new());
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            TaskType::new(task_type),
            config,
            source,
            unit,
            shutdown.clone(),
            fatal_tx,
            Duration::from_secs(5),
        );
        let handle = tokio::spawn(dispatcher.run());

        Harness {
            engine,
            shutdown,
            fatal_rx,
            handle,
        }
    }

    fn fast_config(max_concurrent: usize) -> TaskTypeConfig {
        TaskTypeConfig {
            max_concurrent_jobs: max_concurrent,
            poll_interval_ms: 20,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatcher_completes_acquired_jobs() {
        let handler = crate::types::FnHandler(|_vars: Variables| async {
            HandlerResult::from_value(serde_json::json!({"notificationSent": true}))
        });
        let mut harness = spawn_dispatcher("notify-success", fast_config(4), handler);

        for key in [1_i64, 2, 3] {
            harness.engine.push_job(MockEngine::job(key, "notify-success"));
        }

        wait_for(|| harness.engine.completions().len() == 3).await;
        harness.shutdown.trigger();
        harness.handle.await.unwrap();

        assert!(harness.engine.incidents().is_empty());
        assert!(harness.fatal_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_ceiling_never_exceeded() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (current_in, peak_in) = (current.clone(), peak.clone());

        let handler = crate::types::FnHandler(move |_vars: Variables| {
            let current = current_in.clone();
            let peak = peak_in.clone();
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                HandlerResult::empty()
            }
        });
        let harness = spawn_dispatcher("lead-enrichment", fast_config(2), handler);

        for key in 1_i64..=8 {
            harness.engine.push_job(MockEngine::job(key, "lead-enrichment"));
        }

        wait_for(|| harness.engine.completions().len() == 8).await;
        harness.shutdown.trigger();
        harness.handle.await.unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_requests_worker_shutdown() {
        let handler =
            crate::types::FnHandler(|_vars: Variables| async { HandlerResult::empty() });
        let mut harness = spawn_dispatcher("validate-lead", fast_config(2), handler);

        harness.engine.set_auth_failure(true);

        let fatal = harness.fatal_rx.recv().await;
        assert!(matches!(fatal, Some(WorkerError::AuthenticationFailed(_))));
        harness.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_acquire_errors_back_off_and_recover() {
        let handler =
            crate::types::FnHandler(|_vars: Variables| async { HandlerResult::empty() });
        let harness = spawn_dispatcher("store-lead", fast_config(2), handler);

        harness.engine.fail_leases(2);
        harness.engine.push_job(MockEngine::job(9, "store-lead"));

        wait_for(|| harness.engine.completions().len() == 1).await;
        harness.shutdown.trigger();
        harness.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_in_flight_jobs() {
        let handler = crate::types::FnHandler(|_vars: Variables| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            HandlerResult::empty()
        });
        let harness = spawn_dispatcher("store-lead", fast_config(2), handler);

        harness.engine.push_job(MockEngine::job(10, "store-lead"));
        harness.engine.push_job(MockEngine::job(11, "store-lead"));
        wait_for(|| harness.engine.is_leased(10) && harness.engine.is_leased(11)).await;

        harness.shutdown.trigger();
        harness.handle.await.unwrap();

        // Both in-flight jobs finished and reported inside the grace period.
        assert_eq!(harness.engine.completions().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_expiry_force_cancels_handlers() {
        let finished = Arc::new(AtomicBool::new(false));
        let handler_finished = finished.clone();
        let handler = crate::types::FnHandler(move |_vars: Variables| {
            let finished = handler_finished.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(600)).await;
                finished.store(true, Ordering::SeqCst);
                HandlerResult::empty()
            }
        });
        let harness = spawn_dispatcher("lead-enrichment", fast_config(2), handler);

        harness.engine.push_job(MockEngine::job(21, "lead-enrichment"));
        wait_for(|| harness.engine.is_leased(21)).await;

        harness.shutdown.trigger();
        harness.handle.await.unwrap();

        // The straggler outlived the 5s grace and was abandoned unreported.
        assert!(harness.engine.completions().is_empty());
        assert!(harness.engine.incidents().is_empty());
        // Its handler went down with it: advancing past the handler's sleep
        // would let a leaked task finish and flip the flag.
        tokio::time::sleep(Duration::from_secs(700)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
