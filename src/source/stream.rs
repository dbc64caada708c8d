//! Push-mode job source.
//!
//! One long-lived subscription per task type. A pump task reads the engine
//! stream into a bounded channel; once the channel is full the pump stops
//! reading, which backpressures the transport instead of piling jobs into
//! memory while their locks tick down.
//!
//! A dead subscription (stream end or transport error) surfaces as an `Err`
//! from `acquire`; the next call reconnects. Fatal errors saved by the pump
//! are returned as-is so authentication failures still stop the worker.

use crate::client::{JobLifecycle, StreamRequest};
use crate::error::{Result, WorkerError};
use crate::registry::HandlerRegistry;
use crate::source::JobSource;
use crate::types::{Job, TaskType};
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

struct Subscription {
    receiver: tokio::sync::Mutex<mpsc::Receiver<Job>>,
    /// Written by the pump before it exits so acquire can report why.
    failure: Arc<Mutex<Option<WorkerError>>>,
    pump: tokio::task::JoinHandle<()>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

pub struct StreamSource {
    engine: Arc<dyn JobLifecycle>,
    registry: Arc<HandlerRegistry>,
    worker: String,
    subscriptions: DashMap<TaskType, Arc<Subscription>>,
}

impl StreamSource {
    pub fn new(
        engine: Arc<dyn JobLifecycle>,
        registry: Arc<HandlerRegistry>,
        worker: String,
    ) -> Self {
        Self {
            engine,
            registry,
            worker,
            subscriptions: DashMap::new(),
        }
    }

    /// Open the subscription for a task type and start its pump.
    ///
    /// Only one dispatcher loop acquires per task type, so there is no
    /// connect race to guard against.
    async fn connect(&self, task_type: &TaskType) -> Result<Arc<Subscription>> {
        let config = self.registry.lookup(task_type)?.config.clone();

        let stream = self
            .engine
            .open_job_stream(StreamRequest {
                task_type: task_type.clone(),
                lock_duration: config.lock_duration(),
                worker: self.worker.clone(),
            })
            .await?;

        info!(
            task_type = %task_type,
            buffer = config.stream_buffer,
            "🔄 STREAM: Subscription opened"
        );

        let (tx, rx) = mpsc::channel(config.stream_buffer);
        let failure: Arc<Mutex<Option<WorkerError>>> = Arc::new(Mutex::new(None));

        let pump_failure = failure.clone();
        let pump_type = task_type.clone();
        let pump = tokio::spawn(async move {
            let mut stream = stream;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(job) => {
                        // send blocks once the buffer is full; that pause is
                        // the backpressure signal to the transport
                        if tx.send(job).await.is_err() {
                            return;
                        }
                    }
                    Err(e) if e.is_fatal() => {
                        warn!(task_type = %pump_type, error = %e, "Job stream failed");
                        *pump_failure.lock() = Some(e);
                        return;
                    }
                    Err(e) => {
                        warn!(task_type = %pump_type, error = %e, "Bad frame on job stream, skipping");
                    }
                }
            }
        });

        let subscription = Arc::new(Subscription {
            receiver: tokio::sync::Mutex::new(rx),
            failure,
            pump,
        });
        self.subscriptions
            .insert(task_type.clone(), subscription.clone());

        Ok(subscription)
    }
}

#[async_trait::async_trait]
impl JobSource for StreamSource {
    async fn acquire(&self, task_type: &TaskType, max_jobs: usize) -> Result<Vec<Job>> {
        let config = self.registry.lookup(task_type)?.config.clone();

        let subscription = match self.subscriptions.get(task_type) {
            Some(entry) => entry.value().clone(),
            None => self.connect(task_type).await?,
        };

        let mut receiver = subscription.receiver.lock().await;

        // Wait up to one poll interval for the first pushed job, then drain
        // greedily without blocking. Returning empty keeps the dispatcher
        // loop responsive to shutdown.
        let first = tokio::time::timeout(config.poll_interval(), receiver.recv()).await;
        match first {
            Err(_) => Ok(Vec::new()),
            Ok(None) => {
                drop(receiver);
                self.subscriptions.remove(task_type);
                let saved = subscription.failure.lock().take();
                Err(saved.unwrap_or_else(|| {
                    WorkerError::TransientNetwork(format!(
                        "Job stream for '{task_type}' ended, reconnecting"
                    ))
                }))
            }
            Ok(Some(job)) => {
                let mut jobs = vec![job];
                while jobs.len() < max_jobs {
                    match receiver.try_recv() {
                        Ok(job) => jobs.push(job),
                        Err(_) => break,
                    }
                }
                Ok(jobs)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskTypeConfig;
    use crate::test_support::MockEngine;
    use crate::types::HandlerResult;

    fn test_registry(task_type: &str, config: TaskTypeConfig) -> Arc<HandlerRegistry> {
        let mut registry = HandlerRegistry::new();
        registry
            .register_fn(task_type, config, |vars| async move {
                HandlerResult::Success(vars)
            })
            .unwrap();
        Arc::new(registry)
    }

    fn test_source(engine: Arc<MockEngine>, config: TaskTypeConfig) -> StreamSource {
        StreamSource::new(
            engine,
            test_registry("enrich-lead", config),
            "test-worker".to_string(),
        )
    }

    #[tokio::test]
    async fn test_acquire_returns_pushed_jobs() {
        let engine = Arc::new(MockEngine::new());
        let source = test_source(engine.clone(), TaskTypeConfig::default());
        let task_type = TaskType::new("enrich-lead");

        engine.stream_job(MockEngine::job(11, "enrich-lead"));
        engine.stream_job(MockEngine::job(12, "enrich-lead"));

        let jobs = source.acquire(&task_type, 8).await.unwrap();
        assert!(!jobs.is_empty());
        let mut seen: Vec<i64> = jobs.iter().map(|j| j.job_key).collect();

        // anything not drained in the first batch is still buffered
        while seen.len() < 2 {
            let more = source.acquire(&task_type, 8).await.unwrap();
            seen.extend(more.iter().map(|j| j.job_key));
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![11, 12]);
    }

    #[tokio::test]
    async fn test_acquire_respects_max_jobs() {
        let engine = Arc::new(MockEngine::new());
        let source = test_source(engine.clone(), TaskTypeConfig::default());
        let task_type = TaskType::new("enrich-lead");

        // open the subscription, then let the pump buffer everything
        let _ = source.acquire(&task_type, 1).await.unwrap();
        for key in 1..=4 {
            engine.stream_job(MockEngine::job(key, "enrich-lead"));
        }
        crate::test_support::wait_for(|| engine.stream_delivered() >= 4).await;

        let jobs = source.acquire(&task_type, 2).await.unwrap();
        assert!(jobs.len() <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_stream_returns_empty_after_interval() {
        let engine = Arc::new(MockEngine::new());
        let config = TaskTypeConfig {
            poll_interval_ms: 500,
            ..Default::default()
        };
        let source = test_source(engine, config);

        let started = tokio::time::Instant::now();
        let jobs = source.acquire(&TaskType::new("enrich-lead"), 4).await.unwrap();
        assert!(jobs.is_empty());
        assert!(started.elapsed() >= std::time::Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_closed_stream_errors_then_reconnects() {
        let engine = Arc::new(MockEngine::new());
        let source = test_source(engine.clone(), TaskTypeConfig::default());
        let task_type = TaskType::new("enrich-lead");

        engine.stream_job(MockEngine::job(21, "enrich-lead"));
        let jobs = source.acquire(&task_type, 4).await.unwrap();
        assert_eq!(jobs[0].job_key, 21);

        engine.close_stream("enrich-lead");
        let err = source.acquire(&task_type, 4).await.unwrap_err();
        assert!(err.is_transient());

        // next acquire opens a fresh subscription
        engine.stream_job(MockEngine::job(22, "enrich-lead"));
        let jobs = source.acquire(&task_type, 4).await.unwrap();
        assert_eq!(jobs[0].job_key, 22);
        assert_eq!(engine.stream_opens("enrich-lead"), 2);
    }
}
