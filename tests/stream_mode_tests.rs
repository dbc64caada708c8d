//! Worker behavior in stream acquisition mode: pushed jobs flow through the
//! same dispatch core, subscriptions survive engine-side disconnects, and
//! the concurrency ceiling holds against pushed bursts.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{jane_doe, job_with_variables, started_pipeline_worker, started_worker};
use leadflow_worker::config::{AcquisitionMode, TaskTypeConfig};
use leadflow_worker::registry::HandlerRegistry;
use leadflow_worker::test_support::{wait_for, MockEngine};
use leadflow_worker::types::{HandlerResult, JobHandler, Variables};
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn test_streamed_jobs_complete_end_to_end() {
    let engine = Arc::new(MockEngine::new());
    let mut worker = started_pipeline_worker(engine.clone(), AcquisitionMode::Stream).await;

    for key in 1_i64..=5 {
        engine.stream_job(job_with_variables(key, "validate-lead", jane_doe()));
    }

    wait_for(|| engine.completions().len() == 5).await;
    for (_, variables) in engine.completions() {
        assert_eq!(variables["leadValid"], json!(true));
    }
    assert!(engine.incidents().is_empty());

    worker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_subscription_reopens_after_disconnect() {
    let engine = Arc::new(MockEngine::new());
    let mut worker = started_pipeline_worker(engine.clone(), AcquisitionMode::Stream).await;

    engine.stream_job(job_with_variables(10, "validate-lead", jane_doe()));
    wait_for(|| engine.completions().len() == 1).await;

    engine.close_stream("validate-lead");

    // jobs pushed while disconnected are delivered on the reopened stream
    engine.stream_job(job_with_variables(11, "validate-lead", jane_doe()));
    wait_for(|| engine.completions().len() == 2).await;
    assert!(engine.stream_opens("validate-lead") >= 2);

    worker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_pushed_burst_respects_concurrency_ceiling() {
    struct SlowCountingHandler {
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl JobHandler for SlowCountingHandler {
        async fn execute(&self, _variables: &Variables) -> HandlerResult {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(40)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            HandlerResult::empty()
        }
    }

    let peak = Arc::new(AtomicUsize::new(0));
    let engine = Arc::new(MockEngine::new());
    let mut registry = HandlerRegistry::new();
    registry
        .register(
            "lead-enrichment",
            TaskTypeConfig {
                max_concurrent_jobs: 2,
                poll_interval_ms: 20,
                stream_buffer: 4,
                ..Default::default()
            },
            Arc::new(SlowCountingHandler {
                current: Arc::new(AtomicUsize::new(0)),
                peak: peak.clone(),
            }),
        )
        .unwrap();
    let mut worker = started_worker(engine.clone(), AcquisitionMode::Stream, registry).await;

    for key in 1_i64..=10 {
        engine.stream_job(MockEngine::job(key, "lead-enrichment"));
    }

    wait_for(|| engine.completions().len() == 10).await;
    assert!(peak.load(Ordering::SeqCst) <= 2);

    worker.shutdown().await;
}
