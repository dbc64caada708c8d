//! Pull-mode job source.
//!
//! One lease request per acquire call. When the engine returns nothing the
//! source sleeps its poll interval before handing the empty batch back, so
//! the dispatcher loop never spins hot against an idle engine.

use crate::client::{JobLifecycle, LeaseRequest};
use crate::error::Result;
use crate::registry::HandlerRegistry;
use crate::source::JobSource;
use crate::types::{Job, TaskType};
use std::sync::Arc;
use tracing::debug;

pub struct PollSource {
    engine: Arc<dyn JobLifecycle>,
    registry: Arc<HandlerRegistry>,
    worker: String,
}

impl PollSource {
    pub fn new(
        engine: Arc<dyn JobLifecycle>,
        registry: Arc<HandlerRegistry>,
        worker: String,
    ) -> Self {
        Self {
            engine,
            registry,
            worker,
        }
    }
}

#[async_trait::async_trait]
impl JobSource for PollSource {
    async fn acquire(&self, task_type: &TaskType, max_jobs: usize) -> Result<Vec<Job>> {
        let config = self.registry.lookup(task_type)?.config.clone();
        let max_jobs = (max_jobs as u32).min(config.max_jobs_per_acquire);

        let jobs = self
            .engine
            .lease_jobs(LeaseRequest {
                task_type: task_type.clone(),
                max_jobs,
                lock_duration: config.lock_duration(),
                worker: self.worker.clone(),
            })
            .await?;

        if jobs.is_empty() {
            debug!(task_type = %task_type, "No jobs pending, waiting poll interval");
            tokio::time::sleep(config.poll_interval()).await;
        }

        Ok(jobs)
    }
}
