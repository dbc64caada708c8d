//! # Job Source Adapters
//!
//! Two acquisition styles, one contract. The dispatcher asks a
//! [`JobSource`] for up to N locked jobs of one task type and stays
//! agnostic to how they arrive:
//!
//! - **PollSource**: issues a lease request per call and owns the re-poll
//!   wait when the engine has nothing pending.
//! - **StreamSource**: keeps one long-lived subscription per task type,
//!   buffers pushed jobs, and stops reading the transport once the buffer
//!   is full (backpressure against the engine).
//!
//! The mode is a deployment choice made in configuration, not a code path.

pub mod poll;
pub mod stream;

// Re-export main types for easy access
pub use poll::PollSource;
pub use stream::StreamSource;

use crate::client::JobLifecycle;
use crate::config::AcquisitionMode;
use crate::error::Result;
use crate::registry::HandlerRegistry;
use crate::types::{Job, TaskType};
use std::sync::Arc;

/// Uniform acquisition contract over pull and push transports.
///
/// `acquire` waits internally for its mode's natural interval when no work
/// is available and then returns an empty batch; an empty result is never
/// an error. Callers re-invoke it in a loop and only back off on `Err`.
#[async_trait::async_trait]
pub trait JobSource: Send + Sync {
    /// Up to `max_jobs` jobs of `task_type`, locked to this worker.
    async fn acquire(&self, task_type: &TaskType, max_jobs: usize) -> Result<Vec<Job>>;
}

/// Build the configured source over the given engine connection.
pub fn build_source(
    mode: AcquisitionMode,
    engine: Arc<dyn JobLifecycle>,
    registry: Arc<HandlerRegistry>,
    worker: String,
) -> Arc<dyn JobSource> {
    match mode {
        AcquisitionMode::Poll => Arc::new(PollSource::new(engine, registry, worker)),
        AcquisitionMode::Stream => Arc::new(StreamSource::new(engine, registry, worker)),
    }
}
