//! # Dispatch Core
//!
//! The scheduling heart of the worker: per-task-type loops that pump jobs
//! from a [`crate::source::JobSource`], execution units that run exactly one
//! handler invocation under a deadline, and the reporter that delivers
//! outcomes back to the engine.
//!
//! ## Architecture
//!
//! ```text
//! Dispatcher (one loop per task type)
//! ├── Semaphore            (per-type concurrency ceiling, exact)
//! ├── ExecutionUnit        (handler invocation, deadline, outcome)
//! └── Reporter             (outcome delivery with bounded retry)
//! ```
//!
//! Loops share nothing across task types except the engine client and the
//! read-only registry, so a stalled type never starves another.

pub mod dispatcher;
pub mod execution;
pub mod reporter;

// Re-export main types for easy access
pub use dispatcher::Dispatcher;
pub use execution::ExecutionUnit;
pub use reporter::Reporter;

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Worker-wide shutdown signal shared by every dispatcher loop.
///
/// Trigger is sticky: loops that check after the fact still observe it, and
/// waiters blocked on `notified` are woken.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    shutting_down: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Wait for the signal. Returns immediately if already triggered.
    pub async fn notified(&self) {
        // Create the future before checking the flag so a trigger landing
        // between the check and the await still wakes us.
        let notified = self.notify.notified();
        if self.is_shutdown() {
            return;
        }
        notified.await;
    }
}
