//! Outcome delivery with bounded retry.
//!
//! The reporter is the only component that talks back to the engine about a
//! finished job. Delivery failures never crash the worker: transient
//! transport errors are retried on the configured policy, everything else is
//! logged and the job is left to reappear when its lock expires.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::client::JobLifecycle;
use crate::error::Result;
use crate::types::{Job, JobOutcome, RetryPolicy};

pub struct Reporter {
    engine: Arc<dyn JobLifecycle>,
    policy: RetryPolicy,
}

impl Reporter {
    pub fn new(engine: Arc<dyn JobLifecycle>, policy: RetryPolicy) -> Self {
        Self { engine, policy }
    }

    /// Deliver one outcome for one job.
    ///
    /// At most one engine call succeeds per job: the loop exits on the first
    /// accepted delivery, so a job is never both completed and failed. When
    /// the retry budget runs out the job is abandoned to lock expiry, which
    /// trades duplicate execution later for never losing the job.
    pub async fn report(&self, job: &Job, outcome: JobOutcome) {
        let kind = outcome.kind();
        let mut attempt: u32 = 0;

        loop {
            match self.deliver(job, &outcome).await {
                Ok(()) => {
                    debug!(
                        job_key = job.job_key,
                        task_type = %job.task_type,
                        outcome = kind,
                        "Outcome delivered to engine"
                    );
                    return;
                }
                Err(e) if e.is_transient() => match self.policy.delay_for_attempt(attempt) {
                    Some(delay) => {
                        warn!(
                            job_key = job.job_key,
                            outcome = kind,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Outcome delivery failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        warn!(
                            job_key = job.job_key,
                            task_type = %job.task_type,
                            outcome = kind,
                            attempts = attempt + 1,
                            error = %e,
                            "Outcome delivery exhausted retries, abandoning job to lock expiry"
                        );
                        return;
                    }
                },
                Err(e) => {
                    error!(
                        job_key = job.job_key,
                        task_type = %job.task_type,
                        outcome = kind,
                        error = %e,
                        "Engine rejected outcome report, abandoning job to lock expiry"
                    );
                    return;
                }
            }
        }
    }

    async fn deliver(&self, job: &Job, outcome: &JobOutcome) -> Result<()> {
        match outcome {
            JobOutcome::Complete { variables } => {
                self.engine.complete_job(job.job_key, variables).await
            }
            JobOutcome::Fail {
                message,
                retries_remaining,
                retry_backoff,
            } => {
                self.engine
                    .fail_job(job.job_key, message, *retries_remaining, *retry_backoff)
                    .await
            }
            JobOutcome::Incident { message } => {
                self.engine.raise_incident(job.job_key, message).await
            }
        }
    }
}
