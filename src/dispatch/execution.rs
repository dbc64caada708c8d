//! Single-job execution: run a handler under a deadline, map its result to
//! an engine-facing outcome, and hand that outcome to the reporter.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::TaskTypeConfig;
use crate::dispatch::reporter::Reporter;
use crate::types::{HandlerResult, Job, JobHandler, JobOutcome};

/// Portion of the lock reserved for delivering the outcome report.
const REPORT_MARGIN: Duration = Duration::from_secs(2);

/// Floor for the handler budget so a nearly expired lease still gets a
/// chance to produce an outcome instead of being dropped on arrival.
const MIN_EXECUTION_BUDGET: Duration = Duration::from_secs(1);

/// Owning handle for a spawned handler invocation; aborts the task on drop.
/// Dropping mid-await is how a cancelled execution unit takes its handler
/// down with it instead of detaching it.
struct HandlerTask(tokio::task::JoinHandle<HandlerResult>);

impl Drop for HandlerTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs jobs of one task type: handler invocation, deadline enforcement,
/// outcome mapping. One instance per registered task type, shared by all
/// in-flight jobs of that type.
pub struct ExecutionUnit {
    handler: Arc<dyn JobHandler>,
    config: TaskTypeConfig,
    reporter: Arc<Reporter>,
}

impl ExecutionUnit {
    pub fn new(handler: Arc<dyn JobHandler>, config: TaskTypeConfig, reporter: Arc<Reporter>) -> Self {
        Self {
            handler,
            config,
            reporter,
        }
    }

    /// Run one job to a single outcome and report it.
    ///
    /// Every path converges on exactly one report: success, handler failure,
    /// panic, and deadline overrun all map to one engine-facing verdict. This
    /// method never returns an error; delivery problems are the reporter's
    /// concern.
    pub async fn run(&self, job: Job) {
        let started = Instant::now();
        let job_key = job.job_key;
        let task_type = job.task_type.clone();

        let outcome = self.execute_with_deadline(&job).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if outcome.is_incident() {
            warn!(
                job_key = job_key,
                task_type = %task_type,
                elapsed_ms = elapsed_ms,
                outcome = outcome.kind(),
                "⚠️ EXECUTION: Job escalated to incident"
            );
        } else {
            info!(
                job_key = job_key,
                task_type = %task_type,
                elapsed_ms = elapsed_ms,
                outcome = outcome.kind(),
                "✅ EXECUTION: Job finished"
            );
        }

        self.reporter.report(&job, outcome).await;
    }

    /// Invoke the handler on its own task and race it against the execution
    /// budget. The task dies when its [`HandlerTask`] handle drops, so a
    /// deadline overrun here and a cancellation of the whole unit (shutdown
    /// grace expiry) both kill the handler rather than leaving it running.
    async fn execute_with_deadline(&self, job: &Job) -> JobOutcome {
        let budget = self.execution_budget(job);
        let handler = self.handler.clone();
        let variables = job.variables.clone();

        let mut task = HandlerTask(tokio::spawn(async move {
            handler.execute(&variables).await
        }));

        match tokio::time::timeout(budget, &mut task.0).await {
            Ok(Ok(result)) => self.outcome_for(job, result),
            Ok(Err(join_error)) => {
                let message = if join_error.is_panic() {
                    let payload = join_error.into_panic();
                    let detail = payload
                        .downcast_ref::<&str>()
                        .map(ToString::to_string)
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "opaque panic payload".to_string());
                    format!("Handler panicked: {detail}")
                } else {
                    "Handler task was cancelled before producing a result".to_string()
                };
                JobOutcome::Incident { message }
            }
            Err(_elapsed) => JobOutcome::Incident {
                message: format!(
                    "Handler exceeded execution deadline of {}ms",
                    budget.as_millis()
                ),
            },
        }
    }

    /// Map a handler verdict to the engine-facing outcome, consuming one
    /// retry from the job's budget on retryable failures.
    fn outcome_for(&self, job: &Job, result: HandlerResult) -> JobOutcome {
        match result {
            HandlerResult::Success(variables) => JobOutcome::Complete { variables },
            HandlerResult::Failure { message, retryable } => {
                if retryable && job.retries > 0 {
                    JobOutcome::Fail {
                        message,
                        retries_remaining: job.retries - 1,
                        retry_backoff: self.config.retry_backoff(),
                    }
                } else {
                    let message = if retryable {
                        format!("Retry budget exhausted: {message}")
                    } else {
                        message
                    };
                    JobOutcome::Incident { message }
                }
            }
            HandlerResult::Error { message } => JobOutcome::Incident { message },
        }
    }

    /// Time the handler may run: whatever remains of the lock, minus the
    /// report margin. An expired or nearly expired lease is clamped to the
    /// floor, never granted a fresh lock's worth of time.
    fn execution_budget(&self, job: &Job) -> Duration {
        job.time_until_deadline()
            .saturating_sub(REPORT_MARGIN)
            .max(MIN_EXECUTION_BUDGET)
    }
}
