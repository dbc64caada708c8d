//! # Worker Types
//!
//! Core types and data structures shared across the dispatch core: jobs,
//! handler results, engine-facing outcomes, and retry policy.
//!
//! A `Job` is one leased unit of work. A handler produces a
//! [`HandlerResult`]; the execution unit converts that (plus the job's
//! remaining retry budget) into a [`JobOutcome`], which the reporter maps
//! onto the engine's lifecycle API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Variable payload attached to a job: name → JSON value.
pub type Variables = serde_json::Map<String, serde_json::Value>;

/// Named category of work; determines which handler processes a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(pub String);

impl TaskType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskType {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// One unit of work leased from the engine.
///
/// Owned exclusively by one execution unit until its outcome is reported
/// or the lock expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Engine-assigned opaque identifier.
    pub job_key: i64,
    pub task_type: TaskType,
    pub process_instance_key: i64,
    #[serde(default)]
    pub variables: Variables,
    /// Retries remaining before a failure escalates to an incident.
    pub retries: u32,
    /// Lock expiry. The engine may reassign the job after this instant.
    pub deadline: DateTime<Utc>,
}

impl Job {
    /// Time left on the lease, saturating at zero once expired.
    pub fn time_until_deadline(&self) -> Duration {
        (self.deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

/// What a handler invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerResult {
    /// Handler finished; variables are merged back into the process instance.
    Success(Variables),
    /// Expected business-rule rejection. Retried while the job has budget.
    Failure { message: String, retryable: bool },
    /// Unrecoverable condition the engine should surface as an incident.
    Error { message: String },
}

impl HandlerResult {
    /// Success with no output variables.
    pub fn empty() -> Self {
        HandlerResult::Success(Variables::new())
    }

    /// Success from any JSON object value. Non-object values are wrapped
    /// under a `"result"` key so output is always a variables mapping.
    pub fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(map) => HandlerResult::Success(map),
            other => {
                let mut map = Variables::new();
                map.insert("result".to_string(), other);
                HandlerResult::Success(map)
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, HandlerResult::Success(_))
    }
}

/// Engine-facing report decided by the execution unit.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Complete the job, merging variables into the process instance.
    Complete { variables: Variables },
    /// Fail the job, leaving `retries_remaining` attempts on the budget.
    Fail {
        message: String,
        retries_remaining: u32,
        retry_backoff: Duration,
    },
    /// Raise an incident; the engine stops retrying and flags the instance.
    Incident { message: String },
}

impl JobOutcome {
    /// Stable tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            JobOutcome::Complete { .. } => "complete",
            JobOutcome::Fail { .. } => "fail",
            JobOutcome::Incident { .. } => "incident",
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, JobOutcome::Complete { .. })
    }

    pub fn is_incident(&self) -> bool {
        matches!(self, JobOutcome::Incident { .. })
    }
}

/// Retry policy for engine calls (reporting and leasing transport retries).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, or `None` once attempts are exhausted.
    /// `attempt` counts completed attempts, starting at 0.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt + 1 >= self.max_attempts {
            return None;
        }

        // Clamp in f64 before building a Duration: the exponential blows
        // past Duration's range within a few dozen attempts.
        let max_delay_ms = self.max_delay_ms as f64;
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let delay_ms = (self.base_delay_ms as f64 * factor).min(max_delay_ms);

        if self.jitter {
            let jitter = fastrand::f64() * 0.1; // 10% jitter
            let jittered_ms = (delay_ms * (1.0 + jitter)).min(max_delay_ms);
            Some(Duration::from_millis(jittered_ms as u64))
        } else {
            Some(Duration::from_millis(delay_ms as u64))
        }
    }
}

/// Job handler trait for the registry.
///
/// Handlers receive a read-only view of the job's variables and return a
/// [`HandlerResult`]. They are invoked at-least-once per job under
/// lock-expiry races, so they must tolerate re-invocation.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, variables: &Variables) -> HandlerResult;
}

/// Adapter so plain async closures can be registered as handlers.
pub struct FnHandler<F>(pub F);

#[async_trait::async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Variables) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = HandlerResult> + Send,
{
    async fn execute(&self, variables: &Variables) -> HandlerResult {
        (self.0)(variables.clone()).await
    }
}
