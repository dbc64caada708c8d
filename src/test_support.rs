//! In-process engine double for worker tests.
//!
//! [`MockEngine`] implements [`crate::client::JobLifecycle`] over plain
//! in-memory queues: tests push jobs, the worker leases and reports them,
//! tests then assert on the recorded calls. Error injection knobs cover the
//! transient, rejection, and authentication paths without a network.
//!
//! Lease uniqueness is enforced the way the real engine does it: a job key
//! with a live lock is never handed out again until its outcome is reported.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::client::{
    BrokerInfo, ClusterTopology, JobLifecycle, JobStream, LeaseRequest, StreamRequest,
};
use crate::error::{Result, WorkerError};
use crate::types::{Job, TaskType, Variables};

#[derive(Default)]
struct MockState {
    pending: HashMap<String, VecDeque<Job>>,
    live: HashMap<i64, Job>,
    completions: Vec<(i64, Variables)>,
    failures: Vec<(i64, String, u32, Duration)>,
    incidents: Vec<(i64, String)>,
    report_attempts: usize,
    lease_calls: usize,
    fail_reports_remaining: usize,
    reject_reports: bool,
    fail_leases_remaining: usize,
    auth_failure: bool,
    stream_senders: HashMap<String, mpsc::UnboundedSender<Result<Job>>>,
    stream_pending: HashMap<String, VecDeque<Job>>,
    stream_opens: HashMap<String, usize>,
    stream_delivered: usize,
}

#[derive(Default)]
pub struct MockEngine {
    state: Mutex<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// A job template with a far-off deadline and a fresh retry budget.
    pub fn job(job_key: i64, task_type: &str) -> Job {
        Job {
            job_key,
            task_type: TaskType::new(task_type),
            process_instance_key: 1_000 + job_key,
            variables: Variables::new(),
            retries: 3,
            deadline: Utc::now() + chrono::Duration::seconds(300),
        }
    }

    /// Queue a job for pickup by the next matching lease request.
    pub fn push_job(&self, job: Job) {
        let mut state = self.state.lock();
        state
            .pending
            .entry(job.task_type.to_string())
            .or_default()
            .push_back(job);
    }

    /// Deliver a job over the push stream for its task type, or buffer it
    /// until that stream is opened.
    pub fn stream_job(&self, job: Job) {
        let state = &mut *self.state.lock();
        let key = job.task_type.to_string();
        if let Some(sender) = state.stream_senders.get(&key) {
            if sender.send(Ok(job.clone())).is_ok() {
                state.live.insert(job.job_key, job);
                state.stream_delivered += 1;
                return;
            }
            state.stream_senders.remove(&key);
        }
        state.stream_pending.entry(key).or_default().push_back(job);
    }

    /// End the push stream for a task type, as an engine-side disconnect
    /// would.
    pub fn close_stream(&self, task_type: &str) {
        self.state.lock().stream_senders.remove(task_type);
    }

    pub fn is_leased(&self, job_key: i64) -> bool {
        self.state.lock().live.contains_key(&job_key)
    }

    pub fn completions(&self) -> Vec<(i64, Variables)> {
        self.state.lock().completions.clone()
    }

    pub fn failures(&self) -> Vec<(i64, String, u32, Duration)> {
        self.state.lock().failures.clone()
    }

    pub fn incidents(&self) -> Vec<(i64, String)> {
        self.state.lock().incidents.clone()
    }

    /// Every report call seen, including ones that were failed or rejected
    /// by injection.
    pub fn report_attempts(&self) -> usize {
        self.state.lock().report_attempts
    }

    pub fn lease_calls(&self) -> usize {
        self.state.lock().lease_calls
    }

    pub fn stream_opens(&self, task_type: &str) -> usize {
        self.state
            .lock()
            .stream_opens
            .get(task_type)
            .copied()
            .unwrap_or(0)
    }

    pub fn stream_delivered(&self) -> usize {
        self.state.lock().stream_delivered
    }

    /// Fail the next `count` report calls with a transient transport error.
    pub fn fail_reports(&self, count: usize) {
        self.state.lock().fail_reports_remaining = count;
    }

    /// Reject every report call as a non-retryable engine error.
    pub fn reject_reports(&self) {
        self.state.lock().reject_reports = true;
    }

    /// Fail the next `count` lease calls with a transient transport error.
    pub fn fail_leases(&self, count: usize) {
        self.state.lock().fail_leases_remaining = count;
    }

    /// Make lease, stream-open, and topology calls fail authentication.
    pub fn set_auth_failure(&self, enabled: bool) {
        self.state.lock().auth_failure = enabled;
    }

    fn check_report_injection(state: &mut MockState) -> Result<()> {
        state.report_attempts += 1;
        if state.fail_reports_remaining > 0 {
            state.fail_reports_remaining -= 1;
            return Err(WorkerError::TransientNetwork(
                "Injected report transport failure".to_string(),
            ));
        }
        if state.reject_reports {
            return Err(WorkerError::EngineRejected {
                status: 400,
                message: "Injected report rejection".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl JobLifecycle for MockEngine {
    async fn lease_jobs(&self, request: LeaseRequest) -> Result<Vec<Job>> {
        let state = &mut *self.state.lock();
        state.lease_calls += 1;

        if state.auth_failure {
            return Err(WorkerError::AuthenticationFailed(
                "Injected authentication failure".to_string(),
            ));
        }
        if state.fail_leases_remaining > 0 {
            state.fail_leases_remaining -= 1;
            return Err(WorkerError::TransientNetwork(
                "Injected lease transport failure".to_string(),
            ));
        }

        let key = request.task_type.to_string();
        let mut leased = Vec::new();
        let deadline = Utc::now()
            + chrono::Duration::milliseconds(request.lock_duration.as_millis() as i64);

        if let Some(queue) = state.pending.get_mut(&key) {
            let mut skipped = VecDeque::new();
            while leased.len() < request.max_jobs as usize {
                let Some(mut job) = queue.pop_front() else {
                    break;
                };
                // single live lease per key: locked jobs stay queued
                if state.live.contains_key(&job.job_key) {
                    skipped.push_back(job);
                    continue;
                }
                job.deadline = deadline;
                leased.push(job);
            }
            while let Some(job) = skipped.pop_back() {
                queue.push_front(job);
            }
        }

        for job in &leased {
            state.live.insert(job.job_key, job.clone());
        }
        Ok(leased)
    }

    async fn complete_job(&self, job_key: i64, variables: &Variables) -> Result<()> {
        let state = &mut *self.state.lock();
        Self::check_report_injection(state)?;
        state.live.remove(&job_key);
        state.completions.push((job_key, variables.clone()));
        Ok(())
    }

    async fn fail_job(
        &self,
        job_key: i64,
        error_message: &str,
        retries_remaining: u32,
        retry_backoff: Duration,
    ) -> Result<()> {
        let state = &mut *self.state.lock();
        Self::check_report_injection(state)?;
        let released = state.live.remove(&job_key);
        state.failures.push((
            job_key,
            error_message.to_string(),
            retries_remaining,
            retry_backoff,
        ));
        // the engine re-delivers failed jobs that still have retries
        if retries_remaining > 0 {
            if let Some(mut job) = released {
                job.retries = retries_remaining;
                state
                    .pending
                    .entry(job.task_type.to_string())
                    .or_default()
                    .push_back(job);
            }
        }
        Ok(())
    }

    async fn raise_incident(&self, job_key: i64, error_message: &str) -> Result<()> {
        let state = &mut *self.state.lock();
        Self::check_report_injection(state)?;
        state.live.remove(&job_key);
        state.incidents.push((job_key, error_message.to_string()));
        Ok(())
    }

    async fn topology(&self) -> Result<ClusterTopology> {
        let state = self.state.lock();
        if state.auth_failure {
            return Err(WorkerError::AuthenticationFailed(
                "Injected authentication failure".to_string(),
            ));
        }
        Ok(ClusterTopology {
            cluster_size: 1,
            brokers: vec![BrokerInfo {
                node_id: 0,
                host: "localhost".to_string(),
                port: 26_500,
            }],
        })
    }

    async fn open_job_stream(&self, request: StreamRequest) -> Result<JobStream> {
        let state = &mut *self.state.lock();
        if state.auth_failure {
            return Err(WorkerError::AuthenticationFailed(
                "Injected authentication failure".to_string(),
            ));
        }

        let key = request.task_type.to_string();
        *state.stream_opens.entry(key.clone()).or_insert(0) += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(mut buffered) = state.stream_pending.remove(&key) {
            while let Some(job) = buffered.pop_front() {
                state.live.insert(job.job_key, job.clone());
                state.stream_delivered += 1;
                let _ = tx.send(Ok(job));
            }
        }
        state.stream_senders.insert(key, tx);

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(stream))
    }
}

/// Poll `predicate` until it holds, panicking after a generous deadline.
/// Under `start_paused` runtimes the waits advance virtual time only.
pub async fn wait_for(mut predicate: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while !predicate() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within 30s");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
