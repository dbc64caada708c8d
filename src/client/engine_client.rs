//! # Engine API Client
//!
//! HTTP client for the orchestration engine's job-lifecycle API. Used by
//! job sources to lease or subscribe to jobs and by the reporter to deliver
//! outcomes.
//!
//! Calls here are single-attempt: retry policy belongs to the callers (the
//! reporter retries reports, dispatcher loops back off on lease errors), so
//! the client only classifies failures into the worker error taxonomy.

use futures::stream::{Stream, StreamExt};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::client::{auth::TokenProvider, ClusterTopology, JobStream, LeaseRequest, StreamRequest};
use crate::config::EngineConfig;
use crate::error::{Result, WorkerError};
use crate::types::{Job, Variables};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LeaseJobsBody<'a> {
    task_type: &'a str,
    max_jobs: u32,
    lock_duration_ms: u64,
    worker: &'a str,
}

#[derive(Debug, Deserialize)]
struct LeaseJobsResponse {
    #[serde(default)]
    jobs: Vec<Job>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteJobBody<'a> {
    variables: &'a Variables,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FailJobBody<'a> {
    error_message: &'a str,
    retries_remaining: u32,
    retry_backoff_ms: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IncidentBody<'a> {
    error_message: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamBody<'a> {
    task_type: &'a str,
    lock_duration_ms: u64,
    worker: &'a str,
}

/// HTTP client for the orchestration engine.
#[derive(Clone)]
pub struct EngineClient {
    client: Client,
    base_url: Url,
    auth: Option<Arc<TokenProvider>>,
}

impl EngineClient {
    /// Create a new engine client with the given configuration
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| WorkerError::Configuration(format!("Invalid base URL: {e}")))?;

        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent(format!("leadflow-worker/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                WorkerError::Configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        let auth = config
            .oauth
            .clone()
            .map(|oauth| Arc::new(TokenProvider::new(client.clone(), oauth)));

        info!(
            base_url = %config.base_url,
            timeout_ms = config.request_timeout_ms,
            auth_enabled = auth.is_some(),
            "Created engine API client"
        );

        Ok(Self {
            client,
            base_url,
            auth,
        })
    }

    /// Get the configured base URL for logging
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| WorkerError::Configuration(format!("Failed to construct URL: {e}")))
    }

    /// Send a request with a bearer token when auth is configured. A 401 on
    /// a cached token forces one refresh and replay before giving up; the
    /// token may have been revoked server-side.
    async fn send_with_auth<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut request = build();
        if let Some(auth) = &self.auth {
            request = request.bearer_auth(auth.access_token().await?);
        }
        let response = request.send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(auth) = &self.auth {
                warn!("Engine returned 401 on cached token, refreshing once");
                auth.invalidate();
                let request = build().bearer_auth(auth.access_token().await?);
                let response = request.send().await?;
                return Self::check_status(response).await;
            }
        }

        Self::check_status(response).await
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(WorkerError::AuthenticationFailed(format!(
                "HTTP {status}: {error_text}"
            )));
        }
        if status.is_server_error() {
            return Err(WorkerError::TransientNetwork(format!(
                "HTTP {status}: {error_text}"
            )));
        }
        Err(WorkerError::EngineRejected {
            status: status.as_u16(),
            message: error_text,
        })
    }
}

#[async_trait::async_trait]
impl crate::client::JobLifecycle for EngineClient {
    async fn lease_jobs(&self, request: LeaseRequest) -> Result<Vec<Job>> {
        let url = self.url("/v1/jobs/lease")?;
        let body = LeaseJobsBody {
            task_type: request.task_type.as_str(),
            max_jobs: request.max_jobs,
            lock_duration_ms: request.lock_duration.as_millis() as u64,
            worker: &request.worker,
        };

        debug!(
            task_type = %request.task_type,
            max_jobs = request.max_jobs,
            "Leasing jobs from engine"
        );

        let response = self
            .send_with_auth(|| self.client.post(url.clone()).json(&body))
            .await?;

        let leased: LeaseJobsResponse = response.json().await.map_err(|e| {
            WorkerError::TransientNetwork(format!("Invalid lease response: {e}"))
        })?;

        Ok(leased.jobs)
    }

    async fn complete_job(&self, job_key: i64, variables: &Variables) -> Result<()> {
        let url = self.url(&format!("/v1/jobs/{job_key}/complete"))?;
        let body = CompleteJobBody { variables };

        debug!(job_key = job_key, "Completing job");
        self.send_with_auth(|| self.client.post(url.clone()).json(&body))
            .await?;
        Ok(())
    }

    async fn fail_job(
        &self,
        job_key: i64,
        error_message: &str,
        retries_remaining: u32,
        retry_backoff: Duration,
    ) -> Result<()> {
        let url = self.url(&format!("/v1/jobs/{job_key}/fail"))?;
        let body = FailJobBody {
            error_message,
            retries_remaining,
            retry_backoff_ms: retry_backoff.as_millis() as u64,
        };

        debug!(
            job_key = job_key,
            retries_remaining = retries_remaining,
            "Failing job"
        );
        self.send_with_auth(|| self.client.post(url.clone()).json(&body))
            .await?;
        Ok(())
    }

    async fn raise_incident(&self, job_key: i64, error_message: &str) -> Result<()> {
        let url = self.url(&format!("/v1/jobs/{job_key}/incident"))?;
        let body = IncidentBody { error_message };

        debug!(job_key = job_key, "Raising incident");
        self.send_with_auth(|| self.client.post(url.clone()).json(&body))
            .await?;
        Ok(())
    }

    async fn topology(&self) -> Result<ClusterTopology> {
        let url = self.url("/v1/topology")?;

        let response = self.send_with_auth(|| self.client.get(url.clone())).await?;
        let topology: ClusterTopology = response.json().await.map_err(|e| {
            WorkerError::TransientNetwork(format!("Invalid topology response: {e}"))
        })?;

        Ok(topology)
    }

    async fn open_job_stream(&self, request: StreamRequest) -> Result<JobStream> {
        let url = self.url("/v1/jobs/stream")?;
        let body = StreamBody {
            task_type: request.task_type.as_str(),
            lock_duration_ms: request.lock_duration.as_millis() as u64,
            worker: &request.worker,
        };

        info!(
            task_type = %request.task_type,
            worker = %request.worker,
            "Opening job stream subscription"
        );

        let response = self
            .send_with_auth(|| self.client.post(url.clone()).json(&body))
            .await?;

        Ok(Box::pin(NdjsonDecoder::new(response.bytes_stream().boxed())))
    }
}

/// Decodes newline-delimited JSON job frames from a byte stream.
///
/// Frames may be split across chunks; blank lines are keep-alives and are
/// skipped. A malformed frame yields an error item without ending the
/// stream, so one bad frame cannot kill a subscription.
struct NdjsonDecoder<S> {
    inner: S,
    buffer: Vec<u8>,
    pending: VecDeque<Result<Job>>,
    done: bool,
}

impl<S> NdjsonDecoder<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            done: false,
        }
    }

    fn push_chunk(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.decode_line(&line[..line.len() - 1]);
        }
    }

    fn flush_trailing(&mut self) {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.decode_line(&line);
        }
    }

    fn decode_line(&mut self, line: &[u8]) {
        let text = match std::str::from_utf8(line) {
            Ok(text) => text.trim(),
            Err(_) => {
                self.pending.push_back(Err(WorkerError::JobSource(
                    "Non-UTF-8 frame in job stream".to_string(),
                )));
                return;
            }
        };
        if text.is_empty() {
            return;
        }
        match serde_json::from_str::<Job>(text) {
            Ok(job) => self.pending.push_back(Ok(job)),
            Err(e) => self.pending.push_back(Err(WorkerError::Serialization(e))),
        }
    }
}

impl<S, B> Stream for NdjsonDecoder<S>
where
    S: Stream<Item = std::result::Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    type Item = Result<Job>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(item) = this.pending.pop_front() {
                return Poll::Ready(Some(item));
            }
            if this.done {
                return Poll::Ready(None);
            }
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.push_chunk(chunk.as_ref()),
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    this.pending.push_back(Err(WorkerError::from(e)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    this.flush_trailing();
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
