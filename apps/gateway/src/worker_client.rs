//! HTTP client for the worker tier.
//!
//! Every call carries a fixed 10s per-attempt deadline; retries and backoff
//! live in the polling loop ([`crate::relay`]), not here.

use domain_jobs::{CreateJobRequest, CreateJobResponse, ErrorBody, JobEvents};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Per-attempt deadline for worker calls.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker's admission controller refused the job.
    #[error("{0}")]
    Overloaded(String),

    #[error("job not found on worker")]
    NotFound,

    /// Connect failure, request timeout, or response decode failure.
    #[error("request to worker failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("worker returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl WorkerError {
    /// Whether the polling loop should retry with backoff instead of
    /// surfacing the error: transport problems and worker 5xx are transient
    /// by contract, everything else is a verdict.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Transport(_) => true,
            WorkerError::Status { status, .. } => *status >= 500,
            WorkerError::Overloaded(_) | WorkerError::NotFound => false,
        }
    }
}

#[derive(Clone)]
pub struct WorkerClient {
    http: reqwest::Client,
    base_url: String,
}

impl WorkerClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(ATTEMPT_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// `POST /jobs`: create a job; 429 becomes [`WorkerError::Overloaded`].
    pub async fn create_job(
        &self,
        request: &CreateJobRequest,
    ) -> Result<CreateJobResponse, WorkerError> {
        let response = self
            .http
            .post(format!("{}/jobs", self.base_url))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let created: CreateJobResponse = response.json().await?;
            debug!(job_id = %created.job_id, "created worker job");
            return Ok(created);
        }

        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 {
            return Err(WorkerError::Overloaded(overload_message(&body)));
        }
        Err(WorkerError::Status {
            status: status.as_u16(),
            body: truncate(&body),
        })
    }

    /// `GET /jobs/{id}/events?from_seq=N`.
    pub async fn fetch_events(&self, id: Uuid, from_seq: i64) -> Result<JobEvents, WorkerError> {
        let response = self
            .http
            .get(format!("{}/jobs/{}/events", self.base_url, id))
            .query(&[("from_seq", from_seq)])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        if status.as_u16() == 404 {
            return Err(WorkerError::NotFound);
        }

        let body = response.text().await.unwrap_or_default();
        Err(WorkerError::Status {
            status: status.as_u16(),
            body: truncate(&body),
        })
    }

    /// `GET /stats`, passed through verbatim.
    pub async fn stats(&self) -> Result<serde_json::Value, WorkerError> {
        let response = self
            .http
            .get(format!("{}/stats", self.base_url))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let body = response.text().await.unwrap_or_default();
        Err(WorkerError::Status {
            status: status.as_u16(),
            body: truncate(&body),
        })
    }
}

/// Pull the human-readable message out of the worker's overload envelope,
/// falling back to a generic one if the body isn't the expected shape.
fn overload_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|parsed| parsed.error.message)
        .unwrap_or_else(|_| "server overloaded, try again later".to_string())
}

fn truncate(body: &str) -> String {
    body.chars().take(500).collect()
}
