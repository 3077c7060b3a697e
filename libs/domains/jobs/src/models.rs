use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumString};
use uuid::Uuid;

/// How long per-job state (meta, chunk log, sequence counter) survives after
/// the job reaches a terminal status.
pub const JOB_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Upper bound on chunks returned by a single events poll.
pub const MAX_EVENT_CHUNKS: usize = 1000;

/// Job lifecycle status
///
/// Valid transitions: `queued → running | failed | cancelled` and
/// `running → completed | failed | cancelled`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    /// Accepted by admission, waiting for an executor
    #[default]
    Queued,
    /// An executor owns the job and is streaming from the backend
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether this status ends the job lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Why a stream terminated. Set only on the final chunk of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FinishReason {
    /// Model stopped on its own
    Stop,
    /// Output-token budget exhausted
    Length,
    /// Stream ended because the job failed or was cancelled
    Error,
}

/// One message of the chat transcript sent to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Sampling options forwarded to the inference backend.
///
/// All fields are optional; absent fields are omitted from the backend
/// request so the backend applies its own defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationOptions {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.top_p.is_none() && self.max_tokens.is_none()
    }
}

/// Job metadata as persisted in the chunk store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMeta {
    /// Unique identifier
    pub id: Uuid,
    /// Target model name
    pub model: String,
    /// Input transcript
    pub messages: Vec<ChatMessage>,
    /// Sampling options
    pub options: GenerationOptions,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    /// Set when the job enters a terminal status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure reason, set on `failed` (and `cancelled`) jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobMeta {
    /// Build the initial (queued) metadata for a freshly accepted request.
    pub fn new(id: Uuid, request: CreateJobRequest) -> Self {
        Self {
            id,
            model: request.model,
            messages: request.messages,
            options: request.options,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }
}

/// One increment of model output in a job's ordered log.
///
/// Chunks are append-only: once written they are never mutated or reordered.
/// For any job the stored sequence numbers are exactly `1..=K`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Dense per-job sequence number, starting at 1
    pub seq: u64,
    /// Incremental output text (may be empty on the final chunk)
    pub delta: String,
    /// True on the chunk that terminates the stream
    pub done: bool,
    /// Set only when `done` is true
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// Set only on failure-terminating chunks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of `POST /jobs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub options: GenerationOptions,
}

/// Response of `POST /jobs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Response of `GET /jobs/{id}/events`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvents {
    pub status: JobStatus,
    pub chunks: Vec<Chunk>,
}

/// Response of `GET /jobs/{id}/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response of `GET /stats`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Jobs currently executing
    pub active: usize,
    /// Jobs accepted but not yet executing
    pub queued: usize,
    /// Executor pool size (N)
    pub capacity: usize,
    /// Admission ceiling (2N)
    pub max_queue: usize,
}

/// Wire-format error envelope shared by both tiers:
/// `{"error": {"message": …, "type": …, "code": …}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Numeric for gateway responses, `"rate_limit_exceeded"` for the
    /// worker's overload signal.
    pub code: serde_json::Value,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>, kind: impl Into<String>, code: serde_json::Value) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                kind: kind.into(),
                code,
            },
        }
    }
}
