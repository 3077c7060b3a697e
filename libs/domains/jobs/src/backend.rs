//! Streaming client for the inference backend.
//!
//! The backend exposes a chat endpoint that answers with newline-delimited
//! SSE records (`data: {json}` per line). This module owns the HTTP call,
//! the line-based record parser, and the [`CompletionBackend`] seam the
//! executor drives; test suites substitute a scripted implementation.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::models::{ChatMessage, GenerationOptions};

/// Streaming chat request sent to the backend. Sampling options are
/// flattened into the body (`{model, messages, stream, temperature?, …}`).
#[derive(Debug, Clone, Serialize)]
pub struct BackendChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(flatten)]
    pub options: GenerationOptions,
}

/// One decoded backend record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub delta: String,
    pub done: bool,
    pub done_reason: Option<String>,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request to inference backend failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("inference backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed stream record: {0}")]
    Decode(String),
}

pub type RecordStream = Pin<Box<dyn Stream<Item = Result<StreamRecord, BackendError>> + Send>>;

/// Seam between the executor and the inference engine.
#[async_trait]
pub trait CompletionBackend: Send + Sync + 'static {
    /// Open one streaming chat call. The returned stream ends after the
    /// record carrying `done: true` (or a `[DONE]` sentinel).
    async fn chat_stream(&self, request: BackendChatRequest) -> Result<RecordStream, BackendError>;
}

/// Wire shape of one backend record: `{message: {content}, done, done_reason?}`.
#[derive(Debug, Deserialize)]
struct WireRecord {
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug)]
enum LineEvent {
    /// Blank line or line without a `data:` prefix
    Skip,
    /// `data: [DONE]` sentinel
    Done,
    Record(StreamRecord),
}

/// Parse one line of the backend stream.
///
/// Lines that are blank or unprefixed are skipped rather than rejected; only
/// a `data:` payload that fails to decode is an error.
fn parse_line(line: &str) -> Result<LineEvent, BackendError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(LineEvent::Skip);
    }
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(LineEvent::Skip);
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return Ok(LineEvent::Done);
    }

    let record: WireRecord = serde_json::from_str(payload)
        .map_err(|e| BackendError::Decode(format!("{}: {}", e, payload)))?;
    Ok(LineEvent::Record(StreamRecord {
        delta: record.message.map(|m| m.content).unwrap_or_default(),
        done: record.done,
        done_reason: record.done_reason,
    }))
}

/// Reqwest-backed client for an Ollama-compatible inference engine.
///
/// The client carries a connect timeout but NO read timeout: generations can
/// legitimately run for many minutes and must not be truncated mid-stream.
pub struct OllamaBackend {
    http: reqwest::Client,
    base_url: String,
}

impl OllamaBackend {
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(base_url: impl Into<String>) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Self::CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CompletionBackend for OllamaBackend {
    async fn chat_stream(&self, request: BackendChatRequest) -> Result<RecordStream, BackendError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        debug!(url = %url, model = %request.model, "opening backend stream");

        let response = self.http.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            // Error responses are not a stream; read them whole, truncated.
            let body = response.text().await.unwrap_or_default();
            let truncated: String = body.chars().take(500).collect();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: truncated,
            });
        }

        let mut response = response;
        let stream = async_stream::try_stream! {
            let mut buf = String::new();
            'read: loop {
                match response.chunk().await? {
                    Some(bytes) => {
                        buf.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(pos) = buf.find('\n') {
                            let line: String = buf.drain(..=pos).collect();
                            match parse_line(&line)? {
                                LineEvent::Skip => {}
                                LineEvent::Done => break 'read,
                                LineEvent::Record(record) => {
                                    let done = record.done;
                                    yield record;
                                    if done {
                                        break 'read;
                                    }
                                }
                            }
                        }
                    }
                    None => {
                        // EOF; flush a possible unterminated trailing line.
                        if let LineEvent::Record(record) = parse_line(&buf)? {
                            yield record;
                        }
                        break 'read;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
