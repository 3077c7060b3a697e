//! The resumable stream: reconstructing one uninterrupted client response
//! from possibly-interrupted worker polls.
//!
//! The gateway never talks to the inference backend; it observes job progress
//! only through the worker's events endpoint. [`EventCursor`] owns the loop
//! state: the `last_seq` cursor (which makes redelivered chunks harmless),
//! exponential backoff across worker outages, and the overall deadline. On
//! top of it sit the two response shapes: an SSE stream and a buffered JSON
//! aggregation.

use axum::body::{Body, Bytes};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use domain_jobs::{Chunk, ErrorBody, FinishReason, JobStatus};
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::ApiError;
use crate::openai::{ChatCompletion, ChatCompletionChunk};
use crate::worker_client::WorkerClient;

/// Resilience knobs of the polling loop, lifted from the gateway config.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub poll_interval: Duration,
    pub backoff_init: Duration,
    pub backoff_max: Duration,
    pub job_timeout: Duration,
}

impl From<&Config> for PollConfig {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
            backoff_init: config.backoff_init,
            backoff_max: config.backoff_max,
            job_timeout: config.job_timeout,
        }
    }
}

/// Outcome of one cursor poll.
enum PollStep {
    /// Fresh chunks (strictly beyond the cursor) plus the job status seen in
    /// the same response.
    Batch { chunks: Vec<Chunk>, status: JobStatus },
    /// The overall deadline elapsed.
    DeadlineExceeded,
    /// A non-retryable worker error.
    Fatal(String),
}

/// Cursor over one job's event log.
///
/// `poll()` hides transient worker unreachability: failed attempts back off
/// exponentially and retry until the deadline, without ever surfacing to the
/// caller. Chunks at or below `last_seq` are dropped, so a replayed batch
/// reaches the client exactly once.
struct EventCursor {
    client: WorkerClient,
    job_id: Uuid,
    last_seq: i64,
    retry_delay: Duration,
    config: PollConfig,
    deadline: Instant,
}

impl EventCursor {
    fn new(client: WorkerClient, job_id: Uuid, config: PollConfig) -> Self {
        Self {
            client,
            job_id,
            last_seq: -1,
            retry_delay: config.backoff_init,
            config,
            deadline: Instant::now() + config.job_timeout,
        }
    }

    async fn poll(&mut self) -> PollStep {
        loop {
            let now = Instant::now();
            if now >= self.deadline {
                return PollStep::DeadlineExceeded;
            }

            match self.client.fetch_events(self.job_id, self.last_seq).await {
                Ok(events) => {
                    self.retry_delay = self.config.backoff_init;
                    let chunks = fresh_chunks(&mut self.last_seq, events.chunks);
                    return PollStep::Batch {
                        chunks,
                        status: events.status,
                    };
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        job_id = %self.job_id,
                        error = %e,
                        retry_in_ms = self.retry_delay.as_millis() as u64,
                        "worker poll failed, backing off"
                    );
                    let remaining = self.deadline.saturating_duration_since(Instant::now());
                    tokio::time::sleep(self.retry_delay.min(remaining)).await;
                    self.retry_delay = (self.retry_delay * 2).min(self.config.backoff_max);
                }
                Err(e) => return PollStep::Fatal(e.to_string()),
            }
        }
    }

    /// Idle between successful polls.
    async fn pause(&self) {
        tokio::time::sleep(self.config.poll_interval).await;
    }
}

/// Drop chunks at or below the cursor, advancing it past what remains.
/// Replaying any already-seen batch therefore yields nothing.
fn fresh_chunks(last_seq: &mut i64, chunks: Vec<Chunk>) -> Vec<Chunk> {
    chunks
        .into_iter()
        .filter(|chunk| {
            if chunk.seq as i64 <= *last_seq {
                return false;
            }
            *last_seq = chunk.seq as i64;
            true
        })
        .collect()
}

/// One SSE data frame: `data: <json>\n\n`.
fn data_frame<T: Serialize>(payload: &T) -> Bytes {
    let json = serde_json::to_string(payload).expect("payload serializes");
    Bytes::from(format!("data: {}\n\n", json))
}

/// The stream terminator.
fn done_frame() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

/// An in-band error frame; the connection closes right after it.
fn error_frame(message: &str) -> Bytes {
    data_frame(&ErrorBody::new(message, "server_error", json!(500)))
}

/// Streaming response: an SSE body fed by the polling loop.
///
/// Headers disable caching and reverse-proxy buffering; frames are
/// single-line `data:` payloads with no `event:`/`id:` fields.
pub fn sse_response(
    client: WorkerClient,
    poll_config: PollConfig,
    job_id: Uuid,
    model: String,
) -> Response {
    let completion_id = format!("chatcmpl-{}", Uuid::new_v4());
    let created = Utc::now().timestamp();
    let mut cursor = EventCursor::new(client, job_id, poll_config);

    let frames = async_stream::stream! {
        'relay: loop {
            match cursor.poll().await {
                PollStep::DeadlineExceeded => {
                    warn!(job_id = %job_id, "stream deadline exceeded");
                    yield error_frame("timeout exceeded");
                    break;
                }
                PollStep::Fatal(message) => {
                    warn!(job_id = %job_id, error = %message, "stream aborted");
                    yield error_frame(&message);
                    break;
                }
                PollStep::Batch { chunks, status } => {
                    let drained = chunks.is_empty();
                    for chunk in chunks {
                        if let Some(error) = &chunk.error {
                            yield error_frame(&format!("job failed: {}", error));
                            break 'relay;
                        }
                        yield data_frame(&ChatCompletionChunk::from_chunk(
                            &completion_id,
                            created,
                            &model,
                            &chunk,
                        ));
                        if chunk.done {
                            yield done_frame();
                            break 'relay;
                        }
                    }

                    // Terminal status with chunks still in this batch may
                    // mean more are waiting beyond the poll cap: keep
                    // draining and only conclude on an empty batch.
                    match status {
                        JobStatus::Completed if drained => {
                            // Log ended without a done chunk; close cleanly.
                            yield done_frame();
                            break;
                        }
                        JobStatus::Failed if drained => {
                            yield error_frame("job failed");
                            break;
                        }
                        JobStatus::Cancelled if drained => {
                            yield error_frame("job cancelled");
                            break;
                        }
                        status if status.is_terminal() => continue,
                        _ => cursor.pause().await,
                    }
                }
            }
        }
        debug!(job_id = %job_id, "stream closed");
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        // Defeat buffering in nginx-style reverse proxies.
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(frames.map(Ok::<_, Infallible>)))
        .expect("static response parts are valid")
}

/// Non-streaming response: the same polling loop, accumulated into one
/// chat-completion envelope.
pub async fn aggregate_response(
    client: WorkerClient,
    poll_config: PollConfig,
    job_id: Uuid,
    model: String,
) -> Result<Json<ChatCompletion>, ApiError> {
    let completion_id = format!("chatcmpl-{}", Uuid::new_v4());
    let created = Utc::now().timestamp();
    let mut cursor = EventCursor::new(client, job_id, poll_config);
    let mut content = String::new();

    loop {
        match cursor.poll().await {
            PollStep::DeadlineExceeded => {
                warn!(job_id = %job_id, "aggregation deadline exceeded");
                return Err(ApiError::Timeout);
            }
            PollStep::Fatal(message) => return Err(ApiError::Internal(message)),
            PollStep::Batch { chunks, status } => {
                let drained = chunks.is_empty();
                for chunk in chunks {
                    if let Some(error) = chunk.error {
                        return Err(ApiError::Internal(format!("job failed: {}", error)));
                    }
                    content.push_str(&chunk.delta);
                    if chunk.done {
                        let finish_reason = chunk.finish_reason.unwrap_or(FinishReason::Stop);
                        return Ok(Json(ChatCompletion::new(
                            completion_id,
                            created,
                            model,
                            content,
                            finish_reason,
                        )));
                    }
                }

                match status {
                    JobStatus::Completed if drained => {
                        return Ok(Json(ChatCompletion::new(
                            completion_id,
                            created,
                            model,
                            content,
                            FinishReason::Stop,
                        )));
                    }
                    JobStatus::Failed if drained => {
                        return Err(ApiError::Internal("job failed".to_string()));
                    }
                    JobStatus::Cancelled if drained => {
                        return Err(ApiError::Internal("job cancelled".to_string()));
                    }
                    status if status.is_terminal() => continue,
                    _ => cursor.pause().await,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(seq: u64, delta: &str, done: bool) -> Chunk {
        Chunk {
            seq,
            delta: delta.to_string(),
            done,
            finish_reason: done.then_some(FinishReason::Stop),
            error: None,
        }
    }

    #[test]
    fn test_fresh_chunks_advances_cursor() {
        let mut last_seq = -1;
        let fresh = fresh_chunks(&mut last_seq, vec![chunk(1, "a", false), chunk(2, "b", false)]);
        assert_eq!(fresh.len(), 2);
        assert_eq!(last_seq, 2);
    }

    #[test]
    fn test_fresh_chunks_drops_replays() {
        let mut last_seq = -1;
        let batch = vec![chunk(1, "a", false), chunk(2, "b", false), chunk(3, "", true)];

        let first_pass = fresh_chunks(&mut last_seq, batch.clone());
        assert_eq!(first_pass.len(), 3);

        // Replaying the full batch yields nothing: the client saw each delta
        // exactly once.
        let second_pass = fresh_chunks(&mut last_seq, batch);
        assert!(second_pass.is_empty());
        assert_eq!(last_seq, 3);
    }

    #[test]
    fn test_fresh_chunks_partial_overlap() {
        let mut last_seq = 1;
        let fresh = fresh_chunks(
            &mut last_seq,
            vec![chunk(1, "dup", false), chunk(2, "new", false)],
        );
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].seq, 2);
    }

    #[test]
    fn test_data_frame_format() {
        let frame = data_frame(&json!({"k": "v"}));
        assert_eq!(&frame[..], b"data: {\"k\":\"v\"}\n\n");
    }

    #[test]
    fn test_done_frame_format() {
        assert_eq!(&done_frame()[..], b"data: [DONE]\n\n");
    }

    #[test]
    fn test_error_frame_is_an_error_envelope() {
        let frame = error_frame("timeout exceeded");
        let text = std::str::from_utf8(&frame).unwrap();
        let payload: serde_json::Value =
            serde_json::from_str(text.trim_start_matches("data: ").trim()).unwrap();
        assert_eq!(payload["error"]["message"], "timeout exceeded");
        assert_eq!(payload["error"]["type"], "server_error");
    }

    /// Property: replaying the full chunk list through the translation
    /// produces the same frames as a single pass (frames are a pure function
    /// of the chunk, and the cursor removes duplicates).
    #[test]
    fn test_translation_is_idempotent_across_replays() {
        let log = vec![chunk(1, "Hel", false), chunk(2, "lo", false), chunk(3, "", true)];

        let frames_single: Vec<Bytes> = {
            let mut last_seq = -1;
            fresh_chunks(&mut last_seq, log.clone())
                .iter()
                .map(|c| data_frame(&ChatCompletionChunk::from_chunk("id", 0, "m", c)))
                .collect()
        };

        let frames_replayed: Vec<Bytes> = {
            let mut last_seq = -1;
            let mut frames = Vec::new();
            // The worker replays the prefix on every poll.
            for upto in 1..=log.len() {
                for c in fresh_chunks(&mut last_seq, log[..upto].to_vec()) {
                    frames.push(data_frame(&ChatCompletionChunk::from_chunk("id", 0, "m", &c)));
                }
            }
            frames
        };

        assert_eq!(frames_single, frames_replayed);
    }
}
