//! OpenAI-compatible protocol types: the inbound chat-completion request and
//! the outbound chunk/completion envelopes.

use chrono::Utc;
use domain_jobs::{ChatMessage, Chunk, CreateJobRequest, FinishReason, GenerationOptions};
use serde::{Deserialize, Serialize};

/// Body of `POST /v1/chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatCompletionRequest {
    /// Translate into the worker's job-create call.
    pub fn into_job_request(self) -> CreateJobRequest {
        CreateJobRequest {
            model: self.model,
            messages: self.messages,
            options: GenerationOptions {
                temperature: self.temperature,
                top_p: self.top_p,
                max_tokens: self.max_tokens,
            },
        }
    }
}

/// One SSE frame payload: a `chat.completion.chunk` object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkDelta {
    pub content: String,
}

impl ChatCompletionChunk {
    /// Translate one stored chunk into the client-facing envelope. The id,
    /// created timestamp, and model are stable across the whole stream.
    pub fn from_chunk(id: &str, created: i64, model: &str, chunk: &Chunk) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    content: chunk.delta.clone(),
                },
                finish_reason: chunk.finish_reason,
            }],
        }
    }
}

/// The single-response envelope for non-streaming requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: FinishReason,
}

impl ChatCompletion {
    pub fn new(id: String, created: i64, model: String, content: String, finish_reason: FinishReason) -> Self {
        Self {
            id,
            object: "chat.completion".to_string(),
            created,
            model,
            choices: vec![CompletionChoice {
                index: 0,
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content,
                },
                finish_reason,
            }],
        }
    }
}

/// Response of `GET /v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

impl ModelList {
    pub fn from_ids(ids: &[String]) -> Self {
        let created = Utc::now().timestamp();
        Self {
            object: "list".to_string(),
            data: ids
                .iter()
                .map(|id| ModelInfo {
                    id: id.clone(),
                    object: "model".to_string(),
                    created,
                    owned_by: "ollama".to_string(),
                })
                .collect(),
        }
    }
}
