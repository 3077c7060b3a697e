//! Job domain for the chat-completion relay worker.
//!
//! A job is one client chat-completion request materialized as worker-side
//! state: metadata, a lifecycle status, and an ordered log of output chunks
//! buffered in the shared chunk store. This crate owns everything between the
//! worker's HTTP surface and the inference backend:
//!
//! ```text
//! POST /jobs ──► JobService ──► AdmissionController ──► bounded FIFO (cap 2N)
//!                                                           │
//!                                        ExecutorPool (N tasks) pops jobs
//!                                                           │
//!                              CompletionBackend (streaming chat call)
//!                                                           │
//!                               ChunkStore (meta + chunk log + seq counter)
//!                                                           ▲
//! GET /jobs/{id}/events?from_seq=N ─────────────────────────┘
//! ```
//!
//! Chunk sequence numbers are dense (1, 2, 3, …) per job, allocated by the
//! store's atomic counter, so readers can resume from any cursor without
//! gaps or duplicates.

pub mod admission;
pub mod backend;
pub mod cancel;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod service;
pub mod store;

pub use admission::AdmissionController;
pub use backend::{BackendChatRequest, BackendError, CompletionBackend, OllamaBackend, StreamRecord};
pub use cancel::CancellationRegistry;
pub use error::{JobError, JobResult};
pub use executor::{sweep_stale_jobs, ExecutorContext, ExecutorPool};
pub use models::{
    Chunk, ChatMessage, CreateJobRequest, CreateJobResponse, ErrorBody, ErrorDetail, FinishReason,
    GenerationOptions, JobEvents, JobMeta, JobStatus, JobStatusResponse, WorkerStats, JOB_TTL,
    MAX_EVENT_CHUNKS,
};
pub use service::JobService;
pub use store::{ChunkStore, MemoryChunkStore, RedisChunkStore, StoreError, StoreResult};
