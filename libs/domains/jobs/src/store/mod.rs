//! The chunk store: shared, durable per-job state.
//!
//! The store holds, for every job:
//! - a metadata hash (`job:{id}:meta`)
//! - an ordered, append-only chunk log (`job:{id}:chunks`)
//! - a monotonic sequence counter (`job:{id}:seq`)
//!
//! All three expire together 24h after the job reaches a terminal status.
//! The trait is the contract; [`RedisChunkStore`] is the production
//! implementation and [`MemoryChunkStore`] obeys the same semantics for
//! hermetic tests.

mod memory;
mod redis;

pub use memory::MemoryChunkStore;
pub use redis::RedisChunkStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Chunk, JobMeta, JobStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} already exists")]
    AlreadyExists(Uuid),

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored record that no longer parses. Should not happen; indicates
    /// out-of-band writes to the keyspace.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable shared memory for job metadata, chunk logs, and sequence counters.
///
/// Implementations must uphold:
/// - `append_chunk` preserves insertion order and is safe under concurrent
///   readers; chunks are never mutated or reordered.
/// - `next_seq` is a linearizable per-job fetch-and-add starting from 0.
/// - `read_chunks` returns, in order, only chunks with `seq > after_seq`.
/// - `set_ttl` expires the job's meta, log, and counter as a group.
#[async_trait]
pub trait ChunkStore: Send + Sync + 'static {
    /// Atomically write the initial metadata. Fails with
    /// [`StoreError::AlreadyExists`] if the id is taken.
    async fn create_job(&self, meta: &JobMeta) -> StoreResult<()>;

    async fn get_meta(&self, id: Uuid) -> StoreResult<JobMeta>;

    /// Partial update of the status fields. Last-writer-wins is acceptable:
    /// only the executor writes terminal fields for a given job.
    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        completed_at: Option<DateTime<Utc>>,
        error: Option<&str>,
    ) -> StoreResult<()>;

    /// Append one chunk to the job's ordered log.
    async fn append_chunk(&self, id: Uuid, chunk: &Chunk) -> StoreResult<()>;

    /// Read up to `max` chunks with `seq > after_seq`, in ascending order.
    async fn read_chunks(&self, id: Uuid, after_seq: i64, max: usize) -> StoreResult<Vec<Chunk>>;

    /// Atomic fetch-and-add of the per-job sequence counter; returns the new
    /// value, which becomes the next chunk's `seq`.
    async fn next_seq(&self, id: Uuid) -> StoreResult<u64>;

    /// Apply expiry to all of the job's keys as a group. Called once when the
    /// job enters a terminal status.
    async fn set_ttl(&self, id: Uuid, ttl: Duration) -> StoreResult<()>;

    /// Enumerate jobs not yet in a terminal status. Used by the startup sweep.
    async fn non_terminal_jobs(&self) -> StoreResult<Vec<Uuid>>;
}
