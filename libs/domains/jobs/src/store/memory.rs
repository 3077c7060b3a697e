use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::{ChunkStore, StoreError, StoreResult};
use crate::models::{Chunk, JobMeta, JobStatus};

struct JobEntry {
    meta: JobMeta,
    chunks: Vec<Chunk>,
    seq: u64,
    expires_at: Option<Instant>,
}

impl JobEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory chunk store obeying the same semantics as the Redis
/// implementation: dense sequences, ordered append-only logs, group expiry.
///
/// Single-process only; used by the test suites and local experiments.
#[derive(Default)]
pub struct MemoryChunkStore {
    jobs: Mutex<HashMap<Uuid, JobEntry>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn create_job(&self, meta: &JobMeta) -> StoreResult<()> {
        let mut jobs = self.jobs.lock().expect("store mutex poisoned");
        // An expired entry no longer counts as existing.
        if jobs.get(&meta.id).is_some_and(|entry| !entry.is_expired()) {
            return Err(StoreError::AlreadyExists(meta.id));
        }
        jobs.insert(
            meta.id,
            JobEntry {
                meta: meta.clone(),
                chunks: Vec::new(),
                seq: 0,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn get_meta(&self, id: Uuid) -> StoreResult<JobMeta> {
        let mut jobs = self.jobs.lock().expect("store mutex poisoned");
        match jobs.get(&id) {
            Some(entry) if !entry.is_expired() => Ok(entry.meta.clone()),
            Some(_) => {
                jobs.remove(&id);
                Err(StoreError::NotFound(id))
            }
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        completed_at: Option<DateTime<Utc>>,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let mut jobs = self.jobs.lock().expect("store mutex poisoned");
        let entry = jobs
            .get_mut(&id)
            .filter(|entry| !entry.is_expired())
            .ok_or(StoreError::NotFound(id))?;
        entry.meta.status = status;
        if completed_at.is_some() {
            entry.meta.completed_at = completed_at;
        }
        if let Some(message) = error {
            entry.meta.error = Some(message.to_string());
        }
        Ok(())
    }

    async fn append_chunk(&self, id: Uuid, chunk: &Chunk) -> StoreResult<()> {
        let mut jobs = self.jobs.lock().expect("store mutex poisoned");
        let entry = jobs
            .get_mut(&id)
            .filter(|entry| !entry.is_expired())
            .ok_or(StoreError::NotFound(id))?;
        entry.chunks.push(chunk.clone());
        Ok(())
    }

    async fn read_chunks(&self, id: Uuid, after_seq: i64, max: usize) -> StoreResult<Vec<Chunk>> {
        let jobs = self.jobs.lock().expect("store mutex poisoned");
        let Some(entry) = jobs.get(&id).filter(|entry| !entry.is_expired()) else {
            return Err(StoreError::NotFound(id));
        };
        Ok(entry
            .chunks
            .iter()
            .filter(|chunk| chunk.seq as i64 > after_seq)
            .take(max)
            .cloned()
            .collect())
    }

    async fn next_seq(&self, id: Uuid) -> StoreResult<u64> {
        let mut jobs = self.jobs.lock().expect("store mutex poisoned");
        let entry = jobs
            .get_mut(&id)
            .filter(|entry| !entry.is_expired())
            .ok_or(StoreError::NotFound(id))?;
        entry.seq += 1;
        Ok(entry.seq)
    }

    async fn set_ttl(&self, id: Uuid, ttl: Duration) -> StoreResult<()> {
        let mut jobs = self.jobs.lock().expect("store mutex poisoned");
        let entry = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        entry.expires_at = Some(Instant::now() + ttl);
        Ok(())
    }

    async fn non_terminal_jobs(&self) -> StoreResult<Vec<Uuid>> {
        let jobs = self.jobs.lock().expect("store mutex poisoned");
        Ok(jobs
            .values()
            .filter(|entry| !entry.is_expired() && !entry.meta.status.is_terminal())
            .map(|entry| entry.meta.id)
            .collect())
    }
}
