use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ChunkStore, StoreError, StoreResult};
use crate::models::{ChatMessage, Chunk, GenerationOptions, JobMeta, JobStatus};

/// Redis-backed chunk store.
///
/// Keyspace per job:
/// - `job:{id}:meta` is a hash: status, model, created_at, completed_at,
///   error, messages (JSON), options (JSON)
/// - `job:{id}:chunks` is a list of JSON-encoded chunks, RPUSH order == seq order
/// - `job:{id}:seq` is an integer counter driven by INCR
///
/// Because sequence numbers are dense from 1, the chunk with seq `s` sits at
/// list index `s - 1`, so `read_chunks(after_seq)` is a single exact LRANGE.
#[derive(Clone)]
pub struct RedisChunkStore {
    redis: ConnectionManager,
}

impl RedisChunkStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn meta_key(id: Uuid) -> String {
        format!("job:{}:meta", id)
    }

    fn chunks_key(id: Uuid) -> String {
        format!("job:{}:chunks", id)
    }

    fn seq_key(id: Uuid) -> String {
        format!("job:{}:seq", id)
    }

    fn parse_meta(id: Uuid, fields: HashMap<String, String>) -> StoreResult<JobMeta> {
        let field = |name: &str| -> StoreResult<&String> {
            fields
                .get(name)
                .ok_or_else(|| StoreError::Corrupt(format!("job {} meta missing '{}'", id, name)))
        };

        let status: JobStatus = field("status")?
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("job {} has unknown status", id)))?;
        let created_at = DateTime::parse_from_rfc3339(field("created_at")?)
            .map_err(|e| StoreError::Corrupt(format!("job {} created_at: {}", id, e)))?
            .with_timezone(&Utc);
        let completed_at = match fields.get("completed_at") {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| StoreError::Corrupt(format!("job {} completed_at: {}", id, e)))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };
        let messages: Vec<ChatMessage> = serde_json::from_str(field("messages")?)?;
        let options: GenerationOptions = serde_json::from_str(field("options")?)?;

        Ok(JobMeta {
            id,
            model: field("model")?.clone(),
            messages,
            options,
            status,
            created_at,
            completed_at,
            error: fields.get("error").cloned(),
        })
    }
}

#[async_trait]
impl ChunkStore for RedisChunkStore {
    async fn create_job(&self, meta: &JobMeta) -> StoreResult<()> {
        let mut conn = self.redis.clone();
        let key = Self::meta_key(meta.id);

        // HSETNX on the id field claims the key; losing the claim means the
        // id is already taken.
        let claimed: i64 = redis::cmd("HSETNX")
            .arg(&key)
            .arg("id")
            .arg(meta.id.to_string())
            .query_async(&mut conn)
            .await?;
        if claimed == 0 {
            return Err(StoreError::AlreadyExists(meta.id));
        }

        redis::cmd("HSET")
            .arg(&key)
            .arg("status")
            .arg(meta.status.to_string())
            .arg("model")
            .arg(&meta.model)
            .arg("created_at")
            .arg(meta.created_at.to_rfc3339())
            .arg("messages")
            .arg(serde_json::to_string(&meta.messages)?)
            .arg("options")
            .arg(serde_json::to_string(&meta.options)?)
            .query_async::<()>(&mut conn)
            .await?;

        debug!(job_id = %meta.id, "created job meta");
        Ok(())
    }

    async fn get_meta(&self, id: Uuid) -> StoreResult<JobMeta> {
        let mut conn = self.redis.clone();

        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(Self::meta_key(id))
            .query_async(&mut conn)
            .await?;
        if fields.is_empty() {
            return Err(StoreError::NotFound(id));
        }

        Self::parse_meta(id, fields)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        completed_at: Option<DateTime<Utc>>,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let mut conn = self.redis.clone();

        let mut cmd = redis::cmd("HSET");
        cmd.arg(Self::meta_key(id))
            .arg("status")
            .arg(status.to_string());
        if let Some(ts) = completed_at {
            cmd.arg("completed_at").arg(ts.to_rfc3339());
        }
        if let Some(message) = error {
            cmd.arg("error").arg(message);
        }
        cmd.query_async::<()>(&mut conn).await?;

        debug!(job_id = %id, status = %status, "updated job status");
        Ok(())
    }

    async fn append_chunk(&self, id: Uuid, chunk: &Chunk) -> StoreResult<()> {
        let mut conn = self.redis.clone();

        redis::cmd("RPUSH")
            .arg(Self::chunks_key(id))
            .arg(serde_json::to_string(chunk)?)
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn read_chunks(&self, id: Uuid, after_seq: i64, max: usize) -> StoreResult<Vec<Chunk>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.redis.clone();

        // seq s lives at index s-1, so index after_seq is the first chunk
        // with seq > after_seq.
        let start = after_seq.max(0);
        let stop = start + max as i64 - 1;
        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(Self::chunks_key(id))
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await?;

        let mut chunks = Vec::with_capacity(raw.len());
        for encoded in raw {
            let chunk: Chunk = serde_json::from_str(&encoded)?;
            // Density makes the LRANGE exact, but filter defensively.
            if chunk.seq as i64 > after_seq {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }

    async fn next_seq(&self, id: Uuid) -> StoreResult<u64> {
        let mut conn = self.redis.clone();

        let seq: i64 = redis::cmd("INCR")
            .arg(Self::seq_key(id))
            .query_async(&mut conn)
            .await?;
        Ok(seq as u64)
    }

    async fn set_ttl(&self, id: Uuid, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.redis.clone();
        let secs = ttl.as_secs() as i64;

        redis::pipe()
            .cmd("EXPIRE")
            .arg(Self::meta_key(id))
            .arg(secs)
            .ignore()
            .cmd("EXPIRE")
            .arg(Self::chunks_key(id))
            .arg(secs)
            .ignore()
            .cmd("EXPIRE")
            .arg(Self::seq_key(id))
            .arg(secs)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(job_id = %id, ttl_secs = secs, "applied job TTL");
        Ok(())
    }

    async fn non_terminal_jobs(&self) -> StoreResult<Vec<Uuid>> {
        let mut conn = self.redis.clone();
        let mut ids = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg("job:*:meta")
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            for key in keys {
                let status: Option<String> = redis::cmd("HGET")
                    .arg(&key)
                    .arg("status")
                    .query_async(&mut conn)
                    .await?;
                let Some(status) = status.and_then(|s| s.parse::<JobStatus>().ok()) else {
                    warn!(key = %key, "skipping meta key with missing or unknown status");
                    continue;
                };
                if status.is_terminal() {
                    continue;
                }
                match key.split(':').nth(1).map(Uuid::parse_str) {
                    Some(Ok(id)) => ids.push(id),
                    _ => warn!(key = %key, "skipping meta key with unparseable job id"),
                }
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(ids)
    }
}
