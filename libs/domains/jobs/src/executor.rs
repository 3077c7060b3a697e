//! The executor pool: N long-lived tasks draining the admission FIFO.
//!
//! Each executor owns one job at a time and is the only writer of that job's
//! `running`/`completed`/`failed` transitions. Chunks are appended in backend
//! order with sequence numbers from the store's atomic counter, so the log
//! every reader sees is dense and totally ordered.

use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::admission::AdmissionController;
use crate::backend::{BackendChatRequest, CompletionBackend, StreamRecord};
use crate::cancel::CancellationRegistry;
use crate::metrics::{self, JobOutcome};
use crate::models::{Chunk, FinishReason, JobStatus, JOB_TTL};
use crate::store::{ChunkStore, StoreError, StoreResult};

/// Everything an executor needs to drive a job.
pub struct ExecutorContext<S, B> {
    pub store: Arc<S>,
    pub backend: Arc<B>,
    pub admission: Arc<AdmissionController>,
    pub cancellations: Arc<CancellationRegistry>,
}

impl<S, B> Clone for ExecutorContext<S, B> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            backend: Arc::clone(&self.backend),
            admission: Arc::clone(&self.admission),
            cancellations: Arc::clone(&self.cancellations),
        }
    }
}

/// Handle to the running pool; join it during shutdown.
pub struct ExecutorPool {
    handles: Vec<JoinHandle<()>>,
}

impl ExecutorPool {
    /// Launch `concurrency` executor tasks over the shared job FIFO.
    ///
    /// The receiver sits behind an async mutex: executors take turns popping,
    /// and the lock is free while a job is being processed, so N jobs run in
    /// parallel.
    pub fn spawn<S, B>(
        concurrency: usize,
        queue: mpsc::Receiver<Uuid>,
        ctx: ExecutorContext<S, B>,
        shutdown: watch::Receiver<bool>,
    ) -> Self
    where
        S: ChunkStore,
        B: CompletionBackend,
    {
        let queue = Arc::new(tokio::sync::Mutex::new(queue));
        let handles = (0..concurrency.max(1))
            .map(|worker_id| {
                tokio::spawn(executor_loop(
                    worker_id,
                    Arc::clone(&queue),
                    ctx.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        Self { handles }
    }

    /// Wait for every executor task to stop.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn executor_loop<S, B>(
    worker_id: usize,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<Uuid>>>,
    ctx: ExecutorContext<S, B>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: ChunkStore,
    B: CompletionBackend,
{
    debug!(worker_id, "executor started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let job_id = tokio::select! {
            changed = shutdown.changed() => {
                match changed {
                    Ok(()) if *shutdown.borrow() => break,
                    Ok(()) => continue,
                    // Sender gone: the process is tearing down.
                    Err(_) => break,
                }
            }
            popped = async { queue.lock().await.recv().await } => {
                match popped {
                    Some(id) => id,
                    // Channel closed: the admission controller is gone.
                    None => break,
                }
            }
        };

        ctx.admission.note_dequeued();
        let start = Instant::now();
        let outcome = run_job(&ctx, job_id).await;
        ctx.admission.note_finished();

        metrics::record_job_processed(outcome);
        metrics::record_job_duration(outcome, start.elapsed());
    }

    debug!(worker_id, "executor stopped");
}

async fn run_job<S, B>(ctx: &ExecutorContext<S, B>, job_id: Uuid) -> JobOutcome
where
    S: ChunkStore,
    B: CompletionBackend,
{
    match execute(ctx, job_id).await {
        Ok(outcome) => outcome,
        Err(e) => {
            // A store failure mid-job must not take the executor down; try
            // to leave the job observably failed and move on.
            error!(job_id = %job_id, error = %e, "job aborted on store failure");
            if let Err(follow_up) =
                fail_job(ctx.store.as_ref(), job_id, &format!("store failure: {}", e)).await
            {
                error!(job_id = %job_id, error = %follow_up, "could not record job failure");
            }
            JobOutcome::Failed
        }
    }
}

async fn execute<S, B>(ctx: &ExecutorContext<S, B>, job_id: Uuid) -> StoreResult<JobOutcome>
where
    S: ChunkStore,
    B: CompletionBackend,
{
    // A job cancelled while still queued never runs; its status was already
    // flipped by the cancel endpoint, only the TTL remains to be set.
    if ctx.cancellations.is_cancelled(job_id) {
        ctx.store.set_ttl(job_id, JOB_TTL).await?;
        info!(job_id = %job_id, "job cancelled before execution");
        return Ok(JobOutcome::Cancelled);
    }

    let meta = match ctx.store.get_meta(job_id).await {
        Ok(meta) => meta,
        Err(StoreError::NotFound(_)) => {
            warn!(job_id = %job_id, "job vanished before execution, abandoning");
            return Ok(JobOutcome::Abandoned);
        }
        Err(e) => return Err(e),
    };
    match meta.status {
        JobStatus::Queued => {}
        JobStatus::Cancelled => {
            ctx.store.set_ttl(job_id, JOB_TTL).await?;
            return Ok(JobOutcome::Cancelled);
        }
        other => {
            warn!(job_id = %job_id, status = %other, "unexpected status at dequeue, abandoning");
            return Ok(JobOutcome::Abandoned);
        }
    }

    ctx.store
        .update_status(job_id, JobStatus::Running, None, None)
        .await?;
    info!(job_id = %job_id, model = %meta.model, "job started");

    let request = BackendChatRequest {
        model: meta.model,
        messages: meta.messages,
        stream: true,
        options: meta.options,
    };
    let mut records = match ctx.backend.chat_stream(request).await {
        Ok(stream) => stream,
        Err(e) => {
            fail_job(ctx.store.as_ref(), job_id, &e.to_string()).await?;
            return Ok(JobOutcome::Failed);
        }
    };

    loop {
        match records.next().await {
            // Clean EOF without a done record: the log simply ends.
            None => {
                complete_job(ctx.store.as_ref(), job_id).await?;
                return Ok(JobOutcome::Completed);
            }
            Some(Err(e)) => {
                fail_job(ctx.store.as_ref(), job_id, &e.to_string()).await?;
                return Ok(JobOutcome::Failed);
            }
            Some(Ok(record)) => {
                // Cancellation is observed between records; one record of
                // extra output after a cancel is the accepted trade-off.
                if ctx.cancellations.is_cancelled(job_id) {
                    cancel_job(ctx.store.as_ref(), job_id).await?;
                    return Ok(JobOutcome::Cancelled);
                }

                let done = record.done;
                append_record(ctx.store.as_ref(), job_id, record).await?;
                if done {
                    complete_job(ctx.store.as_ref(), job_id).await?;
                    return Ok(JobOutcome::Completed);
                }
            }
        }
    }
}

async fn append_record<S: ChunkStore + ?Sized>(
    store: &S,
    job_id: Uuid,
    record: StreamRecord,
) -> StoreResult<()> {
    let seq = store.next_seq(job_id).await?;
    let finish_reason = record.done.then(|| {
        if record.done_reason.as_deref() == Some("length") {
            FinishReason::Length
        } else {
            FinishReason::Stop
        }
    });
    let chunk = Chunk {
        seq,
        delta: record.delta,
        done: record.done,
        finish_reason,
        error: None,
    };
    store.append_chunk(job_id, &chunk).await?;
    metrics::record_chunk_appended();
    Ok(())
}

async fn complete_job<S: ChunkStore + ?Sized>(store: &S, job_id: Uuid) -> StoreResult<()> {
    store
        .update_status(job_id, JobStatus::Completed, Some(Utc::now()), None)
        .await?;
    store.set_ttl(job_id, JOB_TTL).await?;
    info!(job_id = %job_id, "job completed");
    Ok(())
}

/// Terminate a job on the failure path: synthetic terminal chunk, `failed`
/// status, TTL. Readers polling the log observe the error in-band.
pub(crate) async fn fail_job<S: ChunkStore + ?Sized>(
    store: &S,
    job_id: Uuid,
    reason: &str,
) -> StoreResult<()> {
    let seq = store.next_seq(job_id).await?;
    let chunk = Chunk {
        seq,
        delta: String::new(),
        done: true,
        finish_reason: Some(FinishReason::Error),
        error: Some(reason.to_string()),
    };
    store.append_chunk(job_id, &chunk).await?;
    store
        .update_status(job_id, JobStatus::Failed, Some(Utc::now()), Some(reason))
        .await?;
    store.set_ttl(job_id, JOB_TTL).await?;
    warn!(job_id = %job_id, error = %reason, "job failed");
    Ok(())
}

/// Terminate a running job that was cancelled mid-stream. The terminal chunk
/// carries `error="cancelled"`; the status stays `cancelled`, matching what
/// the cancel endpoint already wrote.
async fn cancel_job<S: ChunkStore + ?Sized>(store: &S, job_id: Uuid) -> StoreResult<()> {
    let seq = store.next_seq(job_id).await?;
    let chunk = Chunk {
        seq,
        delta: String::new(),
        done: true,
        finish_reason: Some(FinishReason::Error),
        error: Some("cancelled".to_string()),
    };
    store.append_chunk(job_id, &chunk).await?;
    store
        .update_status(job_id, JobStatus::Cancelled, Some(Utc::now()), None)
        .await?;
    store.set_ttl(job_id, JOB_TTL).await?;
    info!(job_id = %job_id, "job cancelled mid-stream");
    Ok(())
}

/// Startup recovery: jobs left non-terminal by a previous process (queued or
/// running at crash time) are swept to `failed` with a synthetic terminal
/// chunk, so pollers waiting on them resolve instead of hanging until their
/// own deadlines.
pub async fn sweep_stale_jobs<S: ChunkStore>(store: &S) -> StoreResult<usize> {
    let stale = store.non_terminal_jobs().await?;
    let mut swept = 0;

    for job_id in stale {
        match fail_job(store, job_id, "worker restarted").await {
            Ok(()) => swept += 1,
            Err(e) => error!(job_id = %job_id, error = %e, "failed to sweep stale job"),
        }
    }

    if swept > 0 {
        info!(count = swept, "swept stale jobs to failed");
    }
    Ok(swept)
}
