use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::admission::AdmissionController;
use crate::cancel::CancellationRegistry;
use crate::error::{JobError, JobResult};
use crate::models::{
    CreateJobRequest, CreateJobResponse, JobEvents, JobMeta, JobStatus, JobStatusResponse,
    WorkerStats, JOB_TTL, MAX_EVENT_CHUNKS,
};
use crate::store::ChunkStore;

/// Service layer for the worker's job surface.
///
/// Thin layer: admission, the store, and the cancellation registry do
/// the real work; this layer sequences them and applies input validation.
pub struct JobService<S: ChunkStore> {
    store: Arc<S>,
    admission: Arc<AdmissionController>,
    cancellations: Arc<CancellationRegistry>,
}

impl<S: ChunkStore> Clone for JobService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            admission: Arc::clone(&self.admission),
            cancellations: Arc::clone(&self.cancellations),
        }
    }
}

impl<S: ChunkStore> JobService<S> {
    pub fn new(
        store: Arc<S>,
        admission: Arc<AdmissionController>,
        cancellations: Arc<CancellationRegistry>,
    ) -> Self {
        Self {
            store,
            admission,
            cancellations,
        }
    }

    /// Accept a job: validate, reserve an admission slot, persist, enqueue.
    ///
    /// The reservation comes first so an overloaded worker rejects before
    /// anything is written; the store write comes before the FIFO submit so
    /// an executor can never pop an id without metadata behind it.
    #[instrument(skip(self, request), fields(model = %request.model))]
    pub async fn create_job(&self, request: CreateJobRequest) -> JobResult<CreateJobResponse> {
        if request.model.trim().is_empty() {
            return Err(JobError::InvalidInput("model must not be empty".into()));
        }
        if request.messages.is_empty() {
            return Err(JobError::InvalidInput("messages must not be empty".into()));
        }

        self.admission.try_reserve()?;

        let meta = JobMeta::new(Uuid::new_v4(), request);
        if let Err(e) = self.store.create_job(&meta).await {
            self.admission.release();
            return Err(e.into());
        }

        if let Err(e) = self.admission.submit(meta.id) {
            // Should be unreachable under the reservation handshake; leave
            // the row failed rather than queued-forever.
            error!(job_id = %meta.id, "reserved submission rejected, failing the job");
            let _ = self
                .store
                .update_status(
                    meta.id,
                    JobStatus::Failed,
                    Some(Utc::now()),
                    Some("executor queue unavailable"),
                )
                .await;
            let _ = self.store.set_ttl(meta.id, JOB_TTL).await;
            return Err(e);
        }

        info!(job_id = %meta.id, "job accepted");
        Ok(CreateJobResponse {
            job_id: meta.id,
            status: JobStatus::Queued,
        })
    }

    /// Chunks with `seq > from_seq` plus the current status, for pollers.
    pub async fn events(&self, id: Uuid, from_seq: i64) -> JobResult<JobEvents> {
        let meta = self.store.get_meta(id).await?;
        let chunks = self.store.read_chunks(id, from_seq, MAX_EVENT_CHUNKS).await?;
        Ok(JobEvents {
            status: meta.status,
            chunks,
        })
    }

    pub async fn status(&self, id: Uuid) -> JobResult<JobStatusResponse> {
        let meta = self.store.get_meta(id).await?;
        Ok(JobStatusResponse {
            status: meta.status,
            created_at: meta.created_at,
            completed_at: meta.completed_at,
            error: meta.error,
        })
    }

    /// Flag a job for cancellation.
    ///
    /// The registry entry stops a running executor between records; the
    /// status write makes queued jobs and polling clients observe the
    /// cancellation immediately. Terminal jobs are left untouched.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: Uuid) -> JobResult<()> {
        let meta = self.store.get_meta(id).await?;
        self.cancellations.cancel(id);

        if !meta.status.is_terminal() {
            self.store
                .update_status(id, JobStatus::Cancelled, Some(Utc::now()), None)
                .await?;
        }

        info!(job_id = %id, "job cancel requested");
        Ok(())
    }

    pub fn stats(&self) -> WorkerStats {
        self.admission.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatMessage;
    use crate::store::MemoryChunkStore;

    fn service_with_capacity(n: usize) -> JobService<MemoryChunkStore> {
        let (admission, rx) = AdmissionController::new(n);
        std::mem::forget(rx);
        JobService::new(
            Arc::new(MemoryChunkStore::new()),
            admission,
            Arc::new(CancellationRegistry::new()),
        )
    }

    fn request() -> CreateJobRequest {
        CreateJobRequest {
            model: "llama3.2".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
            options: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_create_job_persists_queued_meta() {
        let service = service_with_capacity(2);
        let response = service.create_job(request()).await.unwrap();
        assert_eq!(response.status, JobStatus::Queued);

        let status = service.status(response.job_id).await.unwrap();
        assert_eq!(status.status, JobStatus::Queued);
        assert!(status.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_create_job_validates_input() {
        let service = service_with_capacity(2);

        let mut bad_model = request();
        bad_model.model = "  ".to_string();
        assert!(matches!(
            service.create_job(bad_model).await.unwrap_err(),
            JobError::InvalidInput(_)
        ));

        let mut no_messages = request();
        no_messages.messages.clear();
        assert!(matches!(
            service.create_job(no_messages).await.unwrap_err(),
            JobError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn test_create_job_rejects_beyond_ceiling() {
        let service = service_with_capacity(1);

        service.create_job(request()).await.unwrap();
        service.create_job(request()).await.unwrap();
        let err = service.create_job(request()).await.unwrap_err();
        assert!(matches!(err, JobError::Overloaded));

        // A rejected job is never created: stats still show two admitted.
        assert_eq!(service.stats().queued, 2);
    }

    #[tokio::test]
    async fn test_events_unknown_job_is_not_found() {
        let service = service_with_capacity(1);
        let err = service.events(Uuid::new_v4(), -1).await.unwrap_err();
        assert!(matches!(err, JobError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_marks_queued_job_cancelled() {
        let service = service_with_capacity(2);
        let created = service.create_job(request()).await.unwrap();

        service.cancel(created.job_id).await.unwrap();

        let status = service.status(created.job_id).await.unwrap();
        assert_eq!(status.status, JobStatus::Cancelled);
        assert!(status.completed_at.is_some());

        // Idempotent: a second cancel is still 200.
        service.cancel(created.job_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_unknown_job_is_not_found() {
        let service = service_with_capacity(1);
        let err = service.cancel(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, JobError::NotFound(_)));
    }
}
