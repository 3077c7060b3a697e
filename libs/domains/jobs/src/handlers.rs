//! Axum handlers for the worker's job surface.
//!
//! Thin and stateless apart from the shared [`JobService`]: decode, call the
//! service, serialize. Error responses come from [`JobError`]'s
//! `IntoResponse` impl.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::JobResult;
use crate::models::{CreateJobRequest, CreateJobResponse, JobEvents, JobStatusResponse, WorkerStats};
use crate::service::JobService;
use crate::store::ChunkStore;

/// Build the worker's job router.
pub fn router<S: ChunkStore>(service: JobService<S>) -> Router {
    Router::new()
        .route("/jobs", post(create_job::<S>))
        .route("/jobs/{id}/events", get(job_events::<S>))
        .route("/jobs/{id}/status", get(job_status::<S>))
        .route("/jobs/{id}/cancel", post(cancel_job::<S>))
        .route("/stats", get(stats::<S>))
        .with_state(Arc::new(service))
}

#[derive(Debug, Deserialize)]
struct EventsParams {
    /// Cursor: only chunks with `seq > from_seq` are returned.
    #[serde(default)]
    from_seq: i64,
}

async fn create_job<S: ChunkStore>(
    State(service): State<Arc<JobService<S>>>,
    Json(request): Json<CreateJobRequest>,
) -> JobResult<Json<CreateJobResponse>> {
    let response = service.create_job(request).await?;
    Ok(Json(response))
}

async fn job_events<S: ChunkStore>(
    State(service): State<Arc<JobService<S>>>,
    Path(id): Path<Uuid>,
    Query(params): Query<EventsParams>,
) -> JobResult<Json<JobEvents>> {
    let events = service.events(id, params.from_seq).await?;
    Ok(Json(events))
}

async fn job_status<S: ChunkStore>(
    State(service): State<Arc<JobService<S>>>,
    Path(id): Path<Uuid>,
) -> JobResult<Json<JobStatusResponse>> {
    let status = service.status(id).await?;
    Ok(Json(status))
}

async fn cancel_job<S: ChunkStore>(
    State(service): State<Arc<JobService<S>>>,
    Path(id): Path<Uuid>,
) -> JobResult<StatusCode> {
    service.cancel(id).await?;
    Ok(StatusCode::OK)
}

async fn stats<S: ChunkStore>(State(service): State<Arc<JobService<S>>>) -> Json<WorkerStats> {
    Json(service.stats())
}
