//! Prometheus metrics for the worker.
//!
//! ## Available metrics
//!
//! - `relay_jobs_processed_total` - Counter of executed jobs by outcome
//! - `relay_jobs_rejected_total` - Counter of admission rejections
//! - `relay_job_duration_seconds` - Histogram of execution time
//! - `relay_chunks_appended_total` - Counter of chunks written to the store
//! - `relay_jobs_active` / `relay_jobs_queued` - Admission gauges

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency
pub mod names {
    pub const JOBS_PROCESSED: &str = "relay_jobs_processed_total";
    pub const JOBS_REJECTED: &str = "relay_jobs_rejected_total";
    pub const JOB_DURATION: &str = "relay_job_duration_seconds";
    pub const CHUNKS_APPENDED: &str = "relay_chunks_appended_total";
    pub const JOBS_ACTIVE: &str = "relay_jobs_active";
    pub const JOBS_QUEUED: &str = "relay_jobs_queued";
}

/// Execution outcome for metrics labeling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
    Cancelled,
    /// Dequeued but never executed (vanished meta, unexpected status)
    Abandoned,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Abandoned => "abandoned",
        }
    }
}

/// Initialize the Prometheus metrics exporter.
///
/// Call once at application startup; returns the handle for rendering.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("Failed to install Prometheus recorder")
        })
        .clone()
}

/// Get the global Prometheus handle, if initialized.
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

/// Axum handler for the `/metrics` endpoint.
pub async fn metrics_handler() -> String {
    match get_metrics_handle() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

pub fn record_job_processed(outcome: JobOutcome) {
    counter!(names::JOBS_PROCESSED, "outcome" => outcome.as_str()).increment(1);
}

pub fn record_job_duration(outcome: JobOutcome, duration: Duration) {
    histogram!(names::JOB_DURATION, "outcome" => outcome.as_str()).record(duration.as_secs_f64());
}

pub fn record_job_rejected() {
    counter!(names::JOBS_REJECTED).increment(1);
}

pub fn record_chunk_appended() {
    counter!(names::CHUNKS_APPENDED).increment(1);
}

pub fn set_queue_gauges(active: usize, queued: usize) {
    gauge!(names::JOBS_ACTIVE).set(active as f64);
    gauge!(names::JOBS_QUEUED).set(queued as f64);
}
