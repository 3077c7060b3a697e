use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::ErrorBody;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    /// Admission ceiling reached; the protocol's in-band "try later".
    #[error("too many requests, queue is full")]
    Overloaded,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("inference backend error: {0}")]
    Backend(String),
}

pub type JobResult<T> = Result<T, JobError>;

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => JobError::NotFound(id),
            other => JobError::Store(other),
        }
    }
}

impl JobError {
    fn status_code(&self) -> StatusCode {
        match self {
            JobError::NotFound(_) => StatusCode::NOT_FOUND,
            JobError::Overloaded => StatusCode::TOO_MANY_REQUESTS,
            JobError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            JobError::Store(_) | JobError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for JobError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Overload keeps its contractual string code; everything else carries
        // the numeric status.
        let (kind, code) = match &self {
            JobError::Overloaded => ("server_error", json!("rate_limit_exceeded")),
            JobError::NotFound(_) | JobError::InvalidInput(_) => {
                ("invalid_request_error", json!(status.as_u16()))
            }
            JobError::Store(_) | JobError::Backend(_) => ("server_error", json!(status.as_u16())),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorBody::new(self.to_string(), kind, code);
        (status, Json(body)).into_response()
    }
}
