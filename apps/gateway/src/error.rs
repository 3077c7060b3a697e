use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use domain_jobs::ErrorBody;
use serde_json::json;
use thiserror::Error;

/// Client-facing error type for the OpenAI-compatible surface.
///
/// Every variant renders as the wire envelope
/// `{"error": {"message", "type", "code"}}` with the matching HTTP status.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    /// The worker refused admission; forwarded to the client as 429.
    #[error("{0}")]
    Overloaded(String),

    #[error("{0}")]
    Internal(String),

    /// The overall request deadline elapsed (non-streaming only; streaming
    /// responses surface this as an in-band SSE error frame).
    #[error("timeout exceeded")]
    Timeout,

    #[error("invalid request body: {0}")]
    JsonRejection(#[from] JsonRejection),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::JsonRejection(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Overloaded(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) | ApiError::JsonRejection(_) | ApiError::Unauthorized(_) => {
                "invalid_request_error"
            }
            // The overload envelope is pinned by the protocol contract.
            ApiError::Overloaded(_) | ApiError::Internal(_) | ApiError::Timeout => "server_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorBody::new(self.to_string(), self.kind(), json!(status.as_u16()));
        (status, Json(body)).into_response()
    }
}
