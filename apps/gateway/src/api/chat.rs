use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::info;

use crate::config::Config;
use crate::error::ApiError;
use crate::openai::ChatCompletionRequest;
use crate::relay;
use crate::state::AppState;
use crate::worker_client::WorkerError;

/// `POST /v1/chat/completions`
///
/// Auth check, request validation, job creation on the worker, then either
/// the resumable SSE stream or the buffered aggregation.
pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    check_auth(&state.config, &headers)?;

    let Json(request) = payload?;
    if request.model.trim().is_empty() {
        return Err(ApiError::BadRequest("model must not be empty".to_string()));
    }
    if request.messages.is_empty() {
        return Err(ApiError::BadRequest(
            "messages must not be empty".to_string(),
        ));
    }

    let stream = request.stream;
    let model = request.model.clone();

    let created = state
        .worker
        .create_job(&request.into_job_request())
        .await
        .map_err(|e| match e {
            WorkerError::Overloaded(message) => ApiError::Overloaded(message),
            other => ApiError::Internal(format!("failed to create job: {}", other)),
        })?;

    info!(job_id = %created.job_id, model = %model, stream, "accepted chat completion");

    let poll_config = relay::PollConfig::from(state.config.as_ref());
    if stream {
        Ok(relay::sse_response(
            state.worker.clone(),
            poll_config,
            created.job_id,
            model,
        ))
    } else {
        let completion =
            relay::aggregate_response(state.worker.clone(), poll_config, created.job_id, model)
                .await?;
        Ok(completion.into_response())
    }
}

/// Static shared-secret bearer check, enabled by configuration.
fn check_auth(config: &Config, headers: &HeaderMap) -> Result<(), ApiError> {
    if !config.api_key_required {
        return Ok(());
    }
    let expected = config
        .api_key
        .as_deref()
        .ok_or_else(|| ApiError::Unauthorized("API key not configured".to_string()))?;

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    match provided {
        Some(key) if key == expected => Ok(()),
        _ => Err(ApiError::Unauthorized(
            "invalid or missing API key".to_string(),
        )),
    }
}
