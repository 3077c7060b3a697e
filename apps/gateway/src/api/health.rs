use axum::extract::State;
use axum::Json;

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /health`: liveness.
pub async fn health() -> &'static str {
    "OK"
}

/// `GET /v1/stats`: the worker's admission counters, proxied verbatim.
pub async fn stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state
        .worker
        .stats()
        .await
        .map_err(|e| ApiError::Internal(format!("failed to fetch worker stats: {}", e)))?;
    Ok(Json(stats))
}
