//! Operational endpoints: liveness, Redis readiness, Prometheus metrics.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use redis::aio::ConnectionManager;
use serde_json::json;

/// Router for `/health`, `/ready` and `/metrics`.
pub fn router(redis: ConnectionManager) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(domain_jobs::metrics::metrics_handler))
        .with_state(redis)
}

/// Liveness probe: always OK if the server is running.
async fn health() -> &'static str {
    "OK"
}

/// Readiness probe: verifies the store connection with a PING.
async fn ready(State(redis): State<ConnectionManager>) -> impl IntoResponse {
    let mut conn = redis.clone();
    match database::redis::check_health(&mut conn).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({"status": "ready", "checks": {"redis": "ok"}})),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not_ready", "checks": {"redis": format!("error: {}", e)}})),
        ),
    }
}
