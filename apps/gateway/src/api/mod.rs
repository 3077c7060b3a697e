//! The gateway's HTTP surface: the OpenAI-compatible subset plus health.

mod chat;
mod health;
mod models;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/models", get(models::list_models))
        .route("/v1/stats", get(health::stats))
        .route("/health", get(health::health))
        .with_state(state)
}
