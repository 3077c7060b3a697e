//! Relay Gateway Service
//!
//! The client-facing tier of the chat-completion relay. Speaks the
//! OpenAI-compatible chat protocol, turns each request into a worker job,
//! and reconstructs an uninterrupted response stream by polling the worker's
//! chunk log with a sequence cursor. Transient worker outages are absorbed by
//! exponential backoff and never surface to the client before the overall
//! deadline.

use eyre::{Result, WrapErr};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod api;
pub mod config;
pub mod error;
pub mod openai;
pub mod relay;
pub mod state;
pub mod worker_client;

pub use config::Config;
pub use state::AppState;
pub use worker_client::WorkerClient;

/// Run the relay gateway until SIGINT/SIGTERM.
pub async fn run() -> Result<()> {
    let config = Config::from_env().wrap_err("Failed to load gateway configuration")?;
    core_config::tracing::init_tracing(&config.environment);

    info!(
        name = %config.app.name,
        version = %config.app.version,
        "Starting relay gateway"
    );
    info!("Environment: {:?}", config.environment);
    info!(
        worker_url = %config.worker_url,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        job_timeout_ms = config.job_timeout.as_millis() as u64,
        auth_required = config.api_key_required,
        "Gateway configuration loaded"
    );

    let worker = WorkerClient::new(&config.worker_url)
        .wrap_err("Failed to build worker client")?;
    let state = AppState::new(config, worker);

    let address = state.config.server.address();
    let app = api::routes(state).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&address)
        .await
        .wrap_err_with(|| format!("Failed to bind to {}", address))?;
    info!("Gateway listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("Server failed")?;

    info!("Relay gateway stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }
}
