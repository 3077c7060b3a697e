//! Relay Worker Service
//!
//! The worker tier of the chat-completion relay:
//!
//! ```text
//! POST /jobs ──► admission (ceiling 2N) ──► bounded FIFO
//!                                               │
//!                              ExecutorPool (N long-lived tasks)
//!                                               │
//!                           inference backend (streaming chat call)
//!                                               │
//!                        Redis chunk store (meta, ordered log, seq)
//!                                               ▲
//! GET /jobs/{id}/events ────────────────────────┘
//! ```
//!
//! On startup, jobs left non-terminal by a previous process are swept to
//! `failed` so pollers resolve instead of hanging.

use axum::Router;
use domain_jobs::{
    handlers, metrics, sweep_stale_jobs, AdmissionController, CancellationRegistry,
    ExecutorContext, ExecutorPool, JobService, OllamaBackend, RedisChunkStore,
};
use eyre::{Result, WrapErr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

mod config;
mod ops;

pub use config::Config;

/// Run the relay worker.
///
/// 1. Loads configuration and sets up structured logging + metrics
/// 2. Connects to Redis (with retry) and sweeps stale jobs
/// 3. Spawns the executor pool over the admission FIFO
/// 4. Serves the job API until SIGINT/SIGTERM, then drains the pool
pub async fn run() -> Result<()> {
    let environment = config::Environment::from_env();
    core_config::tracing::init_tracing(&environment);
    metrics::init_metrics();

    let config = Config::from_env().wrap_err("Failed to load worker configuration")?;
    info!(
        name = %config.app.name,
        version = %config.app.version,
        "Starting relay worker"
    );
    info!("Environment: {:?}", config.environment);
    info!(
        concurrency = config.concurrency,
        queue_cap = config.concurrency * 2,
        backend = %config.backend_url,
        "Worker configuration loaded"
    );

    info!("Connecting to Redis...");
    let redis = database::redis::connect_from_config_with_retry(&config.redis, None)
        .await
        .wrap_err("Failed to connect to Redis")?;
    info!("Connected to Redis successfully");

    let store = Arc::new(RedisChunkStore::new(redis.clone()));

    // Restart recovery: sweep jobs orphaned by a previous process.
    let swept = sweep_stale_jobs(store.as_ref())
        .await
        .wrap_err("Startup sweep failed")?;
    if swept > 0 {
        info!(count = swept, "Recovered from unclean shutdown");
    }

    let (admission, queue_rx) = AdmissionController::new(config.concurrency);
    let cancellations = Arc::new(CancellationRegistry::new());
    let backend = Arc::new(
        OllamaBackend::new(&config.backend_url)
            .map_err(|e| eyre::eyre!("Failed to build backend client: {}", e))?,
    );

    // Shutdown fans out through a watch channel: the HTTP server stops
    // accepting, executors finish their current job and exit.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let ctx = ExecutorContext {
        store: Arc::clone(&store),
        backend,
        admission: Arc::clone(&admission),
        cancellations: Arc::clone(&cancellations),
    };
    let pool = ExecutorPool::spawn(config.concurrency, queue_rx, ctx, shutdown_rx.clone());
    info!("Executor pool started");

    let service = JobService::new(store, admission, cancellations);
    let app: Router = handlers::router(service)
        .merge(ops::router(redis))
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(config.server.address())
        .await
        .wrap_err_with(|| format!("Failed to bind to {}", config.server.address()))?;
    info!("Worker listening on {}", listener.local_addr()?);

    let mut server_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.changed().await;
        })
        .await
        .inspect_err(|e| error!("Server encountered an error: {:?}", e))?;

    // Let in-flight jobs finish, but never hang shutdown on a stuck stream.
    info!("Draining executor pool...");
    if tokio::time::timeout(std::time::Duration::from_secs(30), pool.join())
        .await
        .is_err()
    {
        error!("Executor pool did not drain within 30s, exiting anyway");
    }

    info!("Relay worker stopped");
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
