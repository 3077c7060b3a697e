use std::sync::Arc;

use crate::config::Config;
use crate::worker_client::WorkerClient;

/// Shared application state for the gateway handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub worker: WorkerClient,
}

impl AppState {
    pub fn new(config: Config, worker: WorkerClient) -> Self {
        Self {
            config: Arc::new(config),
            worker,
        }
    }
}
