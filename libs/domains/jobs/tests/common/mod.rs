//! Shared test fixtures: a scripted inference backend and a fully wired
//! worker (memory store + admission + executor pool + router).

use async_trait::async_trait;
use axum::Router;
use domain_jobs::backend::{BackendChatRequest, BackendError, CompletionBackend, RecordStream};
use domain_jobs::{
    handlers, AdmissionController, CancellationRegistry, ChatMessage, CreateJobRequest,
    ExecutorContext, ExecutorPool, JobService, MemoryChunkStore, StreamRecord,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Clone)]
pub enum ScriptedEvent {
    Record(StreamRecord),
    DecodeError(String),
}

/// A [`CompletionBackend`] that replays a fixed script for every call.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    events: Vec<ScriptedEvent>,
    /// Pause before each record; lets tests interleave cancels between records.
    delay: Duration,
    /// Pend forever once this many records were yielded.
    hang_after: Option<usize>,
    /// Refuse the call outright with this HTTP status.
    fail_with: Option<u16>,
}

impl ScriptedBackend {
    pub fn with_records(records: Vec<StreamRecord>) -> Self {
        Self {
            events: records.into_iter().map(ScriptedEvent::Record).collect(),
            ..Default::default()
        }
    }

    pub fn with_events(events: Vec<ScriptedEvent>) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }

    pub fn failing_with_status(status: u16) -> Self {
        Self {
            fail_with: Some(status),
            ..Default::default()
        }
    }

    /// Never yields anything; jobs stay running until the test ends.
    pub fn hanging() -> Self {
        Self {
            hang_after: Some(0),
            ..Default::default()
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn chat_stream(&self, _request: BackendChatRequest) -> Result<RecordStream, BackendError> {
        if let Some(status) = self.fail_with {
            return Err(BackendError::Status {
                status,
                body: "scripted failure".to_string(),
            });
        }

        let events = self.events.clone();
        let delay = self.delay;
        let hang_after = self.hang_after;

        let stream = async_stream::stream! {
            for (i, event) in events.into_iter().enumerate() {
                if hang_after.is_some_and(|k| i >= k) {
                    futures::future::pending::<()>().await;
                }
                if delay > Duration::ZERO {
                    tokio::time::sleep(delay).await;
                }
                match event {
                    ScriptedEvent::Record(record) => yield Ok(record),
                    ScriptedEvent::DecodeError(message) => {
                        yield Err(BackendError::Decode(message));
                        return;
                    }
                }
            }
            if hang_after.is_some() {
                futures::future::pending::<()>().await;
            }
        };

        Ok(Box::pin(stream))
    }
}

pub fn record(delta: &str, done: bool, done_reason: Option<&str>) -> StreamRecord {
    StreamRecord {
        delta: delta.to_string(),
        done,
        done_reason: done_reason.map(str::to_string),
    }
}

/// A worker wired exactly like the production binary, minus Redis and HTTP
/// listeners.
pub struct TestWorker {
    pub app: Router,
    pub store: Arc<MemoryChunkStore>,
    pub service: JobService<MemoryChunkStore>,
    shutdown_tx: watch::Sender<bool>,
    pool: Option<ExecutorPool>,
}

impl TestWorker {
    pub fn spawn(concurrency: usize, backend: ScriptedBackend) -> Self {
        let (admission, queue_rx) = AdmissionController::new(concurrency);
        let store = Arc::new(MemoryChunkStore::new());
        let cancellations = Arc::new(CancellationRegistry::new());

        let ctx = ExecutorContext {
            store: Arc::clone(&store),
            backend: Arc::new(backend),
            admission: Arc::clone(&admission),
            cancellations: Arc::clone(&cancellations),
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = ExecutorPool::spawn(concurrency, queue_rx, ctx, shutdown_rx);

        let service = JobService::new(store.clone(), admission, cancellations);
        let app = handlers::router(service.clone());

        Self {
            app,
            store,
            service,
            shutdown_tx,
            pool: Some(pool),
        }
    }

    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(pool) = self.pool.take() {
            pool.join().await;
        }
    }
}

pub fn chat_request() -> CreateJobRequest {
    CreateJobRequest {
        model: "llama3.2".to_string(),
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: "say hello".to_string(),
        }],
        options: Default::default(),
    }
}
