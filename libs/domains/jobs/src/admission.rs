use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::JobError;
use crate::metrics;
use crate::models::WorkerStats;

#[derive(Debug, Default)]
struct Counts {
    active: usize,
    queued: usize,
}

/// Bounds system load: at most `N` jobs executing and `2N` admitted overall.
///
/// Admission is a two-step handshake so a rejected job is never created and a
/// queued id always has metadata behind it:
///
/// 1. [`try_reserve`](Self::try_reserve) claims a queue slot (or fails with
///    [`JobError::Overloaded`]) BEFORE the job row is written;
/// 2. [`submit`](Self::submit) hands the id to the executor FIFO once the row
///    exists, or [`release`](Self::release) returns the slot if creation
///    failed.
///
/// Nothing here ever waits for capacity: overload is an error, not a queue
/// delay.
pub struct AdmissionController {
    counts: Mutex<Counts>,
    queue_tx: mpsc::Sender<Uuid>,
    concurrency: usize,
}

impl AdmissionController {
    /// Create the controller and the executor-side receiving half of the
    /// job FIFO. The FIFO capacity equals the admission ceiling `2N`.
    pub fn new(concurrency: usize) -> (Arc<Self>, mpsc::Receiver<Uuid>) {
        let concurrency = concurrency.max(1);
        let (queue_tx, queue_rx) = mpsc::channel(concurrency * 2);

        let controller = Arc::new(Self {
            counts: Mutex::new(Counts::default()),
            queue_tx,
            concurrency,
        });
        (controller, queue_rx)
    }

    /// Executor pool size N.
    pub fn capacity(&self) -> usize {
        self.concurrency
    }

    /// Admission ceiling M = 2N.
    pub fn max_queue(&self) -> usize {
        self.concurrency * 2
    }

    /// Claim a queue slot for a job about to be created.
    pub fn try_reserve(&self) -> Result<(), JobError> {
        let mut counts = self.counts.lock().expect("admission mutex poisoned");
        if counts.active + counts.queued >= self.max_queue() {
            warn!(
                active = counts.active,
                queued = counts.queued,
                ceiling = self.max_queue(),
                "admission ceiling reached, rejecting job"
            );
            metrics::record_job_rejected();
            return Err(JobError::Overloaded);
        }
        counts.queued += 1;
        metrics::set_queue_gauges(counts.active, counts.queued);
        Ok(())
    }

    /// Return a reserved slot after a failed job creation.
    pub fn release(&self) {
        let mut counts = self.counts.lock().expect("admission mutex poisoned");
        counts.queued = counts.queued.saturating_sub(1);
        metrics::set_queue_gauges(counts.active, counts.queued);
    }

    /// Hand a created job to the executor FIFO. The reservation guarantees
    /// channel capacity; a full channel here means the handshake was skipped.
    pub fn submit(&self, job_id: Uuid) -> Result<(), JobError> {
        if let Err(e) = self.queue_tx.try_send(job_id) {
            warn!(job_id = %job_id, error = %e, "job FIFO rejected a reserved submission");
            self.release();
            return Err(JobError::Overloaded);
        }
        debug!(job_id = %job_id, "job queued for execution");
        Ok(())
    }

    /// Executor hook: a job left the queue and started executing.
    pub fn note_dequeued(&self) {
        let mut counts = self.counts.lock().expect("admission mutex poisoned");
        counts.queued = counts.queued.saturating_sub(1);
        counts.active += 1;
        metrics::set_queue_gauges(counts.active, counts.queued);
    }

    /// Executor hook: a job finished executing (whatever the outcome).
    pub fn note_finished(&self) {
        let mut counts = self.counts.lock().expect("admission mutex poisoned");
        counts.active = counts.active.saturating_sub(1);
        metrics::set_queue_gauges(counts.active, counts.queued);
    }

    /// Counter snapshot for the `/stats` endpoint.
    pub fn snapshot(&self) -> WorkerStats {
        let counts = self.counts.lock().expect("admission mutex poisoned");
        WorkerStats {
            active: counts.active,
            queued: counts.queued,
            capacity: self.capacity(),
            max_queue: self.max_queue(),
        }
    }
}
