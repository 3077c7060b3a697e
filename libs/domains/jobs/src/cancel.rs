use std::collections::HashSet;
use std::sync::RwLock;
use uuid::Uuid;

/// In-memory set of cancelled job ids.
///
/// Writers are the cancel endpoint; readers are executors polling between
/// stream records, so at most one record of extra output is produced after a
/// cancel lands. Entries are never removed: ids are small and bounded in
/// practice by the jobs flowing through one TTL window.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    cancelled: RwLock<HashSet<Uuid>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a job cancelled. Idempotent; returns false if it already was.
    pub fn cancel(&self, id: Uuid) -> bool {
        self.cancelled
            .write()
            .expect("cancellation lock poisoned")
            .insert(id)
    }

    pub fn is_cancelled(&self, id: Uuid) -> bool {
        self.cancelled
            .read()
            .expect("cancellation lock poisoned")
            .contains(&id)
    }
}
