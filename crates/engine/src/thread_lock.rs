//! Per-thread execution locks.
//!
//! At most one engine execution runs per `thread_id`. Live requests either
//! queue behind the in-flight turn or are turned away, depending on the
//! configured busy policy; the recovery manager only ever tries the lock
//! and skips threads that are busy.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Held for the duration of one execution; releases on drop.
pub struct ThreadGuard {
    thread_id: String,
    _permit: OwnedSemaphorePermit,
}

impl ThreadGuard {
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }
}

/// The thread already has an execution in flight.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("thread {0} is busy: an execution is already in progress")]
pub struct ThreadBusy(pub String);

/// Maps each thread id to a `Semaphore(1)`.
#[derive(Default)]
pub struct ThreadLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl ThreadLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn semaphore(&self, thread_id: &str) -> Arc<Semaphore> {
        self.locks
            .lock()
            .entry(thread_id.to_owned())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }

    /// Wait until the thread is free.
    pub async fn acquire(&self, thread_id: &str) -> Result<ThreadGuard, ThreadBusy> {
        let permit = self
            .semaphore(thread_id)
            .acquire_owned()
            .await
            // Only fails if the semaphore is closed, which never happens.
            .map_err(|_| ThreadBusy(thread_id.to_owned()))?;
        Ok(ThreadGuard {
            thread_id: thread_id.to_owned(),
            _permit: permit,
        })
    }

    /// Take the lock only if nobody holds it.
    pub fn try_acquire(&self, thread_id: &str) -> Result<ThreadGuard, ThreadBusy> {
        let permit = self
            .semaphore(thread_id)
            .try_acquire_owned()
            .map_err(|_| ThreadBusy(thread_id.to_owned()))?;
        Ok(ThreadGuard {
            thread_id: thread_id.to_owned(),
            _permit: permit,
        })
    }

    pub fn is_busy(&self, thread_id: &str) -> bool {
        self.locks
            .lock()
            .get(thread_id)
            .is_some_and(|s| s.available_permits() == 0)
    }

    /// Number of tracked threads (for monitoring).
    pub fn thread_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Forget locks nobody holds or waits on.
    pub fn prune_idle(&self) {
        self.locks
            .lock()
            .retain(|_, sem| Arc::strong_count(sem) > 1);
    }
}
