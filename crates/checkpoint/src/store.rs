use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sy_domain::error::Result;
use sy_domain::thread::{ExecutionStep, ThreadState};

/// Counters over the latest record of every thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckpointStats {
    pub threads: usize,
    pub incomplete: usize,
    pub complete: usize,
    pub failed: usize,
    pub wal_bytes: u64,
}

/// Durable, crash-safe thread state keyed by `thread_id`.
///
/// Every mutating call is one atomic record: after a crash a thread is
/// observed either with its previous state or its new one, never a mix.
/// Writes are synchronous; a returned `Ok` means the record is durable.
pub trait CheckpointStore: Send + Sync {
    /// Upsert `state` with `status = INCOMPLETE` and `current_step = step`.
    /// `last_updated` is stamped on `state` before writing.
    fn mark_incomplete(&self, state: &mut ThreadState, step: ExecutionStep) -> Result<()>;

    /// Upsert `state` with `status = COMPLETE` and `current_step = DONE`.
    fn mark_complete(&self, state: &mut ThreadState) -> Result<()>;

    /// Permanently fail a thread. Works even when the stored state no
    /// longer decodes.
    fn mark_failed(&self, thread_id: &str, reason: &str) -> Result<()>;

    /// `CheckpointNotFound` when absent, `CheckpointCorrupt` when the
    /// stored record fails its integrity check.
    fn load(&self, thread_id: &str) -> Result<ThreadState>;

    /// The stored state payload as written, without integrity checks.
    fn load_raw(&self, thread_id: &str) -> Result<serde_json::Value>;

    /// Integrity check without returning the state.
    fn validate(&self, thread_id: &str) -> Result<()> {
        self.load(thread_id).map(|_| ())
    }

    fn contains(&self, thread_id: &str) -> bool;

    /// Incomplete threads whose `last_updated` is strictly older than
    /// `now - older_than`, oldest first.
    fn scan_incomplete_at(&self, now: DateTime<Utc>, older_than: Duration) -> Vec<String>;

    fn scan_incomplete(&self, older_than: Duration) -> Vec<String> {
        self.scan_incomplete_at(Utc::now(), older_than)
    }

    fn list_threads(&self) -> Vec<String>;

    fn stats(&self) -> CheckpointStats;
}
