//! Append-only write-ahead log of full thread records.
//!
//! Every write appends one JSON line holding the complete latest state of
//! a thread plus an envelope (status, timestamps, SHA-256 checksum of the
//! state) and is fsync'd before returning.  On open the log is replayed
//! and the last record per thread wins; a torn final line left by a crash
//! is skipped, so the prior record for that thread stays authoritative.
//!
//! Writes go through a single appender lock, which also serializes all
//! writes for any given `thread_id`.  Reads use the in-memory index and
//! never block on I/O.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sy_domain::config::CheckpointConfig;
use sy_domain::error::{Error, Result};
use sy_domain::thread::{ExecutionStep, ThreadState, ThreadStatus};
use sy_domain::trace::TraceEvent;

use crate::store::{CheckpointStats, CheckpointStore};

const WAL_FILE: &str = "checkpoints.wal";
const RECORD_VERSION: u32 = 1;

/// One line of the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalRecord {
    v: u32,
    seq: u64,
    thread_id: String,
    #[serde(default)]
    org_id: Option<String>,
    status: ThreadStatus,
    last_updated: DateTime<Utc>,
    #[serde(default)]
    failure_reason: Option<String>,
    checksum: String,
    state: Value,
}

fn checksum(state: &Value) -> String {
    // serde_json's default map is ordered, so this is canonical.
    let bytes = serde_json::to_vec(state).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

struct Appender {
    file: File,
    seq: u64,
    /// Log length after our last complete write.
    len: u64,
}

pub struct WalCheckpointStore {
    path: PathBuf,
    fsync: bool,
    index: RwLock<HashMap<String, WalRecord>>,
    appender: Mutex<Appender>,
}

impl WalCheckpointStore {
    pub fn open(config: &CheckpointConfig) -> Result<Self> {
        let store = Self::open_dir(&config.dir, config.fsync)?;
        if config.compact_on_open {
            store.compact()?;
        }
        Ok(store)
    }

    /// Open (creating if needed) the log inside `dir`.
    pub fn open_dir(dir: &Path, fsync: bool) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(WAL_FILE);
        let Replayed {
            index,
            seq,
            torn_tail,
        } = replay(&path)?;

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if torn_tail {
            // Terminate the torn line so the next record starts clean.
            file.write_all(b"\n")?;
            file.sync_data()?;
        }
        let len = file.metadata()?.len();
        tracing::info!(
            path = %path.display(),
            threads = index.len(),
            "checkpoint log opened"
        );

        Ok(Self {
            path,
            fsync,
            index: RwLock::new(index),
            appender: Mutex::new(Appender { file, seq, len }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `state` as the thread's new latest record.
    fn write_state(&self, state: &ThreadState) -> Result<()> {
        let value = serde_json::to_value(state)?;
        let mut appender = self.appender.lock();
        let record = WalRecord {
            v: RECORD_VERSION,
            seq: appender.seq + 1,
            thread_id: state.thread_id.clone(),
            org_id: state.org_id.clone(),
            status: state.status,
            last_updated: state.last_updated,
            failure_reason: state.failure_reason.clone(),
            checksum: checksum(&value),
            state: value,
        };
        self.append(&mut appender, record)?;

        TraceEvent::CheckpointWritten {
            thread_id: state.thread_id.clone(),
            status: state.status.to_string(),
            step: state.current_step.to_string(),
        }
        .emit();
        Ok(())
    }

    /// Caller holds the appender lock.
    ///
    /// A record always starts on a fresh line: bytes we did not account for
    /// (a failed earlier write, another writer) are terminated first, and a
    /// write that fails partway is truncated away where the OS allows.
    fn append(&self, appender: &mut Appender, record: WalRecord) -> Result<()> {
        let end = appender.file.metadata()?.len();
        let mut line = Vec::with_capacity(256);
        if end != appender.len {
            tracing::warn!(
                path = %self.path.display(),
                expected = appender.len,
                actual = end,
                "checkpoint log has unterminated bytes, starting a new line"
            );
            line.push(b'\n');
        }
        serde_json::to_writer(&mut line, &record)?;
        line.push(b'\n');

        let written = appender.file.write_all(&line).and_then(|()| {
            if self.fsync {
                appender.file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            // `len` stays put: if the partial bytes survive, the next
            // append sees the mismatch and starts a new line.
            if let Err(trunc) = appender.file.set_len(end) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %trunc,
                    "cannot truncate partial checkpoint record"
                );
            }
            return Err(e.into());
        }

        appender.len = end + line.len() as u64;
        appender.seq = record.seq;
        self.index.write().insert(record.thread_id.clone(), record);
        Ok(())
    }

    /// Rewrite the log to hold only the latest record per thread.
    ///
    /// Written to a temp file, fsync'd, then renamed over the log.
    pub fn compact(&self) -> Result<()> {
        let mut appender = self.appender.lock();
        let tmp = self.path.with_extension("wal.tmp");
        let mut records: Vec<WalRecord> = self.index.read().values().cloned().collect();
        records.sort_by_key(|r| r.seq);

        let written = (|| -> Result<()> {
            let mut f = File::create(&tmp)?;
            for record in &records {
                let mut line = serde_json::to_vec(record)?;
                line.push(b'\n');
                f.write_all(&line)?;
            }
            f.sync_all()?;
            Ok(())
        })();
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }

        std::fs::rename(&tmp, &self.path)?;
        if let Some(dir) = self.path.parent() {
            // Persist the rename itself; not supported on every platform.
            if let Ok(d) = File::open(dir) {
                let _ = d.sync_all();
            }
        }
        appender.file = OpenOptions::new().append(true).open(&self.path)?;
        appender.len = appender.file.metadata()?.len();
        tracing::debug!(records = records.len(), "checkpoint log compacted");
        Ok(())
    }

    fn decode(record: &WalRecord) -> Result<ThreadState> {
        let corrupt = |reason: String| Error::CheckpointCorrupt {
            thread_id: record.thread_id.clone(),
            reason,
        };
        if record.checksum != checksum(&record.state) {
            return Err(corrupt("checksum mismatch".into()));
        }
        let state: ThreadState = serde_json::from_value(record.state.clone())
            .map_err(|e| corrupt(format!("state does not decode: {e}")))?;
        if state.thread_id != record.thread_id {
            return Err(corrupt(format!(
                "record key {} holds state for {}",
                record.thread_id, state.thread_id
            )));
        }
        Ok(state)
    }
}

struct Replayed {
    index: HashMap<String, WalRecord>,
    seq: u64,
    /// The log does not end in a newline (crash mid-append).
    torn_tail: bool,
}

/// Rebuild the index from the log; the last record per thread wins.
fn replay(path: &Path) -> Result<Replayed> {
    let mut out = Replayed {
        index: HashMap::new(),
        seq: 0,
        torn_tail: false,
    };
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };
    out.torn_tail = bytes.last().is_some_and(|b| *b != b'\n');

    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.split('\n').collect();
    let last = lines.len().saturating_sub(1);
    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let err = match serde_json::from_str::<WalRecord>(line) {
            Ok(record) => {
                out.seq = out.seq.max(record.seq);
                out.index.insert(record.thread_id.clone(), record);
                continue;
            }
            Err(e) => e,
        };
        match salvage(line) {
            Some(record) => {
                tracing::warn!(
                    line = i + 1,
                    thread_id = %record.thread_id,
                    error = %err,
                    "malformed checkpoint record"
                );
                out.seq = out.seq.max(record.seq);
                out.index.insert(record.thread_id.clone(), record);
            }
            None if i == last => {
                tracing::warn!(line = i + 1, error = %err, "skipping torn trailing checkpoint record");
            }
            None => {
                tracing::warn!(line = i + 1, error = %err, "unattributable checkpoint line skipped");
            }
        }
    }
    Ok(out)
}

/// Keep a malformed-but-attributable line so the thread surfaces as
/// corrupt instead of silently reverting to an older record.
fn salvage(line: &str) -> Option<WalRecord> {
    let value: Value = serde_json::from_str(line).ok()?;
    let thread_id = value.get("thread_id")?.as_str()?.to_owned();
    let status = value
        .get("status")
        .and_then(|s| serde_json::from_value(s.clone()).ok())
        .unwrap_or(ThreadStatus::Incomplete);
    let last_updated = value
        .get("last_updated")
        .and_then(|s| serde_json::from_value(s.clone()).ok())
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    Some(WalRecord {
        v: RECORD_VERSION,
        seq: value.get("seq").and_then(Value::as_u64).unwrap_or(0),
        thread_id,
        org_id: None,
        status,
        last_updated,
        failure_reason: None,
        checksum: String::new(),
        state: value,
    })
}

impl CheckpointStore for WalCheckpointStore {
    fn mark_incomplete(&self, state: &mut ThreadState, step: ExecutionStep) -> Result<()> {
        state.status = ThreadStatus::Incomplete;
        state.current_step = step;
        state.last_updated = Utc::now();
        self.write_state(state)
    }

    fn mark_complete(&self, state: &mut ThreadState) -> Result<()> {
        state.status = ThreadStatus::Complete;
        state.current_step = ExecutionStep::Done;
        state.failure_reason = None;
        state.last_updated = Utc::now();
        self.write_state(state)
    }

    fn mark_failed(&self, thread_id: &str, reason: &str) -> Result<()> {
        let mut appender = self.appender.lock();
        let previous = self
            .index
            .read()
            .get(thread_id)
            .cloned()
            .ok_or_else(|| Error::CheckpointNotFound(thread_id.to_owned()))?;
        let now = Utc::now();

        let state = match Self::decode(&previous) {
            Ok(mut state) => {
                state.status = ThreadStatus::Failed;
                state.current_step = ExecutionStep::Failed;
                state.failure_reason = Some(reason.to_owned());
                state.last_updated = now;
                serde_json::to_value(&state)?
            }
            // Keep the undecodable payload for operators to inspect.
            Err(_) => previous.state.clone(),
        };

        let record = WalRecord {
            v: RECORD_VERSION,
            seq: appender.seq + 1,
            thread_id: thread_id.to_owned(),
            org_id: previous.org_id.clone(),
            status: ThreadStatus::Failed,
            last_updated: now,
            failure_reason: Some(reason.to_owned()),
            checksum: checksum(&state),
            state,
        };
        self.append(&mut appender, record)?;

        TraceEvent::CheckpointWritten {
            thread_id: thread_id.to_owned(),
            status: ThreadStatus::Failed.to_string(),
            step: ExecutionStep::Failed.to_string(),
        }
        .emit();
        Ok(())
    }

    fn load(&self, thread_id: &str) -> Result<ThreadState> {
        let record = self
            .index
            .read()
            .get(thread_id)
            .cloned()
            .ok_or_else(|| Error::CheckpointNotFound(thread_id.to_owned()))?;
        let mut state = Self::decode(&record)?;
        // The envelope is authoritative for fields mark_failed may have
        // written without re-encoding the state.
        state.status = record.status;
        if record.status == ThreadStatus::Failed {
            state.current_step = ExecutionStep::Failed;
            state.failure_reason = record.failure_reason.clone().or(state.failure_reason);
        }
        Ok(state)
    }

    fn load_raw(&self, thread_id: &str) -> Result<Value> {
        self.index
            .read()
            .get(thread_id)
            .map(|r| r.state.clone())
            .ok_or_else(|| Error::CheckpointNotFound(thread_id.to_owned()))
    }

    fn contains(&self, thread_id: &str) -> bool {
        self.index.read().contains_key(thread_id)
    }

    fn scan_incomplete_at(&self, now: DateTime<Utc>, older_than: Duration) -> Vec<String> {
        let threshold = match chrono::Duration::from_std(older_than) {
            Ok(d) => d,
            Err(_) => return Vec::new(),
        };
        let index = self.index.read();
        let mut stale: Vec<(&DateTime<Utc>, &String)> = index
            .values()
            .filter(|r| r.status == ThreadStatus::Incomplete)
            .filter(|r| now.signed_duration_since(r.last_updated) > threshold)
            .map(|r| (&r.last_updated, &r.thread_id))
            .collect();
        stale.sort();
        stale.into_iter().map(|(_, id)| id.clone()).collect()
    }

    fn list_threads(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.index.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn stats(&self) -> CheckpointStats {
        let index = self.index.read();
        let mut stats = CheckpointStats {
            threads: index.len(),
            wal_bytes: std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0),
            ..Default::default()
        };
        for record in index.values() {
            match record.status {
                ThreadStatus::Incomplete => stats.incomplete += 1,
                ThreadStatus::Complete => stats.complete += 1,
                ThreadStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }
}
