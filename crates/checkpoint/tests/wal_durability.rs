use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use sy_checkpoint::{CheckpointStore, WalCheckpointStore};
use sy_domain::config::CheckpointConfig;
use sy_domain::error::Error;
use sy_domain::thread::{CachedResult, ExecutionStep, ThreadState, ThreadStatus};

fn open(dir: &std::path::Path) -> WalCheckpointStore {
    WalCheckpointStore::open_dir(dir, true).unwrap()
}

fn append_raw(store: &WalCheckpointStore, bytes: &[u8]) {
    let mut f = OpenOptions::new().append(true).open(store.path()).unwrap();
    f.write_all(bytes).unwrap();
}

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(dir.path());
        let mut state = ThreadState::new("t1", Some("acme".into()), "what is 25*17?");
        state.partial.insert_result(CachedResult {
            idempotency_key: "k0".into(),
            call_index: 0,
            capability: "math_solver".into(),
            output: json!({"result": 425}),
            usage: Default::default(),
            completed_at: Utc::now(),
        });
        store
            .mark_incomplete(&mut state, ExecutionStep::ToolExecuting)
            .unwrap();
    }

    let store = open(dir.path());
    let state = store.load("t1").unwrap();
    assert_eq!(state.status, ThreadStatus::Incomplete);
    assert_eq!(state.current_step, ExecutionStep::ToolExecuting);
    assert_eq!(state.partial.cached("k0").unwrap().output["result"], 425);
}

#[test]
fn torn_tail_keeps_previous_record() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(dir.path());
        let mut state = ThreadState::new("t1", None, "q");
        store
            .mark_incomplete(&mut state, ExecutionStep::ToolSelecting)
            .unwrap();
        append_raw(&store, br#"{"v":1,"seq":2,"thread_id":"t1","status":"COMPL"#);
    }

    let store = open(dir.path());
    assert_eq!(
        store.load("t1").unwrap().current_step,
        ExecutionStep::ToolSelecting
    );

    // Later appends are not glued onto the torn line.
    let mut other = ThreadState::new("t2", None, "q");
    store.mark_complete(&mut other).unwrap();
    drop(store);
    let store = open(dir.path());
    assert_eq!(store.load("t2").unwrap().status, ThreadStatus::Complete);
    assert_eq!(store.list_threads(), vec!["t1".to_string(), "t2".to_string()]);
}

#[test]
fn unterminated_bytes_mid_session_do_not_swallow_next_record() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(dir.path());
        let mut first = ThreadState::new("t1", None, "q");
        store
            .mark_incomplete(&mut first, ExecutionStep::ToolSelecting)
            .unwrap();
        // A write that died partway, while the store stays open.
        append_raw(&store, br#"{"v":1,"seq":2,"thread_id":"t1","sta"#);

        let mut second = ThreadState::new("t2", None, "q");
        store.mark_complete(&mut second).unwrap();
        assert_eq!(store.load("t2").unwrap().status, ThreadStatus::Complete);
    }

    let store = open(dir.path());
    assert_eq!(store.load("t2").unwrap().status, ThreadStatus::Complete);
    assert_eq!(
        store.load("t1").unwrap().current_step,
        ExecutionStep::ToolSelecting
    );

    // And the session after that keeps appending cleanly.
    let mut third = ThreadState::new("t3", None, "q");
    store.mark_complete(&mut third).unwrap();
    drop(store);
    let store = open(dir.path());
    assert_eq!(
        store.list_threads(),
        vec!["t1".to_string(), "t2".to_string(), "t3".to_string()]
    );
}

#[test]
fn attributable_garbage_surfaces_as_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(dir.path());
        let mut state = ThreadState::new("t1", None, "q");
        store
            .mark_incomplete(&mut state, ExecutionStep::Classifying)
            .unwrap();
        append_raw(&store, b"{\"thread_id\":\"t1\",\"status\":\"INCOMPLETE\"}\n");
    }

    let store = open(dir.path());
    assert!(matches!(
        store.load("t1"),
        Err(Error::CheckpointCorrupt { .. })
    ));
    store.mark_failed("t1", "checkpoint corrupt").unwrap();
    assert_eq!(store.stats().failed, 1);
    assert!(store
        .scan_incomplete_at(Utc::now() + chrono::Duration::days(1), Duration::from_secs(1))
        .is_empty());
}

#[test]
fn failed_reason_visible_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(dir.path());
        let mut state = ThreadState::new("t1", None, "q");
        store
            .mark_incomplete(&mut state, ExecutionStep::ToolExecuting)
            .unwrap();
        store.mark_failed("t1", "recovery attempts exhausted").unwrap();
    }
    let store = open(dir.path());
    let state = store.load("t1").unwrap();
    assert_eq!(state.status, ThreadStatus::Failed);
    assert_eq!(
        state.failure_reason.as_deref(),
        Some("recovery attempts exhausted")
    );
}

#[test]
fn compact_on_open_shrinks_log() {
    let dir = tempfile::tempdir().unwrap();
    let config = CheckpointConfig {
        dir: dir.path().to_path_buf(),
        fsync: true,
        compact_on_open: true,
    };
    let bytes_before = {
        let store = WalCheckpointStore::open(&config).unwrap();
        let mut state = ThreadState::new("t1", None, "q");
        for _ in 0..10 {
            store
                .mark_incomplete(&mut state, ExecutionStep::ToolExecuting)
                .unwrap();
        }
        store.stats().wal_bytes
    };
    let store = WalCheckpointStore::open(&config).unwrap();
    assert!(store.stats().wal_bytes < bytes_before);
    assert_eq!(store.stats().threads, 1);
}

#[test]
fn concurrent_writers_on_distinct_threads() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(open(dir.path()));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            std::thread::spawn(move || {
                let mut state = ThreadState::new(format!("t{i}"), None, "q");
                for step in [
                    ExecutionStep::Classifying,
                    ExecutionStep::ToolSelecting,
                    ExecutionStep::Synthesizing,
                ] {
                    store.mark_incomplete(&mut state, step).unwrap();
                }
                store.mark_complete(&mut state).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    drop(store);

    let store = open(dir.path());
    let stats = store.stats();
    assert_eq!(stats.threads, 8);
    assert_eq!(stats.complete, 8);
}
