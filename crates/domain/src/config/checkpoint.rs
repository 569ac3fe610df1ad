use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Checkpoint store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory holding the write-ahead log.
    #[serde(default = "d_dir")]
    pub dir: PathBuf,
    /// fsync every record before acknowledging the write.
    #[serde(default = "d_true")]
    pub fsync: bool,
    /// Rewrite the log down to one record per thread when opening.
    #[serde(default = "d_true")]
    pub compact_on_open: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: d_dir(),
            fsync: true,
            compact_on_open: true,
        }
    }
}

fn d_dir() -> PathBuf {
    PathBuf::from("./data/checkpoints")
}
fn d_true() -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Recovery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Seconds between background scans.
    #[serde(default = "d_interval_secs")]
    pub interval_secs: u64,
    /// Incomplete threads untouched for longer than this are re-driven.
    #[serde(default = "d_staleness_secs")]
    pub staleness_secs: u64,
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
    /// Re-drives allowed to run at once.
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: d_interval_secs(),
            staleness_secs: d_staleness_secs(),
            max_attempts: d_max_attempts(),
            max_concurrent: d_max_concurrent(),
        }
    }
}

fn d_interval_secs() -> u64 {
    300
}
fn d_staleness_secs() -> u64 {
    300
}
fn d_max_attempts() -> u32 {
    3
}
fn d_max_concurrent() -> usize {
    2
}
