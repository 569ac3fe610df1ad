//! Recovery manager: re-drives threads left INCOMPLETE by a crash or a
//! failed turn.
//!
//! A scan picks up INCOMPLETE threads whose last checkpoint is older than
//! the staleness threshold.  Each is handled under its thread lock, taken
//! without waiting so a live request always wins.  Corrupt checkpoints and
//! threads out of recovery attempts are marked FAILED and never retried.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use sy_domain::config::Config;
use sy_domain::error::Error;
use sy_domain::thread::ThreadStatus;
use sy_domain::trace::TraceEvent;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::engine::{ExecutionEngine, TurnStatus};

/// Counts for one `scan_and_recover` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub scanned: usize,
    pub recovered: usize,
    pub still_incomplete: usize,
    pub skipped_busy: usize,
    pub marked_corrupt: usize,
    pub marked_exhausted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Recovered,
    StillIncomplete,
    SkippedBusy,
    MarkedCorrupt,
    MarkedExhausted,
    /// Completed or failed by someone else since the scan.
    Settled,
}

pub struct RecoveryManager {
    engine: Arc<ExecutionEngine>,
}

impl RecoveryManager {
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self { engine }
    }

    pub async fn scan_and_recover(&self) -> RecoveryReport {
        self.scan_and_recover_at(Utc::now()).await
    }

    /// One pass using `now` as the reference time for staleness.
    pub async fn scan_and_recover_at(&self, now: DateTime<Utc>) -> RecoveryReport {
        let cfg = self.engine.config();
        let staleness = Duration::from_secs(cfg.recovery.staleness_secs);
        let ids = self.engine.store().scan_incomplete_at(now, staleness);

        let mut report = RecoveryReport {
            scanned: ids.len(),
            ..Default::default()
        };
        let cfg_ref = &cfg;
        let actions: Vec<Action> = futures_util::stream::iter(ids)
            .map(|id| async move { self.recover_one(cfg_ref, &id).await })
            .buffer_unordered(cfg.recovery.max_concurrent.max(1))
            .collect()
            .await;

        for action in actions {
            match action {
                Action::Recovered => report.recovered += 1,
                Action::StillIncomplete => report.still_incomplete += 1,
                Action::SkippedBusy => report.skipped_busy += 1,
                Action::MarkedCorrupt => report.marked_corrupt += 1,
                Action::MarkedExhausted => report.marked_exhausted += 1,
                Action::Settled => {}
            }
        }

        TraceEvent::RecoveryScan {
            scanned: report.scanned,
            recovered: report.recovered,
            still_incomplete: report.still_incomplete,
            skipped_busy: report.skipped_busy,
            marked_corrupt: report.marked_corrupt,
            marked_exhausted: report.marked_exhausted,
        }
        .emit();
        report
    }

    async fn recover_one(&self, cfg: &Config, thread_id: &str) -> Action {
        let Ok(guard) = self.engine.locks().try_acquire(thread_id) else {
            tracing::debug!(thread_id, "thread busy, skipping recovery");
            return Action::SkippedBusy;
        };
        let store = self.engine.store();

        let state = match store.load(thread_id) {
            Ok(state) => state,
            Err(Error::CheckpointCorrupt { reason, .. }) => {
                tracing::error!(thread_id, reason = %reason, "corrupt checkpoint, marking thread failed");
                let reason = format!("CheckpointCorrupt: {reason}");
                if let Err(e) = store.mark_failed(thread_id, &reason) {
                    tracing::error!(thread_id, error = %e, "could not mark corrupt thread failed");
                    return Action::StillIncomplete;
                }
                return Action::MarkedCorrupt;
            }
            Err(Error::CheckpointNotFound(_)) => return Action::Settled,
            Err(e) => {
                tracing::error!(thread_id, error = %e, "could not load checkpoint");
                return Action::StillIncomplete;
            }
        };
        if state.status != ThreadStatus::Incomplete {
            return Action::Settled;
        }

        if state.recovery_attempts >= cfg.recovery.max_attempts {
            let reason = format!(
                "RecoveryExhausted: gave up after {} recovery attempts",
                state.recovery_attempts
            );
            tracing::error!(
                thread_id,
                attempts = state.recovery_attempts,
                step = %state.current_step,
                "recovery attempts exhausted, thread needs operator attention"
            );
            return match store.mark_failed(thread_id, &reason) {
                Ok(()) => Action::MarkedExhausted,
                Err(e) => {
                    tracing::error!(thread_id, error = %e, "could not mark exhausted thread failed");
                    Action::StillIncomplete
                }
            };
        }

        tracing::info!(
            thread_id,
            step = %state.current_step,
            attempt = state.recovery_attempts + 1,
            "re-driving thread"
        );
        match self.engine.resume(&guard).await {
            Ok(Some(outcome)) => match outcome.status {
                TurnStatus::Completed { .. } => Action::Recovered,
                TurnStatus::Processing { .. } => Action::StillIncomplete,
                TurnStatus::Failed { .. } => Action::MarkedExhausted,
            },
            Ok(None) => Action::Settled,
            Err(e) => {
                tracing::error!(thread_id, error = %e, "re-drive aborted");
                Action::StillIncomplete
            }
        }
    }
}

/// Run `scan_and_recover` now and then every `[recovery].interval_secs`
/// until `shutdown` is notified.
pub fn spawn_recovery_loop(manager: Arc<RecoveryManager>, shutdown: Arc<Notify>) -> JoinHandle<()> {
    let interval_secs = manager.engine.config().recovery.interval_secs.max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    tracing::info!("recovery loop stopped");
                    break;
                }
                _ = interval.tick() => {
                    if manager.engine.config().recovery.enabled {
                        let report = manager
                            .scan_and_recover()
                            .instrument(tracing::info_span!("recovery_scan"))
                            .await;
                        if report.scanned > 0 {
                            tracing::info!(?report, "recovery scan finished");
                        }
                    }
                    manager.engine.locks().prune_idle();
                }
            }
        }
    })
}
