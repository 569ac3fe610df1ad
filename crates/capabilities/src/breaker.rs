//! Per-capability circuit breakers.
//!
//! Each capability name owns its own `Mutex<BreakerCell>`; the outer map
//! lock is only held long enough to find (or lazily create) the cell, so
//! traffic to unrelated capabilities never contends on a shared lock.
//!
//! Cooldowns grow exponentially with consecutive re-opens:
//! `min(base * 2^consecutive_opens, max)`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sy_domain::config::BreakerConfig;
use sy_domain::trace::TraceEvent;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        })
    }
}

#[derive(Debug)]
struct BreakerCell {
    state: BreakerState,
    failure_count: u32,
    consecutive_opens: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    /// Set while the single HALF_OPEN trial call is outstanding.
    trial_started: Option<Instant>,
    total_failures: u64,
    total_successes: u64,
}

impl Default for BreakerCell {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            consecutive_opens: 0,
            opened_at: None,
            opened_at_wall: None,
            trial_started: None,
            total_failures: 0,
            total_successes: 0,
        }
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub capability: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub consecutive_opens: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub cooldown_remaining_ms: u64,
    pub total_failures: u64,
    pub total_successes: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CircuitBreakers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CircuitBreakers {
    config: RwLock<BreakerConfig>,
    cells: RwLock<HashMap<String, Arc<Mutex<BreakerCell>>>>,
}

impl CircuitBreakers {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config: RwLock::new(config),
            cells: RwLock::new(HashMap::new()),
        }
    }

    /// Apply new thresholds; existing state is kept.
    pub fn set_config(&self, config: BreakerConfig) {
        *self.config.write() = config;
    }

    fn cell(&self, capability: &str) -> Arc<Mutex<BreakerCell>> {
        if let Some(cell) = self.cells.read().get(capability) {
            return cell.clone();
        }
        self.cells
            .write()
            .entry(capability.to_owned())
            .or_default()
            .clone()
    }

    fn cooldown(&self, consecutive_opens: u32) -> Duration {
        let cfg = self.config.read();
        let factor = 2u64.saturating_pow(consecutive_opens.min(32));
        let ms = cfg
            .base_cooldown_ms
            .saturating_mul(factor)
            .min(cfg.max_cooldown_ms);
        Duration::from_millis(ms)
    }

    /// Whether a call to `capability` may proceed.
    ///
    /// In OPEN, returns `false` until the cooldown elapses, then moves to
    /// HALF_OPEN and admits exactly one trial call.
    pub fn allow(&self, capability: &str) -> bool {
        let cell = self.cell(capability);
        let mut c = cell.lock();
        let now = Instant::now();
        match c.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let cooldown = self.cooldown(c.consecutive_opens);
                let elapsed = c.opened_at.map_or(cooldown, |t| now.duration_since(t));
                if elapsed >= cooldown {
                    c.state = BreakerState::HalfOpen;
                    c.trial_started = Some(now);
                    transition(capability, BreakerState::Open, BreakerState::HalfOpen, c.failure_count);
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                // A trial whose outcome never got recorded (caller dropped)
                // stops blocking once another cooldown has passed.
                let cooldown = self.cooldown(c.consecutive_opens);
                let stale = c
                    .trial_started
                    .map_or(true, |t| now.duration_since(t) >= cooldown);
                if stale {
                    c.trial_started = Some(now);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, capability: &str) {
        let cell = self.cell(capability);
        let mut c = cell.lock();
        let from = c.state;
        c.state = BreakerState::Closed;
        c.failure_count = 0;
        c.consecutive_opens = 0;
        c.opened_at = None;
        c.opened_at_wall = None;
        c.trial_started = None;
        c.total_successes += 1;
        if from != BreakerState::Closed {
            transition(capability, from, BreakerState::Closed, 0);
        }
    }

    pub fn record_failure(&self, capability: &str) {
        let threshold = self.config.read().failure_threshold;
        let cell = self.cell(capability);
        let mut c = cell.lock();
        c.failure_count = c.failure_count.saturating_add(1);
        c.total_failures += 1;
        match c.state {
            BreakerState::Closed if c.failure_count >= threshold => {
                c.consecutive_opens = 0;
                open(&mut c);
                transition(capability, BreakerState::Closed, BreakerState::Open, c.failure_count);
            }
            BreakerState::Closed => {}
            BreakerState::HalfOpen => {
                c.consecutive_opens = c.consecutive_opens.saturating_add(1);
                open(&mut c);
                transition(capability, BreakerState::HalfOpen, BreakerState::Open, c.failure_count);
            }
            // Late result from a call admitted before the trip.
            BreakerState::Open => {}
        }
    }

    /// Hand back an admission from [`allow`](Self::allow) that will never
    /// be invoked, so a HALF_OPEN breaker admits the next caller at once.
    pub fn release(&self, capability: &str) {
        let cell = self.cell(capability);
        let mut c = cell.lock();
        if c.state == BreakerState::HalfOpen {
            c.trial_started = None;
        }
    }

    /// Operator override: force CLOSED and clear counters.
    pub fn reset(&self, capability: &str) {
        let cell = self.cell(capability);
        let mut c = cell.lock();
        let from = c.state;
        *c = BreakerCell {
            total_failures: c.total_failures,
            total_successes: c.total_successes,
            ..Default::default()
        };
        tracing::info!(capability = %capability, from = %from, "circuit breaker reset");
    }

    pub fn state(&self, capability: &str) -> BreakerState {
        self.cells
            .read()
            .get(capability)
            .map_or(BreakerState::Closed, |c| c.lock().state)
    }

    /// Snapshot of one breaker; untouched capabilities report CLOSED.
    pub fn snapshot(&self, capability: &str) -> BreakerSnapshot {
        let cell = self.cells.read().get(capability).cloned();
        match cell {
            Some(cell) => {
                let c = cell.lock();
                let cooldown_remaining_ms = match (c.state, c.opened_at) {
                    (BreakerState::Open, Some(at)) => self
                        .cooldown(c.consecutive_opens)
                        .saturating_sub(at.elapsed())
                        .as_millis() as u64,
                    _ => 0,
                };
                BreakerSnapshot {
                    capability: capability.to_owned(),
                    state: c.state,
                    failure_count: c.failure_count,
                    consecutive_opens: c.consecutive_opens,
                    opened_at: c.opened_at_wall,
                    cooldown_remaining_ms,
                    total_failures: c.total_failures,
                    total_successes: c.total_successes,
                }
            }
            None => BreakerSnapshot {
                capability: capability.to_owned(),
                state: BreakerState::Closed,
                failure_count: 0,
                consecutive_opens: 0,
                opened_at: None,
                cooldown_remaining_ms: 0,
                total_failures: 0,
                total_successes: 0,
            },
        }
    }

    pub fn snapshot_all(&self) -> Vec<BreakerSnapshot> {
        let mut names: Vec<String> = self.cells.read().keys().cloned().collect();
        names.sort();
        names.iter().map(|n| self.snapshot(n)).collect()
    }
}

fn open(c: &mut BreakerCell) {
    c.state = BreakerState::Open;
    c.opened_at = Some(Instant::now());
    c.opened_at_wall = Some(Utc::now());
    c.trial_started = None;
}

fn transition(capability: &str, from: BreakerState, to: BreakerState, failure_count: u32) {
    if to == BreakerState::Open {
        tracing::warn!(capability = %capability, from = %from, failure_count, "circuit opened");
    } else {
        tracing::info!(capability = %capability, from = %from, to = %to, "circuit transition");
    }
    TraceEvent::BreakerTransition {
        capability: capability.to_owned(),
        from: from.to_string(),
        to: to.to_string(),
        failure_count,
    }
    .emit();
}
