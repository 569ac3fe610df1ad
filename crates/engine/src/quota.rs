//! Per-organization run-unit quotas.
//!
//! [`QuotaGate`] checks an org's month-to-date usage (from a
//! [`UsageLedger`]) against its plan limit before a turn starts, and
//! reports a finished turn's run units back to the ledger without
//! blocking the caller.  Ledger failures never fail a request: a read
//! error allows the turn, a write error is logged and dropped.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use sy_domain::capability::Usage;
use sy_domain::config::QuotaConfig;
use sy_domain::error::Result;
use sy_domain::trace::TraceEvent;

/// Reason code returned to callers when a quota denies a turn.
pub const RESOURCE_EXHAUSTED: &str = "RESOURCE_EXHAUSTED";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run-unit calculator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run units billed for one invocation.
///
/// `max(cpu_s, gpu_s) * tier_multiplier + tool_overhead`, never below
/// `min_run_units`, rounded to four decimals.  `tool` is `None` for
/// model-tier invocations, which carry no overhead.
pub fn run_units(cfg: &QuotaConfig, usage: &Usage, tier: &str, tool: Option<&str>) -> f64 {
    let compute = usage.cpu_s.max(usage.gpu_s).max(0.0) * cfg.tier_multiplier(tier);
    let overhead = tool.map_or(0.0, |t| cfg.tool_overhead(t));
    round4((compute + overhead).max(cfg.min_run_units))
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Usage ledger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Month-to-date usage for one organization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrgUsage {
    pub org_id: String,
    pub month: String,
    pub run_units: f64,
}

/// External usage store. The engine only reads the current total before
/// a turn and appends after one.
#[async_trait::async_trait]
pub trait UsageLedger: Send + Sync {
    async fn current_usage(&self, org_id: &str) -> Result<f64>;

    async fn record(&self, org_id: &str, run_units: f64) -> Result<()>;

    /// Usage for every org with activity this period, if the ledger can
    /// enumerate it.
    async fn snapshot(&self) -> Result<Vec<OrgUsage>> {
        Ok(Vec::new())
    }
}

struct MonthlyUsage {
    month: String,
    run_units: f64,
}

fn month_key(at: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", at.year(), at.month())
}

/// Process-local ledger keyed by org and calendar month (UTC).
///
/// Counters reset when the month rolls over.
#[derive(Default)]
pub struct InMemoryUsageLedger {
    usage: RwLock<HashMap<String, MonthlyUsage>>,
}

impl InMemoryUsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn usage_at(&self, org_id: &str, at: DateTime<Utc>) -> f64 {
        let month = month_key(at);
        self.usage
            .read()
            .get(org_id)
            .filter(|u| u.month == month)
            .map_or(0.0, |u| u.run_units)
    }

    pub fn record_at(&self, org_id: &str, run_units: f64, at: DateTime<Utc>) {
        let month = month_key(at);
        let mut usage = self.usage.write();
        let entry = usage.entry(org_id.to_owned()).or_insert(MonthlyUsage {
            month: month.clone(),
            run_units: 0.0,
        });
        if entry.month != month {
            entry.month = month;
            entry.run_units = 0.0;
        }
        entry.run_units = round4(entry.run_units + run_units);
    }

    /// Overwrite an org's month-to-date total (seeding, tests).
    pub fn set_usage(&self, org_id: &str, run_units: f64) {
        self.usage.write().insert(
            org_id.to_owned(),
            MonthlyUsage {
                month: month_key(Utc::now()),
                run_units,
            },
        );
    }

    pub fn snapshot_at(&self, at: DateTime<Utc>) -> Vec<OrgUsage> {
        let month = month_key(at);
        let mut out: Vec<OrgUsage> = self
            .usage
            .read()
            .iter()
            .filter(|(_, u)| u.month == month)
            .map(|(org, u)| OrgUsage {
                org_id: org.clone(),
                month: u.month.clone(),
                run_units: u.run_units,
            })
            .collect();
        out.sort_by(|a, b| a.org_id.cmp(&b.org_id));
        out
    }
}

#[async_trait::async_trait]
impl UsageLedger for InMemoryUsageLedger {
    async fn current_usage(&self, org_id: &str) -> Result<f64> {
        Ok(self.usage_at(org_id, Utc::now()))
    }

    async fn record(&self, org_id: &str, run_units: f64) -> Result<()> {
        self.record_at(org_id, run_units, Utc::now());
        Ok(())
    }

    async fn snapshot(&self) -> Result<Vec<OrgUsage>> {
        Ok(self.snapshot_at(Utc::now()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// QuotaGate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq)]
pub enum QuotaDecision {
    Allow,
    Deny { reason: String, used: f64, limit: f64 },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Usage and limit for one org (for admin views).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaStatus {
    pub org_id: String,
    pub plan: String,
    pub used: f64,
    /// `None` = unlimited.
    pub limit: Option<f64>,
}

pub struct QuotaGate {
    ledger: Arc<dyn UsageLedger>,
}

impl QuotaGate {
    pub fn new(ledger: Arc<dyn UsageLedger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Arc<dyn UsageLedger> {
        &self.ledger
    }

    /// Decide whether `org_id` may spend `estimated` more run units.
    pub async fn check(&self, cfg: &QuotaConfig, org_id: &str, estimated: f64) -> QuotaDecision {
        if !cfg.enabled {
            return QuotaDecision::Allow;
        }
        let Some(limit) = cfg.limit_for(org_id) else {
            return QuotaDecision::Allow;
        };
        let used = match self.ledger.current_usage(org_id).await {
            Ok(used) => used,
            Err(e) => {
                tracing::warn!(org_id, error = %e, "usage ledger unavailable, allowing turn");
                return QuotaDecision::Allow;
            }
        };

        if used >= limit || used + estimated.max(0.0) > limit {
            TraceEvent::QuotaDenied {
                org_id: org_id.to_owned(),
                used,
                limit,
            }
            .emit();
            return QuotaDecision::Deny {
                reason: RESOURCE_EXHAUSTED.to_owned(),
                used,
                limit,
            };
        }
        QuotaDecision::Allow
    }

    /// Report usage in the background. Never fails the caller.
    pub fn record_usage(&self, org_id: &str, run_units: f64) {
        if run_units <= 0.0 {
            return;
        }
        let ledger = self.ledger.clone();
        let org_id = org_id.to_owned();
        tokio::spawn(async move {
            if let Err(e) = ledger.record(&org_id, run_units).await {
                TraceEvent::LedgerWriteFailed {
                    org_id,
                    run_units,
                    error: e.to_string(),
                }
                .emit();
            }
        });
    }

    /// Orgs with usage this period plus every org named in the config.
    pub async fn snapshot(&self, cfg: &QuotaConfig) -> Vec<QuotaStatus> {
        let usage = match self.ledger.snapshot().await {
            Ok(usage) => usage,
            Err(e) => {
                tracing::warn!(error = %e, "usage ledger snapshot failed");
                Vec::new()
            }
        };
        let mut used: HashMap<String, f64> =
            usage.into_iter().map(|u| (u.org_id, u.run_units)).collect();
        for org in cfg.orgs.keys() {
            used.entry(org.clone()).or_insert(0.0);
        }

        let mut out: Vec<QuotaStatus> = used
            .into_iter()
            .map(|(org_id, used)| QuotaStatus {
                plan: cfg
                    .orgs
                    .get(&org_id)
                    .cloned()
                    .unwrap_or_else(|| cfg.default_plan.clone()),
                limit: cfg.limit_for(&org_id),
                org_id,
                used,
            })
            .collect();
        out.sort_by(|a, b| a.org_id.cmp(&b.org_id));
        out
    }
}
