//! Process-level façade: wires the registry, breakers, router, checkpoint
//! store, quota gate, engine and recovery manager together, and exposes
//! the read-only snapshot queries used by admin tooling.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sy_capabilities::{
    BreakerSnapshot, CapabilityInfo, CapabilityRegistry, CircuitBreakers, RouteDecision, Router,
};
use sy_checkpoint::{CheckpointStats, CheckpointStore};
use sy_domain::config::{Config, ConfigError, ConfigHandle};
use sy_domain::error::{Error, Result};
use sy_domain::thread::{ExecutionStep, Recommendation, ThreadStatus};
use sy_domain::trace::TraceEvent;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::engine::{ExecutionEngine, TurnOutcome, TurnRejected, TurnRequest};
use crate::quota::{QuotaGate, QuotaStatus, UsageLedger};
use crate::recovery::{spawn_recovery_loop, RecoveryManager, RecoveryReport};

/// Admin view of one thread.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadStatusView {
    pub thread_id: String,
    pub org_id: Option<String>,
    pub status: ThreadStatus,
    pub current_step: ExecutionStep,
    pub turn: u32,
    pub recovery_attempts: u32,
    pub message_count: usize,
    pub router_recommendation: Option<Recommendation>,
    pub failure_reason: Option<String>,
    pub final_response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// An execution currently holds the thread.
    pub busy: bool,
}

/// Registration plus breaker state for one capability.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityHealth {
    #[serde(flatten)]
    pub info: CapabilityInfo,
    pub breaker: BreakerSnapshot,
}

pub struct Orchestrator {
    config: Arc<ConfigHandle>,
    registry: Arc<CapabilityRegistry>,
    breakers: Arc<CircuitBreakers>,
    router: Arc<Router>,
    quota: Arc<QuotaGate>,
    engine: Arc<ExecutionEngine>,
    recovery: Arc<RecoveryManager>,
    shutdown: Arc<Notify>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<ConfigHandle>,
        registry: Arc<CapabilityRegistry>,
        store: Arc<dyn CheckpointStore>,
        ledger: Arc<dyn UsageLedger>,
    ) -> Self {
        let cfg = config.snapshot();
        let breakers = Arc::new(CircuitBreakers::new(cfg.breaker.clone()));
        let router = Arc::new(Router::new(
            cfg.router.clone(),
            registry.clone(),
            breakers.clone(),
        ));
        let quota = Arc::new(QuotaGate::new(ledger));
        let engine = Arc::new(ExecutionEngine::new(
            config.clone(),
            registry.clone(),
            breakers.clone(),
            router.clone(),
            store,
            quota.clone(),
        ));
        let recovery = Arc::new(RecoveryManager::new(engine.clone()));
        Self {
            config,
            registry,
            breakers,
            router,
            quota,
            engine,
            recovery,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        &self.breakers
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.snapshot()
    }

    // ── Execution ────────────────────────────────────────────────────

    pub async fn submit(&self, request: TurnRequest) -> std::result::Result<TurnOutcome, TurnRejected> {
        self.engine.submit(request).await
    }

    /// One recovery pass, right now.
    pub async fn recover_now(&self) -> RecoveryReport {
        self.recovery.scan_and_recover().await
    }

    pub fn spawn_recovery_loop(&self) -> JoinHandle<()> {
        spawn_recovery_loop(self.recovery.clone(), self.shutdown.clone())
    }

    /// Stop background loops started by this orchestrator.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    // ── Configuration ────────────────────────────────────────────────

    /// Re-read the config file and push the new settings to every
    /// component.  In-flight turns keep the snapshot they started with.
    pub fn reload_config(&self) -> Result<Vec<ConfigError>> {
        let previous = self.config.snapshot();
        let warnings = self.config.reload()?;
        self.apply(&previous);
        Ok(warnings)
    }

    /// Install `config` directly (no backing file needed).
    pub fn replace_config(&self, config: Config) -> Result<Vec<ConfigError>> {
        let previous = self.config.snapshot();
        let warnings = self.config.replace(config)?;
        self.apply(&previous);
        Ok(warnings)
    }

    fn apply(&self, previous: &Config) {
        let cfg = self.config.snapshot();
        self.router.reload(cfg.router.clone());
        self.breakers.set_config(cfg.breaker.clone());

        for name in &previous.capabilities.disabled {
            if !cfg.capabilities.disabled.contains(name) {
                if let Err(e) = self.registry.enable(name) {
                    tracing::warn!(capability = %name, error = %e, "cannot enable capability");
                }
            }
        }
        for name in &cfg.capabilities.disabled {
            if let Err(e) = self.registry.disable(name) {
                tracing::warn!(capability = %name, error = %e, "cannot disable capability");
            }
        }

        let path = self
            .config
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        TraceEvent::ConfigReloaded {
            path,
            warnings: cfg.validate().len(),
        }
        .emit();
    }

    // ── Admin snapshots ──────────────────────────────────────────────

    /// `Ok(None)` if the thread is unknown; `Err` if its checkpoint is
    /// corrupt.
    pub fn thread_status(&self, thread_id: &str) -> Result<Option<ThreadStatusView>> {
        let state = match self.engine.store().load(thread_id) {
            Ok(state) => state,
            Err(Error::CheckpointNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(ThreadStatusView {
            busy: self.engine.locks().is_busy(thread_id),
            message_count: state.accumulated_messages.len(),
            thread_id: state.thread_id,
            org_id: state.org_id,
            status: state.status,
            current_step: state.current_step,
            turn: state.turn,
            recovery_attempts: state.recovery_attempts,
            router_recommendation: state.router_recommendation,
            failure_reason: state.failure_reason,
            final_response: state.final_response,
            created_at: state.created_at,
            last_updated: state.last_updated,
        }))
    }

    pub fn capability_health(&self, name: &str) -> Option<CapabilityHealth> {
        let info = self.registry.info(name)?;
        Some(CapabilityHealth {
            breaker: self.breakers.snapshot(name),
            info,
        })
    }

    /// Health of every registered capability, by name.
    pub fn capability_health_all(&self) -> Vec<CapabilityHealth> {
        self.registry
            .list(None)
            .iter()
            .filter_map(|name| self.capability_health(name))
            .collect()
    }

    /// Newest first.
    pub fn recent_router_recommendations(&self, limit: usize) -> Vec<RouteDecision> {
        self.router.recent(limit)
    }

    pub async fn quota_snapshot(&self) -> Vec<QuotaStatus> {
        let cfg = self.config.snapshot();
        self.quota.snapshot(&cfg.quota).await
    }

    pub fn checkpoint_stats(&self) -> CheckpointStats {
        self.engine.store().stats()
    }
}
