//! Execution engine: drives one conversation turn through
//! CLASSIFYING -> TOOL_SELECTING -> TOOL_EXECUTING (looped) -> SYNTHESIZING
//! -> DONE, checkpointing at every transition.
//!
//! Capability failures never escape as errors: they become state-machine
//! transitions.  A turn that cannot finish leaves its thread INCOMPLETE
//! for the recovery manager, unless the thread has used up its recovery
//! attempts, in which case it is marked FAILED for good.  The only error
//! that aborts a turn is a checkpoint write that did not make it to disk.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use sy_capabilities::{CapabilityRegistry, CircuitBreakers, Router};
use sy_checkpoint::CheckpointStore;
use sy_domain::capability::{
    CapabilityError, CapabilityErrorKind, CapabilityKind, Invocation, InvocationOutput,
};
use sy_domain::config::{BusyPolicy, Config, ConfigHandle};
use sy_domain::error::{Error, Result};
use sy_domain::thread::{
    CachedResult, ExecutionStep, PlannedCall, Role, ThreadMessage, ThreadState, ThreadStatus,
};
use sy_domain::trace::TraceEvent;
use tokio::time::Instant;
use tracing::Instrument;

use crate::idempotency::idempotency_key;
use crate::quota::{run_units, QuotaDecision, QuotaGate};
use crate::retry::RetryPolicy;
use crate::thread_lock::{ThreadGuard, ThreadLockMap};

/// Failure reason when no candidate capability can take a call.
pub const NO_AVAILABLE_CAPABILITY: &str = "NoAvailableCapability";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests and outcomes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to a single turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// `None` starts a new thread with a generated id.
    pub thread_id: Option<String>,
    /// `None` = the default tenant.
    pub org_id: Option<String>,
    pub query: String,
}

impl TurnRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            thread_id: None,
            org_id: None,
            query: query.into(),
        }
    }

    pub fn thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnStatus {
    /// The thread reached DONE.
    Completed { response: String },
    /// The turn stopped early; the recovery manager will re-drive it.
    Processing { reason: String },
    /// Permanently failed; needs an operator.
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub thread_id: String,
    pub turn: u32,
    #[serde(flatten)]
    pub status: TurnStatus,
    /// Run units billed for the turn (zero unless completed).
    pub run_units: f64,
}

impl TurnOutcome {
    pub fn response(&self) -> Option<&str> {
        match &self.status {
            TurnStatus::Completed { response } => Some(response),
            _ => None,
        }
    }
}

/// Synchronous refusals. Nothing is checkpointed for a rejected turn.
#[derive(Debug, thiserror::Error)]
pub enum TurnRejected {
    #[error("validation: {0}")]
    Validation(String),

    #[error("{reason}: org {org_id} has used {used} of {limit} run units")]
    QuotaExceeded {
        org_id: String,
        reason: String,
        used: f64,
        limit: f64,
    },

    #[error("thread {thread_id} is busy")]
    Busy { thread_id: String },

    #[error("thread {thread_id} has an unfinished turn awaiting recovery")]
    PendingRecovery { thread_id: String },

    #[error("checkpoint store: {0}")]
    Checkpoint(#[from] Error),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum Transition {
    Advance(ExecutionStep),
    Complete,
    Fail(String),
}

/// Bookkeeping for one drive of the state machine. Never persisted.
#[derive(Default)]
struct DriveContext {
    /// Calls whose breaker admission was granted during selection.
    admitted: HashSet<u64>,
    /// Capabilities that turned out unusable for a call during execution.
    excluded: HashMap<u64, HashSet<String>>,
    /// Router-planned calls that a chosen tool rejected as invalid input.
    declined: HashSet<u64>,
}

struct CallJob {
    call: PlannedCall,
    capability: String,
    key: String,
    admitted: bool,
}

pub struct ExecutionEngine {
    config: Arc<ConfigHandle>,
    registry: Arc<CapabilityRegistry>,
    breakers: Arc<CircuitBreakers>,
    router: Arc<Router>,
    store: Arc<dyn CheckpointStore>,
    quota: Arc<QuotaGate>,
    locks: ThreadLockMap,
}

impl ExecutionEngine {
    pub fn new(
        config: Arc<ConfigHandle>,
        registry: Arc<CapabilityRegistry>,
        breakers: Arc<CircuitBreakers>,
        router: Arc<Router>,
        store: Arc<dyn CheckpointStore>,
        quota: Arc<QuotaGate>,
    ) -> Self {
        Self {
            config,
            registry,
            breakers,
            router,
            store,
            quota,
            locks: ThreadLockMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    pub fn locks(&self) -> &ThreadLockMap {
        &self.locks
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.snapshot()
    }

    /// Run one turn for a live request.
    ///
    /// Only validation, quota, busy, and pending-recovery refusals (plus a
    /// failed checkpoint write) come back as `Err`; every capability-level
    /// problem is reported through [`TurnOutcome::status`].
    pub async fn submit(&self, request: TurnRequest) -> std::result::Result<TurnOutcome, TurnRejected> {
        let cfg = self.config.snapshot();
        let query = validate_query(&request.query, cfg.engine.max_query_chars)?;
        let thread_id = match request.thread_id {
            Some(id) => validate_id("thread_id", &id).map(|_| id)?,
            None => uuid::Uuid::new_v4().to_string(),
        };
        if let Some(org) = &request.org_id {
            validate_id("org_id", org)?;
        }

        let guard = match cfg.engine.busy_policy {
            BusyPolicy::Wait => self.locks.acquire(&thread_id).await,
            BusyPolicy::Reject => self.locks.try_acquire(&thread_id),
        }
        .map_err(|_| TurnRejected::Busy {
            thread_id: thread_id.clone(),
        })?;

        let mut state = match self.store.load(&thread_id) {
            Ok(existing) if existing.status == ThreadStatus::Incomplete => {
                return Err(TurnRejected::PendingRecovery { thread_id });
            }
            Ok(mut existing) => {
                existing.begin_turn(&query);
                if existing.org_id.is_none() {
                    existing.org_id = request.org_id.clone();
                }
                existing
            }
            Err(Error::CheckpointNotFound(_)) => {
                ThreadState::new(thread_id.clone(), request.org_id.clone(), &query)
            }
            Err(e) => return Err(e.into()),
        };

        let org_id = state.org_or_default().to_owned();
        if let QuotaDecision::Deny {
            reason,
            used,
            limit,
        } = self
            .quota
            .check(&cfg.quota, &org_id, cfg.engine.estimated_turn_cost)
            .await
        {
            return Err(TurnRejected::QuotaExceeded {
                org_id,
                reason,
                used,
                limit,
            });
        }

        let span = tracing::info_span!("turn", thread_id = %thread_id, turn = state.turn);
        async {
            self.store
                .mark_incomplete(&mut state, ExecutionStep::Classifying)?;
            self.drive(&cfg, &guard, &mut state, false).await
        }
        .instrument(span)
        .await
        .map_err(TurnRejected::from)
    }

    /// Re-drive an INCOMPLETE thread from its checkpointed step.
    ///
    /// The caller holds the thread's lock; the state is re-read from the
    /// store under it.  Returns `Ok(None)` if the thread settled since it
    /// was scanned.
    pub async fn resume(&self, guard: &ThreadGuard) -> Result<Option<TurnOutcome>> {
        let cfg = self.config.snapshot();
        let mut state = self.store.load(guard.thread_id())?;
        if state.status != ThreadStatus::Incomplete {
            return Ok(None);
        }
        state.recovery_attempts += 1;
        let step = state.current_step;

        let span = tracing::info_span!("turn", thread_id = %state.thread_id, turn = state.turn);
        async {
            self.store.mark_incomplete(&mut state, step)?;
            self.drive(&cfg, guard, &mut state, true).await.map(Some)
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        cfg: &Config,
        _guard: &ThreadGuard,
        state: &mut ThreadState,
        resumed: bool,
    ) -> Result<TurnOutcome> {
        TraceEvent::TurnStarted {
            thread_id: state.thread_id.clone(),
            org_id: state.org_or_default().to_owned(),
            turn: state.turn,
            resumed,
        }
        .emit();

        let mut ctx = DriveContext::default();
        loop {
            tracing::debug!(step = %state.current_step, "executing step");
            let transition = match state.current_step {
                ExecutionStep::Classifying => self.classify(state).await,
                ExecutionStep::ToolSelecting => self.select_tools(state, &mut ctx),
                ExecutionStep::ToolExecuting => self.execute_tools(cfg, state, &mut ctx).await?,
                ExecutionStep::Synthesizing => self.synthesize(cfg, state).await,
                ExecutionStep::Done => Transition::Complete,
                ExecutionStep::Failed => Transition::Fail(
                    state
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| "turn previously failed".into()),
                ),
            };
            match transition {
                Transition::Advance(next) => self.store.mark_incomplete(state, next)?,
                Transition::Complete => return self.complete(cfg, state),
                Transition::Fail(reason) => return self.fail_turn(cfg, state, reason),
            }
        }
    }

    // ── CLASSIFYING ──────────────────────────────────────────────────

    async fn classify(&self, state: &mut ThreadState) -> Transition {
        let query = state.partial.query.clone();
        let rec = self.router.route_for(Some(state.thread_id.as_str()), &query).await;
        TraceEvent::RouteDecided {
            thread_id: state.thread_id.clone(),
            capability: rec.primary_capability.clone(),
            confidence: rec.confidence,
            fallback: rec.fallback,
            latency_ms: rec.latency_ms,
        }
        .emit();

        let requires_tools = rec.requires_tools;
        state.router_recommendation = Some(rec);
        state.partial.batch.clear();
        state.partial.queued.clear();
        if requires_tools {
            let call = state.plan_call(None, json!({ "query": query }));
            state.partial.batch.push(call);
            Transition::Advance(ExecutionStep::ToolSelecting)
        } else {
            Transition::Advance(ExecutionStep::Synthesizing)
        }
    }

    // ── TOOL_SELECTING ───────────────────────────────────────────────

    fn select_tools(&self, state: &mut ThreadState, ctx: &mut DriveContext) -> Transition {
        let ranked: Vec<String> = state
            .router_recommendation
            .as_ref()
            .map(|rec| {
                rec.candidates
                    .iter()
                    .map(|c| c.capability.clone())
                    .filter(|name| self.registry.kind_of(name) == Some(CapabilityKind::Tool))
                    .collect()
            })
            .unwrap_or_default();

        let ThreadState { partial, .. } = state;

        // Resolve every pending call before touching any breaker, so a call
        // with nothing usable cannot strand another call's HALF_OPEN trial.
        let mut pending: Vec<(u64, Vec<String>)> = Vec::new();
        let mut dropped = Vec::new();
        for call in &partial.batch {
            if call.selected.is_some() || partial.results.iter().any(|r| r.call_index == call.index) {
                continue;
            }
            let candidates = match &call.requested {
                Some(name) => std::slice::from_ref(name),
                None => ranked.as_slice(),
            };
            let excluded = ctx.excluded.get(&call.index);
            let usable: Vec<String> = candidates
                .iter()
                .filter(|name| !excluded.is_some_and(|ex| ex.contains(*name)))
                .filter(|name| match self.registry.resolve(name) {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::debug!(capability = %name, error = %e, "skipping candidate");
                        false
                    }
                })
                .cloned()
                .collect();
            if !usable.is_empty() {
                pending.push((call.index, usable));
            } else if ctx.declined.contains(&call.index) {
                tracing::info!(call = call.index, "every routed tool declined the query, answering without tools");
                dropped.push(call.index);
            } else {
                return no_capability_for(call.index);
            }
        }
        partial.batch.retain(|c| !dropped.contains(&c.index));

        let mut chosen: Vec<(u64, String)> = Vec::with_capacity(pending.len());
        for (index, usable) in pending {
            let admitted = usable.into_iter().find(|name| {
                let ok = self.breakers.allow(name);
                if !ok {
                    tracing::debug!(capability = %name, "skipping candidate, circuit open");
                }
                ok
            });
            match admitted {
                Some(name) => chosen.push((index, name)),
                None => {
                    for (_, name) in &chosen {
                        self.breakers.release(name);
                    }
                    return no_capability_for(index);
                }
            }
        }

        for (index, name) in chosen {
            if let Some(call) = partial.batch.iter_mut().find(|c| c.index == index) {
                tracing::debug!(call = index, capability = %name, "tool selected");
                ctx.admitted.insert(index);
                call.selected = Some(name);
            }
        }
        Transition::Advance(ExecutionStep::ToolExecuting)
    }

    // ── TOOL_EXECUTING ───────────────────────────────────────────────

    async fn execute_tools(
        &self,
        cfg: &Config,
        state: &mut ThreadState,
        ctx: &mut DriveContext,
    ) -> Result<Transition> {
        let mut jobs = Vec::new();
        for call in &state.partial.batch {
            if state.partial.results.iter().any(|r| r.call_index == call.index) {
                continue;
            }
            let Some(capability) = call.selected.clone() else {
                // Selection did not finish before the checkpoint; redo it.
                return Ok(Transition::Advance(ExecutionStep::ToolSelecting));
            };
            let key = idempotency_key(&state.thread_id, call.index, &capability, &call.input);
            if state.partial.cached(&key).is_some() {
                continue;
            }
            jobs.push(CallJob {
                admitted: ctx.admitted.remove(&call.index),
                call: call.clone(),
                capability,
                key,
            });
        }

        let policy = RetryPolicy::from(&cfg.retry);
        let timeout = Duration::from_millis(cfg.engine.invocation_timeout_ms);
        let thread_id = state.thread_id.clone();
        let mut reselect = Vec::new();

        let mut finished = futures_util::stream::iter(jobs)
            .map(|job| {
                let thread_id = thread_id.as_str();
                let policy = &policy;
                async move {
                    let result = self
                        .invoke_with_retry(
                            thread_id,
                            &job.capability,
                            &job.call.input,
                            &job.key,
                            job.admitted,
                            policy,
                            timeout,
                        )
                        .await;
                    (job, result)
                }
            })
            .buffered(cfg.engine.max_parallel_tools.max(1));

        while let Some((job, result)) = finished.next().await {
            match result {
                Ok(out) => {
                    let cached = CachedResult {
                        idempotency_key: job.key,
                        call_index: job.call.index,
                        capability: job.capability,
                        output: out.output,
                        usage: out.usage,
                        completed_at: chrono::Utc::now(),
                    };
                    self.queue_follow_ups(cfg, state, &cached.output);
                    state.accumulated_messages.push(ThreadMessage::tool(&cached));
                    state.partial.insert_result(cached);
                    self.store
                        .mark_incomplete(state, ExecutionStep::ToolExecuting)?;
                }
                Err(e) if is_unusable(&e) => {
                    tracing::info!(call = job.call.index, capability = %job.capability, error = %e, "falling back to next candidate");
                    ctx.excluded
                        .entry(job.call.index)
                        .or_default()
                        .insert(job.capability);
                    reselect.push(job.call.index);
                }
                Err(e) if e.kind == CapabilityErrorKind::InvalidInput && job.call.requested.is_none() => {
                    tracing::info!(call = job.call.index, capability = %job.capability, error = %e, "routed tool declined the query");
                    ctx.excluded
                        .entry(job.call.index)
                        .or_default()
                        .insert(job.capability);
                    ctx.declined.insert(job.call.index);
                    reselect.push(job.call.index);
                }
                Err(e) => {
                    return Ok(Transition::Fail(format!("{}: {e}", job.capability)));
                }
            }
        }
        drop(finished);

        if !reselect.is_empty() {
            for call in state.partial.batch.iter_mut() {
                if reselect.contains(&call.index) {
                    call.selected = None;
                }
            }
            return Ok(Transition::Advance(ExecutionStep::ToolSelecting));
        }

        state.partial.batch = std::mem::take(&mut state.partial.queued);
        if state.partial.batch.is_empty() {
            Ok(Transition::Advance(ExecutionStep::Synthesizing))
        } else {
            Ok(Transition::Advance(ExecutionStep::ToolSelecting))
        }
    }

    /// Queue `tool_calls` requested by a tool's output, within the
    /// per-turn call budget.
    fn queue_follow_ups(&self, cfg: &Config, state: &mut ThreadState, output: &Value) {
        let Some(requested) = output.get("tool_calls").and_then(Value::as_array) else {
            return;
        };
        for req in requested {
            let Some(capability) = req.get("capability").and_then(Value::as_str) else {
                tracing::warn!(request = %req, "ignoring tool call without a capability");
                continue;
            };
            let planned = state.partial.results.len()
                + 1
                + state.partial.batch.len()
                + state.partial.queued.len();
            if planned > cfg.engine.max_tool_calls_per_turn {
                tracing::warn!(
                    limit = cfg.engine.max_tool_calls_per_turn,
                    capability,
                    "tool call budget exhausted, dropping follow-up"
                );
                break;
            }
            let input = req.get("input").cloned().unwrap_or(Value::Null);
            let call = state.plan_call(Some(capability.to_owned()), input);
            state.partial.queued.push(call);
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn invoke_with_retry(
        &self,
        thread_id: &str,
        capability: &str,
        input: &Value,
        key: &str,
        admitted: bool,
        policy: &RetryPolicy,
        timeout: Duration,
    ) -> std::result::Result<InvocationOutput, CapabilityError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let first_admitted = attempt == 1 && admitted;
            if !first_admitted && !self.breakers.allow(capability) {
                return Err(CapabilityError::new(
                    CapabilityErrorKind::CircuitOpen,
                    format!("circuit open for {capability}"),
                ));
            }
            let handler = self.registry.get(capability).map_err(CapabilityError::from)?;

            let started = Instant::now();
            let invocation = Invocation::new(input.clone()).with_key(key);
            let result = match tokio::time::timeout(timeout, handler.invoke(invocation)).await {
                Ok(Ok(out)) if out.is_empty() => Err(CapabilityError::new(
                    CapabilityErrorKind::EmptyOutput,
                    "capability returned an empty result",
                )),
                Ok(result) => result,
                Err(_) => Err(CapabilityError::timeout(format!(
                    "no response within {}ms",
                    timeout.as_millis()
                ))),
            };
            TraceEvent::CapabilityInvoked {
                thread_id: thread_id.to_owned(),
                capability: capability.to_owned(),
                attempt,
                duration_ms: started.elapsed().as_millis() as u64,
                ok: result.is_ok(),
                cached: false,
            }
            .emit();

            let err = match result {
                Ok(out) => {
                    self.breakers.record_success(capability);
                    return Ok(out);
                }
                Err(e) => e,
            };
            if err.counts_against_breaker() {
                self.breakers.record_failure(capability);
            }
            if !err.is_retryable() || !policy.should_retry(attempt) {
                tracing::warn!(capability, attempt, error = %err, "capability invocation failed");
                return Err(err);
            }

            let delay = policy.delay_after(attempt, key);
            TraceEvent::CapabilityRetry {
                thread_id: thread_id.to_owned(),
                capability: capability.to_owned(),
                attempt,
                delay_ms: delay.as_millis() as u64,
                error: err.to_string(),
            }
            .emit();
            tokio::time::sleep(delay).await;
        }
    }

    // ── SYNTHESIZING ─────────────────────────────────────────────────

    fn synthesis_candidates(&self, cfg: &Config, state: &ThreadState) -> Vec<String> {
        let mut names = Vec::new();
        if let Some(rec) = &state.router_recommendation {
            if !rec.requires_tools
                && self.registry.kind_of(&rec.primary_capability) == Some(CapabilityKind::ModelTier)
            {
                names.push(rec.primary_capability.clone());
            }
        }
        names.push(cfg.engine.synthesis_capability.clone());
        if let Some(fallback) = &cfg.engine.synthesis_fallback {
            names.push(fallback.clone());
        }
        let mut seen = HashSet::new();
        names.retain(|n| seen.insert(n.clone()));
        names
    }

    fn synthesis_input(state: &ThreadState) -> Value {
        let history_end = state
            .accumulated_messages
            .iter()
            .rposition(|m| m.role == Role::User)
            .unwrap_or(state.accumulated_messages.len());
        let history: Vec<Value> = state.accumulated_messages[..history_end]
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();
        let tool_results: Vec<Value> = state
            .partial
            .results
            .iter()
            .map(|r| json!({ "capability": r.capability, "output": r.output }))
            .collect();
        json!({
            "query": state.partial.query,
            "messages": history,
            "tool_results": tool_results,
        })
    }

    async fn synthesize(&self, cfg: &Config, state: &mut ThreadState) -> Transition {
        let input = Self::synthesis_input(state);
        let policy = RetryPolicy::from(&cfg.retry);
        let timeout = Duration::from_millis(cfg.engine.invocation_timeout_ms);

        for name in self.synthesis_candidates(cfg, state) {
            if self.registry.resolve(&name).is_err() {
                continue;
            }
            let key = idempotency_key(&state.thread_id, state.next_call_index, &name, &input);
            let result = self
                .invoke_with_retry(&state.thread_id, &name, &input, &key, false, &policy, timeout)
                .await;
            match result {
                Ok(out) => {
                    let response = out
                        .text()
                        .map(str::to_owned)
                        .unwrap_or_else(|| out.output.to_string());
                    let tier = self.registry.tier_of(&name).unwrap_or_default();
                    state.partial.model_run_units += run_units(&cfg.quota, &out.usage, &tier, None);
                    state
                        .accumulated_messages
                        .push(ThreadMessage::assistant(response.clone(), &name));
                    state.final_response = Some(response);
                    return Transition::Complete;
                }
                Err(e) if is_unusable(&e) => {
                    tracing::info!(capability = %name, error = %e, "synthesis candidate unavailable");
                }
                Err(e) => return Transition::Fail(format!("{name}: {e}")),
            }
        }
        Transition::Fail(format!(
            "{NO_AVAILABLE_CAPABILITY}: no synthesis capability available"
        ))
    }

    // ── Terminal transitions ─────────────────────────────────────────

    fn turn_run_units(&self, cfg: &Config, state: &ThreadState) -> f64 {
        let tools: f64 = state
            .partial
            .results
            .iter()
            .map(|r| {
                let tier = self.registry.tier_of(&r.capability).unwrap_or_default();
                run_units(&cfg.quota, &r.usage, &tier, Some(&r.capability))
            })
            .sum();
        ((tools + state.partial.model_run_units) * 10_000.0).round() / 10_000.0
    }

    fn complete(&self, cfg: &Config, state: &mut ThreadState) -> Result<TurnOutcome> {
        self.store.mark_complete(state)?;
        let units = self.turn_run_units(cfg, state);
        self.quota.record_usage(state.org_or_default(), units);
        TraceEvent::ThreadCompleted {
            thread_id: state.thread_id.clone(),
            turn: state.turn,
            run_units: units,
        }
        .emit();

        Ok(TurnOutcome {
            thread_id: state.thread_id.clone(),
            turn: state.turn,
            status: TurnStatus::Completed {
                response: state.final_response.clone().unwrap_or_default(),
            },
            run_units: units,
        })
    }

    fn fail_turn(&self, cfg: &Config, state: &mut ThreadState, reason: String) -> Result<TurnOutcome> {
        let permanent =
            !cfg.recovery.enabled || state.recovery_attempts >= cfg.recovery.max_attempts;
        tracing::warn!(
            thread_id = %state.thread_id,
            step = %state.current_step,
            attempts = state.recovery_attempts,
            permanent,
            reason = %reason,
            "turn failed"
        );
        state.failure_reason = Some(reason.clone());

        let status = if permanent {
            self.store.mark_failed(&state.thread_id, &reason)?;
            state.status = ThreadStatus::Failed;
            state.current_step = ExecutionStep::Failed;
            TurnStatus::Failed {
                reason: reason.clone(),
            }
        } else {
            let step = match state.current_step {
                ExecutionStep::Done | ExecutionStep::Failed => ExecutionStep::Classifying,
                step => step,
            };
            self.store.mark_incomplete(state, step)?;
            TurnStatus::Processing {
                reason: reason.clone(),
            }
        };

        TraceEvent::ThreadFailed {
            thread_id: state.thread_id.clone(),
            turn: state.turn,
            reason,
            permanent,
        }
        .emit();
        Ok(TurnOutcome {
            thread_id: state.thread_id.clone(),
            turn: state.turn,
            status,
            run_units: 0.0,
        })
    }
}

fn no_capability_for(call_index: u64) -> Transition {
    Transition::Fail(format!(
        "{NO_AVAILABLE_CAPABILITY}: no usable capability for call {call_index}"
    ))
}

/// Errors that rule out one capability without failing the call.
fn is_unusable(e: &CapabilityError) -> bool {
    matches!(
        e.kind,
        CapabilityErrorKind::CircuitOpen | CapabilityErrorKind::NotFound | CapabilityErrorKind::Disabled
    )
}

fn validate_query(query: &str, max_chars: usize) -> std::result::Result<String, TurnRejected> {
    let query = query.trim();
    if query.is_empty() {
        return Err(TurnRejected::Validation("query must not be empty".into()));
    }
    if query.chars().count() > max_chars {
        return Err(TurnRejected::Validation(format!(
            "query exceeds {max_chars} characters"
        )));
    }
    Ok(query.to_owned())
}

fn validate_id(field: &str, id: &str) -> std::result::Result<(), TurnRejected> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '@'));
    if valid {
        Ok(())
    } else {
        Err(TurnRejected::Validation(format!(
            "{field} must be 1-128 characters of [A-Za-z0-9-_.:@]"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_oversized_queries_rejected() {
        assert!(matches!(validate_query("   ", 10), Err(TurnRejected::Validation(_))));
        assert!(matches!(validate_query("x".repeat(11).as_str(), 10), Err(TurnRejected::Validation(_))));
        assert_eq!(validate_query("  hi  ", 10).unwrap(), "hi");
    }

    #[test]
    fn id_validation() {
        assert!(validate_id("org_id", "acme-corp_1").is_ok());
        assert!(validate_id("org_id", "").is_err());
        assert!(validate_id("org_id", "has space").is_err());
        assert!(validate_id("org_id", &"a".repeat(129)).is_err());
    }

    #[test]
    fn outcome_serializes_flat() {
        let outcome = TurnOutcome {
            thread_id: "t1".into(),
            turn: 1,
            status: TurnStatus::Completed {
                response: "425".into(),
            },
            run_units: 0.1,
        };
        let v = serde_json::to_value(&outcome).unwrap();
        assert_eq!(v["status"], "completed");
        assert_eq!(v["response"], "425");
        assert_eq!(outcome.response(), Some("425"));
    }

    #[test]
    fn unusable_kinds() {
        assert!(is_unusable(&CapabilityError::new(CapabilityErrorKind::CircuitOpen, "")));
        assert!(is_unusable(&CapabilityError::new(CapabilityErrorKind::Disabled, "")));
        assert!(!is_unusable(&CapabilityError::timeout("")));
    }
}
