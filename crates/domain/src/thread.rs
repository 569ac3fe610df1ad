//! Persisted thread model: the checkpointed position of a conversation in
//! the execution state machine plus everything accumulated so far.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capability::Usage;

/// Tenant used when a request carries no `org_id`.
pub const DEFAULT_ORG: &str = "default";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status / step enums
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreadStatus {
    Incomplete,
    Complete,
    Failed,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incomplete => "INCOMPLETE",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position in the per-turn state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStep {
    Classifying,
    ToolSelecting,
    ToolExecuting,
    Synthesizing,
    Done,
    Failed,
}

impl ExecutionStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classifying => "classifying",
            Self::ToolSelecting => "tool_selecting",
            Self::ToolExecuting => "tool_executing",
            Self::Synthesizing => "synthesizing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for ExecutionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One entry of the append-only conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ThreadMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            capability: None,
            idempotency_key: None,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>, capability: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            capability: Some(capability.to_owned()),
            idempotency_key: None,
            timestamp: Utc::now(),
        }
    }

    pub fn tool(result: &CachedResult) -> Self {
        Self {
            role: Role::Tool,
            content: result.output.to_string(),
            capability: Some(result.capability.clone()),
            idempotency_key: Some(result.idempotency_key.clone()),
            timestamp: result.completed_at,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Routing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteCandidate {
    pub capability: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Output of the router for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub primary_capability: String,
    pub confidence: f64,
    pub reasoning: String,
    pub requires_tools: bool,
    /// Ranked by confidence, highest first. `candidates[0]` is the primary.
    pub candidates: Vec<RouteCandidate>,
    pub latency_ms: u64,
    /// `true` when the heuristic table produced this result.
    #[serde(default)]
    pub fallback: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool plan and replay cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool call scheduled for the current turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedCall {
    /// Thread-wide call ordinal; doubles as the idempotency step index.
    pub index: u64,
    /// Explicitly requested capability. `None` means "use the router's
    /// ranked candidates".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested: Option<String>,
    pub input: Value,
    /// Capability chosen during tool selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<String>,
}

/// Result of a completed tool invocation, keyed by idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    pub idempotency_key: String,
    pub call_index: u64,
    pub capability: String,
    pub output: Value,
    #[serde(default)]
    pub usage: Usage,
    pub completed_at: DateTime<Utc>,
}

/// Per-turn scratch state that survives a crash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialState {
    #[serde(default)]
    pub query: String,
    /// Calls being selected/executed right now.
    #[serde(default)]
    pub batch: Vec<PlannedCall>,
    /// Follow-up calls requested by tool outputs, forming the next batch.
    #[serde(default)]
    pub queued: Vec<PlannedCall>,
    /// Completed tool results in call-index order.
    #[serde(default)]
    pub results: Vec<CachedResult>,
    /// Run units consumed by model-tier invocations this turn.
    #[serde(default)]
    pub model_run_units: f64,
}

impl PartialState {
    pub fn for_query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn cached(&self, idempotency_key: &str) -> Option<&CachedResult> {
        self.results
            .iter()
            .find(|r| r.idempotency_key == idempotency_key)
    }

    /// Insert keeping call-index order regardless of completion order.
    pub fn insert_result(&mut self, result: CachedResult) {
        if self.cached(&result.idempotency_key).is_some() {
            return;
        }
        let pos = self
            .results
            .partition_point(|r| r.call_index <= result.call_index);
        self.results.insert(pos, result);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ThreadState
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The full checkpointed state of a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadState {
    pub thread_id: String,
    #[serde(default)]
    pub org_id: Option<String>,
    pub status: ThreadStatus,
    pub current_step: ExecutionStep,
    /// 1-based turn counter.
    pub turn: u32,
    #[serde(default)]
    pub accumulated_messages: Vec<ThreadMessage>,
    #[serde(default)]
    pub router_recommendation: Option<Recommendation>,
    #[serde(default)]
    pub partial: PartialState,
    #[serde(default)]
    pub next_call_index: u64,
    #[serde(default)]
    pub recovery_attempts: u32,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub final_response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl ThreadState {
    /// Fresh thread positioned at the start of its first turn.
    pub fn new(thread_id: impl Into<String>, org_id: Option<String>, query: &str) -> Self {
        let now = Utc::now();
        Self {
            thread_id: thread_id.into(),
            org_id,
            status: ThreadStatus::Incomplete,
            current_step: ExecutionStep::Classifying,
            turn: 1,
            accumulated_messages: vec![ThreadMessage::user(query)],
            router_recommendation: None,
            partial: PartialState::for_query(query),
            next_call_index: 0,
            recovery_attempts: 0,
            failure_reason: None,
            final_response: None,
            created_at: now,
            last_updated: now,
        }
    }

    /// Start another turn on an existing (settled) thread.
    pub fn begin_turn(&mut self, query: &str) {
        self.turn += 1;
        self.status = ThreadStatus::Incomplete;
        self.current_step = ExecutionStep::Classifying;
        self.accumulated_messages.push(ThreadMessage::user(query));
        self.router_recommendation = None;
        self.partial = PartialState::for_query(query);
        self.recovery_attempts = 0;
        self.failure_reason = None;
        self.final_response = None;
    }

    pub fn org_or_default(&self) -> &str {
        self.org_id.as_deref().unwrap_or(DEFAULT_ORG)
    }

    /// Assign the next thread-wide call index.
    pub fn plan_call(&mut self, requested: Option<String>, input: Value) -> PlannedCall {
        let call = PlannedCall {
            index: self.next_call_index,
            requested,
            input,
            selected: None,
        };
        self.next_call_index += 1;
        call
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(index: u64, key: &str) -> CachedResult {
        CachedResult {
            idempotency_key: key.into(),
            call_index: index,
            capability: "math_solver".into(),
            output: json!({"result": index}),
            usage: Usage::default(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn results_kept_in_call_order() {
        let mut partial = PartialState::default();
        partial.insert_result(result(2, "c"));
        partial.insert_result(result(0, "a"));
        partial.insert_result(result(1, "b"));
        let order: Vec<u64> = partial.results.iter().map(|r| r.call_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn duplicate_key_not_inserted_twice() {
        let mut partial = PartialState::default();
        partial.insert_result(result(0, "a"));
        partial.insert_result(result(0, "a"));
        assert_eq!(partial.results.len(), 1);
    }

    #[test]
    fn begin_turn_resets_turn_scoped_fields() {
        let mut state = ThreadState::new("t1", None, "hello");
        state.status = ThreadStatus::Complete;
        state.current_step = ExecutionStep::Done;
        state.recovery_attempts = 2;
        state.final_response = Some("hi".into());
        let _ = state.plan_call(None, json!({}));

        state.begin_turn("again");
        assert_eq!(state.turn, 2);
        assert_eq!(state.status, ThreadStatus::Incomplete);
        assert_eq!(state.current_step, ExecutionStep::Classifying);
        assert_eq!(state.recovery_attempts, 0);
        assert_eq!(state.accumulated_messages.len(), 2);
        assert_eq!(state.partial.query, "again");
        // Call indices are thread-wide.
        assert_eq!(state.next_call_index, 1);
    }

    #[test]
    fn status_serializes_uppercase() {
        let s = serde_json::to_string(&ThreadStatus::Incomplete).unwrap();
        assert_eq!(s, "\"INCOMPLETE\"");
        let step = serde_json::to_string(&ExecutionStep::ToolExecuting).unwrap();
        assert_eq!(step, "\"tool_executing\"");
    }
}
