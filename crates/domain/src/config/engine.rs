use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What to do when a turn arrives for a thread that is already executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Queue behind the in-flight turn.
    #[default]
    Wait,
    /// Reject immediately with a busy signal.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on tool invocations in a single turn.
    #[serde(default = "d_max_tool_calls")]
    pub max_tool_calls_per_turn: usize,
    /// Tool calls of one batch run with at most this much parallelism.
    /// `1` executes sequentially.
    #[serde(default = "d_max_parallel_tools")]
    pub max_parallel_tools: usize,
    /// Deadline applied to every capability invocation.
    #[serde(default = "d_invocation_timeout_ms")]
    pub invocation_timeout_ms: u64,
    /// Model tier used to write the final answer after tool calls.
    #[serde(default = "d_synthesis_capability")]
    pub synthesis_capability: String,
    /// Tried when `synthesis_capability` is unavailable.
    #[serde(default = "d_synthesis_fallback")]
    pub synthesis_fallback: Option<String>,
    #[serde(default)]
    pub busy_policy: BusyPolicy,
    /// Run units assumed by the pre-execution quota check.
    #[serde(default = "d_estimated_turn_cost")]
    pub estimated_turn_cost: f64,
    /// Longest accepted query, in characters.
    #[serde(default = "d_max_query_chars")]
    pub max_query_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tool_calls_per_turn: d_max_tool_calls(),
            max_parallel_tools: d_max_parallel_tools(),
            invocation_timeout_ms: d_invocation_timeout_ms(),
            synthesis_capability: d_synthesis_capability(),
            synthesis_fallback: d_synthesis_fallback(),
            busy_policy: BusyPolicy::default(),
            estimated_turn_cost: d_estimated_turn_cost(),
            max_query_chars: d_max_query_chars(),
        }
    }
}

fn d_max_tool_calls() -> usize {
    25
}
fn d_max_parallel_tools() -> usize {
    1
}
fn d_invocation_timeout_ms() -> u64 {
    30_000
}
fn d_synthesis_capability() -> String {
    "llm_service".into()
}
fn d_synthesis_fallback() -> Option<String> {
    Some("template_synthesizer".into())
}
fn d_estimated_turn_cost() -> f64 {
    1.0
}
fn d_max_query_chars() -> usize {
    32_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retry / backoff
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per invocation, including the first.
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "d_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "d_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "d_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: d_max_attempts(),
            base_delay_ms: d_base_delay_ms(),
            max_delay_ms: d_max_delay_ms(),
            jitter: true,
        }
    }
}

fn d_max_attempts() -> u32 {
    3
}
fn d_base_delay_ms() -> u64 {
    1_000
}
fn d_max_delay_ms() -> u64 {
    30_000
}
fn d_true() -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Circuit breaker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that trip CLOSED -> OPEN.
    #[serde(default = "d_failure_threshold")]
    pub failure_threshold: u32,
    /// First cooldown; doubles with every consecutive re-open.
    #[serde(default = "d_base_cooldown_ms")]
    pub base_cooldown_ms: u64,
    #[serde(default = "d_max_cooldown_ms")]
    pub max_cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: d_failure_threshold(),
            base_cooldown_ms: d_base_cooldown_ms(),
            max_cooldown_ms: d_max_cooldown_ms(),
        }
    }
}

fn d_failure_threshold() -> u32 {
    3
}
fn d_base_cooldown_ms() -> u64 {
    1_000
}
fn d_max_cooldown_ms() -> u64 {
    30_000
}
