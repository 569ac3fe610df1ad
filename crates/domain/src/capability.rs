use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a registered capability is: a model backend or a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    ModelTier,
    Tool,
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModelTier => "model_tier",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute consumed by a single invocation, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub cpu_s: f64,
    #[serde(default)]
    pub gpu_s: f64,
}

impl Usage {
    pub fn new(cpu_s: f64, gpu_s: f64) -> Self {
        Self { cpu_s, gpu_s }
    }
}

/// Input handed to a capability.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub input: Value,
    /// Stable key for this exact call; backends that perform side effects
    /// can use it to deduplicate.
    pub idempotency_key: Option<String>,
}

impl Invocation {
    pub fn new(input: Value) -> Self {
        Self {
            input,
            idempotency_key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Convenience accessor for string fields of an object input.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.input.get(field).and_then(Value::as_str)
    }
}

/// Successful capability result.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationOutput {
    pub output: Value,
    pub usage: Usage,
}

impl InvocationOutput {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            usage: Usage::default(),
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// `null`, blank strings, and empty containers count as "no result".
    /// An object whose only payload is a blank `text` field is empty too.
    pub fn is_empty(&self) -> bool {
        is_empty_value(&self.output)
    }

    /// Best-effort plain text view of the output.
    pub fn text(&self) -> Option<&str> {
        match &self.output {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => map.get("text").and_then(Value::as_str),
            _ => None,
        }
    }
}

fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(map) => {
            map.is_empty()
                || (map.len() == 1 && map.get("text").is_some_and(is_empty_value))
        }
        Value::Bool(_) | Value::Number(_) => false,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityErrorKind {
    Timeout,
    Failed,
    EmptyOutput,
    InvalidInput,
    CircuitOpen,
    NotFound,
    Disabled,
}

impl CapabilityErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Failed => "failed",
            Self::EmptyOutput => "empty_output",
            Self::InvalidInput => "invalid_input",
            Self::CircuitOpen => "circuit_open",
            Self::NotFound => "not_found",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for CapabilityErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure returned by a capability (or synthesized by the engine
/// around one).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct CapabilityError {
    pub kind: CapabilityErrorKind,
    pub message: String,
}

impl CapabilityError {
    pub fn new(kind: CapabilityErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(CapabilityErrorKind::Failed, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(CapabilityErrorKind::Timeout, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(CapabilityErrorKind::InvalidInput, message)
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            CapabilityErrorKind::Timeout
                | CapabilityErrorKind::Failed
                | CapabilityErrorKind::EmptyOutput
        )
    }

    /// Whether this outcome should feed the capability's circuit breaker.
    /// Fail-fast rejections never do.
    pub fn counts_against_breaker(&self) -> bool {
        self.is_retryable()
    }
}

pub type CapabilityResult = std::result::Result<InvocationOutput, CapabilityError>;
