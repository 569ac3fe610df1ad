mod capabilities;
mod checkpoint;
mod engine;
mod handle;
mod observability;
mod quota;
mod router;

pub use capabilities::*;
pub use checkpoint::*;
pub use engine::*;
pub use handle::*;
pub use observability::*;
pub use quota::*;
pub use router::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
            .map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

fn in_unit_range(v: f64) -> bool {
    (0.0..=1.0).contains(&v)
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        // Engine.
        if self.engine.max_parallel_tools == 0 {
            errors.push(ConfigError::error(
                "engine.max_parallel_tools",
                "must be at least 1",
            ));
        }
        if self.engine.max_tool_calls_per_turn == 0 {
            errors.push(ConfigError::error(
                "engine.max_tool_calls_per_turn",
                "must be at least 1",
            ));
        }
        if self.engine.invocation_timeout_ms == 0 {
            errors.push(ConfigError::error(
                "engine.invocation_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.engine.estimated_turn_cost < 0.0 {
            errors.push(ConfigError::error(
                "engine.estimated_turn_cost",
                "must not be negative",
            ));
        }

        // Retry / breaker.
        if self.retry.max_attempts == 0 {
            errors.push(ConfigError::error("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            errors.push(ConfigError::error(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }
        if self.breaker.failure_threshold == 0 {
            errors.push(ConfigError::error(
                "breaker.failure_threshold",
                "must be at least 1",
            ));
        }
        if self.breaker.base_cooldown_ms > self.breaker.max_cooldown_ms {
            errors.push(ConfigError::error(
                "breaker.base_cooldown_ms",
                "must not exceed breaker.max_cooldown_ms",
            ));
        }

        // Router.
        if self.router.classifier_timeout_ms == 0 {
            errors.push(ConfigError::error(
                "router.classifier_timeout_ms",
                "must be greater than 0",
            ));
        }
        if !in_unit_range(self.router.default_confidence) {
            errors.push(ConfigError::error(
                "router.default_confidence",
                "must be within [0, 1]",
            ));
        }
        if self.router.decision_log_capacity == 0 {
            errors.push(ConfigError::warning(
                "router.decision_log_capacity",
                "0 disables recent recommendation history",
            ));
        }
        for (i, rule) in self.router.heuristics.iter().enumerate() {
            let field = format!("router.heuristics[{i}]");
            if !in_unit_range(rule.confidence) {
                errors.push(ConfigError::error(
                    format!("{field}.confidence"),
                    "must be within [0, 1]",
                ));
            }
            if rule.keywords.is_empty() && rule.patterns.is_empty() {
                errors.push(ConfigError::warning(
                    field.clone(),
                    format!("rule '{}' has no keywords or patterns and never matches", rule.name),
                ));
            }
            for (j, pattern) in rule.patterns.iter().enumerate() {
                if let Err(e) = regex::Regex::new(pattern) {
                    errors.push(ConfigError::error(
                        format!("{field}.patterns[{j}]"),
                        format!("invalid regex: {e}"),
                    ));
                }
            }
        }

        // Recovery.
        if self.recovery.max_attempts == 0 {
            errors.push(ConfigError::error(
                "recovery.max_attempts",
                "must be at least 1",
            ));
        }
        if self.recovery.interval_secs == 0 {
            errors.push(ConfigError::error(
                "recovery.interval_secs",
                "must be greater than 0",
            ));
        }
        if self.recovery.max_concurrent == 0 {
            errors.push(ConfigError::error(
                "recovery.max_concurrent",
                "must be at least 1",
            ));
        }

        // Quota.
        if !self.quota.plans.contains_key(&self.quota.default_plan) {
            errors.push(ConfigError::error(
                "quota.default_plan",
                format!("plan '{}' is not defined in quota.plans", self.quota.default_plan),
            ));
        }
        let mut orgs: Vec<_> = self.quota.orgs.iter().collect();
        orgs.sort();
        for (org, plan) in orgs {
            if !self.quota.plans.contains_key(plan) {
                errors.push(ConfigError::error(
                    format!("quota.orgs.{org}"),
                    format!("plan '{plan}' is not defined in quota.plans"),
                ));
            }
        }

        // Capabilities.
        let mut seen = HashSet::new();
        for (i, tier) in self.capabilities.model_tiers.iter().enumerate() {
            let field = format!("capabilities.model_tiers[{i}]");
            if tier.name.is_empty() {
                errors.push(ConfigError::error(
                    format!("{field}.name"),
                    "name must not be empty",
                ));
            } else if !seen.insert(tier.name.as_str()) {
                errors.push(ConfigError::error(
                    format!("{field}.name"),
                    format!("duplicate capability name '{}'", tier.name),
                ));
            }
            if tier.base_url.is_empty() {
                errors.push(ConfigError::error(
                    format!("{field}.base_url"),
                    "base_url must not be empty",
                ));
            }
            if !self.quota.tier_multipliers.contains_key(&tier.tier) {
                errors.push(ConfigError::warning(
                    format!("{field}.tier"),
                    format!("unknown tier '{}' bills at multiplier 1.0", tier.tier),
                ));
            }
        }
        if self.capabilities.model_tiers.is_empty() {
            errors.push(ConfigError::warning(
                "capabilities.model_tiers",
                "no model tiers configured; only built-in capabilities are available",
            ));
        }

        if !in_unit_range(self.observability.sample_rate) {
            errors.push(ConfigError::error(
                "observability.sample_rate",
                "must be within [0, 1]",
            ));
        }

        errors
    }

    /// Errors only (warnings dropped), joined for a single message.
    pub fn validation_errors(&self) -> Option<String> {
        let errors: Vec<String> = self
            .validate()
            .into_iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            None
        } else {
            Some(errors.join("; "))
        }
    }
}
