use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capability wiring
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    /// Register `math_solver` and `template_synthesizer`.
    #[serde(default = "d_true")]
    pub builtins: bool,
    /// HTTP-backed model tiers (OpenAI-compatible chat completions).
    #[serde(default)]
    pub model_tiers: Vec<ModelTierConfig>,
    /// Names registered but switched off at startup.
    #[serde(default)]
    pub disabled: Vec<String>,
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            builtins: true,
            model_tiers: Vec::new(),
            disabled: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelTierConfig {
    /// Registry name, e.g. `llm_service` or `router_classifier`.
    pub name: String,
    /// Base URL up to (not including) `/chat/completions`.
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the bearer token.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Billing tier (`standard`, `heavy`, `ultra`).
    #[serde(default = "d_tier")]
    pub tier: String,
    /// Client-side HTTP timeout.
    #[serde(default = "d_http_timeout_ms")]
    pub http_timeout_ms: u64,
}

fn d_true() -> bool {
    true
}
fn d_tier() -> String {
    "standard".into()
}
fn d_http_timeout_ms() -> u64 {
    60_000
}
