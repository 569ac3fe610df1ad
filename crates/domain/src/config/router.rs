use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Registered model tier used for classification.
    #[serde(default = "d_classifier_capability")]
    pub classifier_capability: String,
    #[serde(default = "d_classifier_timeout_ms")]
    pub classifier_timeout_ms: u64,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    /// Classifier candidates beyond this are dropped.
    #[serde(default = "d_max_candidates")]
    pub max_candidates: usize,
    /// Capacity of the recent-decisions ring buffer.
    #[serde(default = "d_decision_log_capacity")]
    pub decision_log_capacity: usize,
    /// General-purpose conversational capability for the default bucket.
    #[serde(default = "d_default_capability")]
    pub default_capability: String,
    #[serde(default = "d_default_confidence")]
    pub default_confidence: f64,
    /// Ordered heuristic table; first match wins.
    #[serde(default = "d_heuristics")]
    pub heuristics: Vec<HeuristicRule>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            classifier_capability: d_classifier_capability(),
            classifier_timeout_ms: d_classifier_timeout_ms(),
            temperature: d_temperature(),
            max_tokens: d_max_tokens(),
            max_candidates: d_max_candidates(),
            decision_log_capacity: d_decision_log_capacity(),
            default_capability: d_default_capability(),
            default_confidence: d_default_confidence(),
            heuristics: d_heuristics(),
        }
    }
}

/// One row of the fallback routing table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicRule {
    pub name: String,
    pub capability: String,
    pub confidence: f64,
    #[serde(default = "d_true")]
    pub requires_tools: bool,
    /// Case-insensitive substrings.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Regular expressions matched against the lowercased query.
    #[serde(default)]
    pub patterns: Vec<String>,
}

fn d_classifier_capability() -> String {
    "router_classifier".into()
}
fn d_classifier_timeout_ms() -> u64 {
    10_000
}
fn d_temperature() -> f32 {
    0.1
}
fn d_max_tokens() -> u32 {
    512
}
fn d_max_candidates() -> usize {
    3
}
fn d_decision_log_capacity() -> usize {
    200
}
fn d_default_capability() -> String {
    "llm_service".into()
}
fn d_default_confidence() -> f64 {
    0.5
}
fn d_true() -> bool {
    true
}

fn rule(
    name: &str,
    capability: &str,
    confidence: f64,
    keywords: &[&str],
    patterns: &[&str],
) -> HeuristicRule {
    HeuristicRule {
        name: name.into(),
        capability: capability.into(),
        confidence,
        requires_tools: true,
        keywords: keywords.iter().map(|k| (*k).to_owned()).collect(),
        patterns: patterns.iter().map(|p| (*p).to_owned()).collect(),
    }
}

fn d_heuristics() -> Vec<HeuristicRule> {
    vec![
        rule(
            "search",
            "web_search",
            0.6,
            &["weather", "news", "current", "latest", "search"],
            &[],
        ),
        rule(
            "math",
            "math_solver",
            0.7,
            &["calculate", "solve", "math", "equation", "=", "+"],
            &[r"\d+\s*[-+*/x×÷^%]\s*\d+"],
        ),
        rule("web_page", "load_web_page", 0.65, &["http", "www.", ".com"], &[]),
    ]
}
