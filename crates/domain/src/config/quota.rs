use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-organization run-unit quotas and the cost model behind them.
///
/// Plan limits are monthly run-unit budgets; a negative limit means
/// unlimited.  Organizations not listed in `orgs` fall back to
/// `default_plan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_default_plan")]
    pub default_plan: String,
    /// Plan name -> monthly run-unit limit.
    #[serde(default = "d_plans")]
    pub plans: HashMap<String, f64>,
    /// Organization id -> plan name.
    #[serde(default)]
    pub orgs: HashMap<String, String>,
    /// Tier name -> compute multiplier.
    #[serde(default = "d_tier_multipliers")]
    pub tier_multipliers: HashMap<String, f64>,
    /// Tool name -> flat per-call overhead.
    #[serde(default = "d_tool_overheads")]
    pub tool_overheads: HashMap<String, f64>,
    #[serde(default = "d_default_tool_overhead")]
    pub default_tool_overhead: f64,
    /// Smallest amount ever billed for one invocation.
    #[serde(default = "d_min_run_units")]
    pub min_run_units: f64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_plan: d_default_plan(),
            plans: d_plans(),
            orgs: HashMap::new(),
            tier_multipliers: d_tier_multipliers(),
            tool_overheads: d_tool_overheads(),
            default_tool_overhead: d_default_tool_overhead(),
            min_run_units: d_min_run_units(),
        }
    }
}

impl QuotaConfig {
    /// Monthly limit for an organization; `None` = unlimited.
    pub fn limit_for(&self, org_id: &str) -> Option<f64> {
        let plan = self.orgs.get(org_id).unwrap_or(&self.default_plan);
        match self.plans.get(plan) {
            Some(limit) if *limit >= 0.0 => Some(*limit),
            Some(_) => None,
            // Unknown plan: treat as the default plan's limit.
            None => self
                .plans
                .get(&self.default_plan)
                .copied()
                .filter(|l| *l >= 0.0),
        }
    }

    pub fn tier_multiplier(&self, tier: &str) -> f64 {
        self.tier_multipliers.get(tier).copied().unwrap_or(1.0)
    }

    pub fn tool_overhead(&self, tool: &str) -> f64 {
        self.tool_overheads
            .get(tool)
            .copied()
            .unwrap_or(self.default_tool_overhead)
    }
}

fn d_true() -> bool {
    true
}
fn d_default_plan() -> String {
    "free".into()
}
fn d_plans() -> HashMap<String, f64> {
    HashMap::from([
        ("free".to_owned(), 100.0),
        ("team".to_owned(), 5_000.0),
        ("enterprise".to_owned(), -1.0),
    ])
}
fn d_tier_multipliers() -> HashMap<String, f64> {
    HashMap::from([
        ("standard".to_owned(), 1.0),
        ("heavy".to_owned(), 1.5),
        ("ultra".to_owned(), 3.0),
    ])
}
fn d_tool_overheads() -> HashMap<String, f64> {
    HashMap::from([
        ("sandbox_execute".to_owned(), 0.2),
        ("build_module".to_owned(), 0.5),
        ("validate_module".to_owned(), 0.3),
        ("install_module".to_owned(), 0.2),
        ("write_module_code".to_owned(), 0.3),
    ])
}
fn d_default_tool_overhead() -> f64 {
    0.1
}
fn d_min_run_units() -> f64 {
    0.01
}
