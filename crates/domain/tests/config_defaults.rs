use sy_domain::config::{BusyPolicy, Config, ConfigSeverity};

#[test]
fn defaults_match_documented_constants() {
    let config = Config::default();
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.retry.base_delay_ms, 1_000);
    assert_eq!(config.retry.max_delay_ms, 30_000);
    assert_eq!(config.breaker.failure_threshold, 3);
    assert_eq!(config.breaker.max_cooldown_ms, 30_000);
    assert_eq!(config.router.classifier_timeout_ms, 10_000);
    assert_eq!(config.recovery.staleness_secs, 300);
    assert_eq!(config.recovery.interval_secs, 300);
    assert_eq!(config.recovery.max_attempts, 3);
    assert_eq!(config.engine.busy_policy, BusyPolicy::Wait);
}

#[test]
fn default_heuristic_table_order() {
    let config = Config::default();
    let names: Vec<&str> = config
        .router
        .heuristics
        .iter()
        .map(|r| r.capability.as_str())
        .collect();
    assert_eq!(names, vec!["web_search", "math_solver", "load_web_page"]);
    assert_eq!(config.router.default_capability, "llm_service");
}

#[test]
fn default_config_has_no_errors() {
    let issues = Config::default().validate();
    assert!(issues.iter().all(|i| i.severity == ConfigSeverity::Warning));
}

#[test]
fn partial_toml_keeps_other_defaults() {
    let toml_str = r#"
[engine]
busy_policy = "reject"
max_parallel_tools = 4

[quota.orgs]
acme = "team"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.engine.busy_policy, BusyPolicy::Reject);
    assert_eq!(config.engine.max_parallel_tools, 4);
    assert_eq!(config.engine.max_tool_calls_per_turn, 25);
    assert_eq!(config.quota.limit_for("acme"), Some(5_000.0));
    assert_eq!(config.quota.plans.len(), 3);
}

#[test]
fn custom_heuristics_replace_table() {
    let toml_str = r#"
[[router.heuristics]]
name = "code"
capability = "coding_service"
confidence = 0.8
keywords = ["rust", "compile"]
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.router.heuristics.len(), 1);
    assert!(config.router.heuristics[0].requires_tools);
    assert!(config.router.heuristics[0].patterns.is_empty());
}

#[test]
fn model_tier_entries_parse() {
    let toml_str = r#"
[[capabilities.model_tiers]]
name = "llm_service"
base_url = "http://localhost:8000/v1"
model = "qwen2.5-7b"
api_key_env = "LLM_KEY"
tier = "heavy"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let tier = &config.capabilities.model_tiers[0];
    assert_eq!(tier.tier, "heavy");
    assert_eq!(tier.http_timeout_ms, 60_000);
    assert!(config.capabilities.builtins);
}

#[test]
fn validation_flags_bad_values() {
    let toml_str = r#"
[retry]
base_delay_ms = 5000
max_delay_ms = 100

[[router.heuristics]]
name = "broken"
capability = "x"
confidence = 1.5
patterns = ["(unclosed"]

[quota]
default_plan = "gold"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let errors: Vec<String> = config
        .validate()
        .into_iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .map(|e| e.field)
        .collect();
    assert!(errors.contains(&"retry.base_delay_ms".to_string()));
    assert!(errors.contains(&"router.heuristics[0].confidence".to_string()));
    assert!(errors.contains(&"router.heuristics[0].patterns[0]".to_string()));
    assert!(errors.contains(&"quota.default_plan".to_string()));
}

#[test]
fn duplicate_model_tier_names_rejected() {
    let toml_str = r#"
[[capabilities.model_tiers]]
name = "llm_service"
base_url = "http://a"
model = "m"

[[capabilities.model_tiers]]
name = "llm_service"
base_url = "http://b"
model = "m"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert!(config.validation_errors().is_some());
}
