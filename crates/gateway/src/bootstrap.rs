//! Orchestrator construction shared by `serve`, `run`, `status` and
//! `recover`, so every command boots the same runtime.

use std::sync::Arc;

use anyhow::Context;

use sy_capabilities::builtin::register_builtins;
use sy_capabilities::openai_compat::OpenAiCompatCapability;
use sy_capabilities::CapabilityRegistry;
use sy_checkpoint::WalCheckpointStore;
use sy_domain::capability::CapabilityKind;
use sy_domain::config::{CapabilitiesConfig, ConfigHandle, ConfigSeverity};
use sy_engine::{InMemoryUsageLedger, Orchestrator};

/// Load and validate the config at `path`, open the checkpoint log and
/// return a fully wired [`Orchestrator`].  Background loops are not
/// started here.
pub fn build_orchestrator(path: &str) -> anyhow::Result<Arc<Orchestrator>> {
    // ── Config ───────────────────────────────────────────────────────
    let handle = ConfigHandle::init(path).with_context(|| format!("loading config {path}"))?;
    let config = handle.snapshot();
    // `init` has already refused Error-severity issues.
    for issue in config.validate() {
        if issue.severity == ConfigSeverity::Warning {
            tracing::warn!("config: {issue}");
        }
    }

    // ── Capabilities ─────────────────────────────────────────────────
    let registry = Arc::new(build_registry(&config.capabilities)?);
    tracing::info!(capabilities = registry.len(), "capability registry ready");

    // ── Checkpoint store ─────────────────────────────────────────────
    let store = Arc::new(
        WalCheckpointStore::open(&config.checkpoint).with_context(|| {
            format!("opening checkpoint log in {}", config.checkpoint.dir.display())
        })?,
    );
    tracing::info!(path = %store.path().display(), "checkpoint store ready");

    // ── Usage ledger ─────────────────────────────────────────────────
    let ledger = Arc::new(InMemoryUsageLedger::new());
    if config.quota.enabled {
        tracing::info!("quota enforcement enabled (in-process usage ledger)");
    }

    Ok(Arc::new(Orchestrator::new(
        Arc::new(handle),
        registry,
        store,
        ledger,
    )))
}

/// Register built-ins and configured model tiers, then switch off the
/// names listed in `disabled`.
pub fn build_registry(cfg: &CapabilitiesConfig) -> anyhow::Result<CapabilityRegistry> {
    let registry = CapabilityRegistry::new();
    if cfg.builtins {
        register_builtins(&registry);
    }

    for tier in &cfg.model_tiers {
        let capability = OpenAiCompatCapability::from_config(tier)
            .with_context(|| format!("initializing model tier '{}'", tier.name))?;
        registry.register_with_tier(
            &tier.name,
            CapabilityKind::ModelTier,
            &tier.tier,
            Arc::new(capability),
        );
        tracing::info!(
            capability = %tier.name,
            model = %tier.model,
            base_url = %tier.base_url,
            "model tier ready"
        );
    }

    for name in &cfg.disabled {
        if let Err(e) = registry.disable(name) {
            tracing::warn!(capability = %name, error = %e, "cannot disable capability");
        }
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sy_domain::config::ModelTierConfig;

    fn tier(name: &str, tier: &str) -> ModelTierConfig {
        ModelTierConfig {
            name: name.into(),
            base_url: "http://127.0.0.1:9/v1".into(),
            model: "test-model".into(),
            api_key_env: None,
            tier: tier.into(),
            http_timeout_ms: 1_000,
        }
    }

    #[test]
    fn builtins_and_tiers_registered() {
        let cfg = CapabilitiesConfig {
            builtins: true,
            model_tiers: vec![tier("llm_service", "heavy")],
            disabled: vec![],
        };
        let registry = build_registry(&cfg).unwrap();
        assert!(registry.is_available("math_solver"));
        assert!(registry.is_available("template_synthesizer"));
        assert_eq!(registry.kind_of("llm_service"), Some(CapabilityKind::ModelTier));
        assert_eq!(registry.tier_of("llm_service").as_deref(), Some("heavy"));
    }

    #[test]
    fn disabled_names_are_switched_off() {
        let cfg = CapabilitiesConfig {
            builtins: true,
            model_tiers: vec![],
            disabled: vec!["math_solver".into(), "unknown".into()],
        };
        let registry = build_registry(&cfg).unwrap();
        assert!(!registry.is_available("math_solver"));
        assert!(registry.is_available("template_synthesizer"));
    }

    #[test]
    fn builtins_can_be_omitted() {
        let cfg = CapabilitiesConfig {
            builtins: false,
            ..Default::default()
        };
        assert!(build_registry(&cfg).unwrap().is_empty());
    }

    #[test]
    fn orchestrator_boots_from_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("switchyard.toml");
        std::fs::write(
            &config_path,
            format!(
                "[checkpoint]\ndir = {:?}\nfsync = false\n",
                dir.path().join("ckpt").display().to_string()
            ),
        )
        .unwrap();

        let orch = build_orchestrator(config_path.to_str().unwrap()).unwrap();
        assert_eq!(orch.checkpoint_stats().threads, 0);
        assert!(orch.capability_health("math_solver").is_some());
    }

    #[test]
    fn invalid_config_refuses_to_boot() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("switchyard.toml");
        std::fs::write(
            &config_path,
            format!(
                "[checkpoint]\ndir = {:?}\nfsync = false\n\n[breaker]\nbase_cooldown_ms = 60000\nmax_cooldown_ms = 1000\n",
                dir.path().join("ckpt").display().to_string()
            ),
        )
        .unwrap();

        let err = build_orchestrator(config_path.to_str().unwrap()).err().expect("expected build_orchestrator to fail");
        assert!(
            format!("{err:#}").contains("breaker.base_cooldown_ms"),
            "{err:#}"
        );
        assert!(!dir.path().join("ckpt").exists(), "nothing opened");
    }
}
