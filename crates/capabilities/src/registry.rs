//! Capability registry.
//!
//! Maps names to invocable handlers. Lookups take a shared read lock on
//! the name map; the enabled flag lives in each entry so toggling one
//! capability never blocks traffic to another.  Circuit-breaker state is
//! deliberately kept elsewhere (see [`crate::breaker`]) so re-registering a
//! handler does not reset its health history.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use sy_domain::capability::{CapabilityError, CapabilityErrorKind, CapabilityKind};

use crate::traits::Capability;

/// Billing tier assigned when a registration does not name one.
pub const DEFAULT_TIER: &str = "standard";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("capability not found: {0}")]
    NotFound(String),
    #[error("capability disabled: {0}")]
    Disabled(String),
}

impl From<RegistryError> for CapabilityError {
    fn from(e: RegistryError) -> Self {
        let kind = match e {
            RegistryError::NotFound(_) => CapabilityErrorKind::NotFound,
            RegistryError::Disabled(_) => CapabilityErrorKind::Disabled,
        };
        CapabilityError::new(kind, e.to_string())
    }
}

/// One registered capability.
pub struct CapabilityEntry {
    pub name: String,
    pub kind: CapabilityKind,
    pub tier: String,
    pub handler: Arc<dyn Capability>,
    enabled: AtomicBool,
    pub registered_at: DateTime<Utc>,
}

impl CapabilityEntry {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

/// Serializable description of a registration (for admin views).
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityInfo {
    pub name: String,
    pub kind: CapabilityKind,
    pub tier: String,
    pub enabled: bool,
    pub registered_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CapabilityRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct CapabilityRegistry {
    entries: RwLock<HashMap<String, Arc<CapabilityEntry>>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a capability at the default billing tier.
    pub fn register(&self, name: &str, kind: CapabilityKind, handler: Arc<dyn Capability>) {
        self.register_with_tier(name, kind, DEFAULT_TIER, handler);
    }

    /// Register (or replace) a capability.
    ///
    /// Re-registering an existing name swaps the handler, kind and tier
    /// but keeps its enabled flag.
    pub fn register_with_tier(
        &self,
        name: &str,
        kind: CapabilityKind,
        tier: &str,
        handler: Arc<dyn Capability>,
    ) {
        let mut entries = self.entries.write();
        let enabled = entries.get(name).map_or(true, |e| e.is_enabled());
        let replaced = entries.contains_key(name);
        entries.insert(
            name.to_owned(),
            Arc::new(CapabilityEntry {
                name: name.to_owned(),
                kind,
                tier: tier.to_owned(),
                handler,
                enabled: AtomicBool::new(enabled),
                registered_at: Utc::now(),
            }),
        );
        tracing::info!(capability = %name, kind = %kind, tier = %tier, replaced, "registered capability");
    }

    /// Resolve an enabled entry by name.
    pub fn resolve(&self, name: &str) -> Result<Arc<CapabilityEntry>, RegistryError> {
        let entry = self
            .entries
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_owned()))?;
        if !entry.is_enabled() {
            return Err(RegistryError::Disabled(name.to_owned()));
        }
        Ok(entry)
    }

    /// Look up the handler of an enabled capability.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Capability>, RegistryError> {
        self.resolve(name).map(|e| e.handler.clone())
    }

    pub fn enable(&self, name: &str) -> Result<(), RegistryError> {
        self.set_enabled(name, true)
    }

    pub fn disable(&self, name: &str) -> Result<(), RegistryError> {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        let entries = self.entries.read();
        let entry = entries
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_owned()))?;
        entry.enabled.store(enabled, Ordering::Release);
        tracing::info!(capability = %name, enabled, "capability toggled");
        Ok(())
    }

    /// Registered names (enabled or not), sorted, optionally filtered by kind.
    pub fn list(&self, kind: Option<CapabilityKind>) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .values()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .map(|e| e.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Whether `name` is registered *and* enabled.
    pub fn is_available(&self, name: &str) -> bool {
        self.entries
            .read()
            .get(name)
            .is_some_and(|e| e.is_enabled())
    }

    pub fn kind_of(&self, name: &str) -> Option<CapabilityKind> {
        self.entries.read().get(name).map(|e| e.kind)
    }

    pub fn tier_of(&self, name: &str) -> Option<String> {
        self.entries.read().get(name).map(|e| e.tier.clone())
    }

    pub fn info(&self, name: &str) -> Option<CapabilityInfo> {
        self.entries.read().get(name).map(|e| CapabilityInfo {
            name: e.name.clone(),
            kind: e.kind,
            tier: e.tier.clone(),
            enabled: e.is_enabled(),
            registered_at: e.registered_at,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::from_fn;
    use serde_json::json;
    use sy_domain::capability::{Invocation, InvocationOutput};

    fn constant(value: i64) -> Arc<dyn Capability> {
        from_fn(move |_inv: Invocation| async move {
            Ok(InvocationOutput::new(json!({ "value": value })))
        })
    }

    #[tokio::test]
    async fn register_and_get() {
        let reg = CapabilityRegistry::new();
        reg.register("calc", CapabilityKind::Tool, constant(1));

        let handler = reg.get("calc").unwrap();
        let out = handler.invoke(Invocation::new(json!({}))).await.unwrap();
        assert_eq!(out.output["value"], 1);
    }

    #[test]
    fn missing_vs_disabled_are_distinct() {
        let reg = CapabilityRegistry::new();
        reg.register("calc", CapabilityKind::Tool, constant(1));
        reg.disable("calc").unwrap();

        assert_eq!(
            reg.get("calc").err(),
            Some(RegistryError::Disabled("calc".into()))
        );
        assert_eq!(
            reg.get("nope").err(),
            Some(RegistryError::NotFound("nope".into()))
        );

        reg.enable("calc").unwrap();
        assert!(reg.get("calc").is_ok());
    }

    #[test]
    fn toggling_unknown_capability_fails() {
        let reg = CapabilityRegistry::new();
        assert!(matches!(reg.disable("ghost"), Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn reregistration_replaces_handler_keeps_flag() {
        let reg = CapabilityRegistry::new();
        reg.register("calc", CapabilityKind::Tool, constant(1));
        reg.disable("calc").unwrap();
        reg.register("calc", CapabilityKind::Tool, constant(2));

        assert!(!reg.is_available("calc"));
        reg.enable("calc").unwrap();
        let out = reg
            .get("calc")
            .unwrap()
            .invoke(Invocation::new(json!({})))
            .await
            .unwrap();
        assert_eq!(out.output["value"], 2);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn list_filters_by_kind() {
        let reg = CapabilityRegistry::new();
        reg.register("web_search", CapabilityKind::Tool, constant(0));
        reg.register("math_solver", CapabilityKind::Tool, constant(0));
        reg.register_with_tier("llm_service", CapabilityKind::ModelTier, "heavy", constant(0));

        assert_eq!(reg.list(Some(CapabilityKind::Tool)), vec!["math_solver", "web_search"]);
        assert_eq!(reg.list(Some(CapabilityKind::ModelTier)), vec!["llm_service"]);
        assert_eq!(reg.list(None).len(), 3);
        assert_eq!(reg.tier_of("llm_service").as_deref(), Some("heavy"));
    }
}
