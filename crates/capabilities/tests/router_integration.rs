//! Router behaviour against a live registry: classifier success,
//! every fallback trigger, and disabled-capability filtering.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sy_capabilities::builtin::register_builtins;
use sy_capabilities::{from_fn, CapabilityRegistry, CircuitBreakers, Router};
use sy_domain::capability::{CapabilityError, CapabilityKind, Invocation, InvocationOutput};
use sy_domain::config::{BreakerConfig, RouterConfig};

fn setup() -> (Arc<CapabilityRegistry>, Arc<CircuitBreakers>, Router) {
    let registry = Arc::new(CapabilityRegistry::new());
    register_builtins(&registry);
    let noop = from_fn(|_inv: Invocation| async { Ok(InvocationOutput::new(json!({"text": "ok"}))) });
    registry.register("web_search", CapabilityKind::Tool, noop.clone());
    registry.register("llm_service", CapabilityKind::ModelTier, noop);
    let breakers = Arc::new(CircuitBreakers::new(BreakerConfig::default()));
    let router = Router::new(RouterConfig::default(), registry.clone(), breakers.clone());
    (registry, breakers, router)
}

#[tokio::test]
async fn no_classifier_uses_heuristic() {
    let (_registry, _breakers, router) = setup();
    let rec = router.route("What is 25 * 17?").await;
    assert_eq!(rec.primary_capability, "math_solver");
    assert!((rec.confidence - 0.7).abs() < f64::EPSILON);
    assert!(rec.fallback);
    assert!(rec.reasoning.contains("fallback heuristic"));
    assert!(rec.reasoning.contains("classifier unavailable"));
}

#[tokio::test]
async fn fallback_is_stable_across_calls() {
    let (_registry, _breakers, router) = setup();
    let a = router.route("latest news from Tokyo").await;
    let b = router.route("latest news from Tokyo").await;
    assert_eq!(a.primary_capability, b.primary_capability);
    assert_eq!(a.confidence, b.confidence);
    assert_eq!(a.reasoning, b.reasoning);
    assert_eq!(a.candidates, b.candidates);
}

#[tokio::test]
async fn classifier_output_is_ranked_and_clamped() {
    let (registry, _breakers, router) = setup();
    registry.register(
        "router_classifier",
        CapabilityKind::ModelTier,
        from_fn(|inv: Invocation| async move {
            assert_eq!(inv.input["json_mode"], json!(true));
            Ok(InvocationOutput::new(json!({
                "recommended_services": [
                    {"service": "llm_service", "confidence": 0.3, "reasoning": "summary"},
                    {"service": "web_search", "confidence": 1.4, "reasoning": "needs fresh data"},
                    {"service": "coding_service", "confidence": 0.9, "reasoning": "not installed"}
                ],
                "primary_service": "llm_service",
                "requires_tools": true
            })))
        }),
    );

    let rec = router.route("weather in Tokyo").await;
    assert!(!rec.fallback);
    assert_eq!(rec.primary_capability, "web_search");
    assert_eq!(rec.confidence, 1.0);
    assert!(rec.requires_tools);
    let names: Vec<&str> = rec.candidates.iter().map(|c| c.capability.as_str()).collect();
    assert_eq!(names, vec!["web_search", "llm_service"]);
}

#[tokio::test]
async fn disabled_candidates_are_excluded() {
    let (registry, _breakers, router) = setup();
    registry.register(
        "router_classifier",
        CapabilityKind::ModelTier,
        from_fn(|_inv: Invocation| async {
            Ok(InvocationOutput::new(json!({
                "text": "{\"recommended_services\": [{\"service\": \"web_search\", \"confidence\": 0.95}], \"primary_service\": \"web_search\", \"requires_tools\": true}"
            })))
        }),
    );
    registry.disable("web_search").unwrap();

    let rec = router.route("latest news").await;
    assert!(rec.fallback, "no available candidate forces the heuristic path");
    assert!(rec.reasoning.contains("no available capability"));
}

#[tokio::test]
async fn classifier_error_falls_back() {
    let (registry, breakers, router) = setup();
    registry.register(
        "router_classifier",
        CapabilityKind::ModelTier,
        from_fn(|_inv: Invocation| async { Err(CapabilityError::failed("backend 503")) }),
    );
    let rec = router.route("hello there").await;
    assert!(rec.fallback);
    assert_eq!(rec.primary_capability, "llm_service");
    assert!(!rec.requires_tools);
    assert_eq!(breakers.snapshot("router_classifier").failure_count, 1);
}

#[tokio::test]
async fn garbage_output_falls_back() {
    let (registry, _breakers, router) = setup();
    registry.register(
        "router_classifier",
        CapabilityKind::ModelTier,
        from_fn(|_inv: Invocation| async {
            Ok(InvocationOutput::new(json!({"text": "definitely math"})))
        }),
    );
    let rec = router.route("What is 2 + 2?").await;
    assert!(rec.fallback);
    assert_eq!(rec.primary_capability, "math_solver");
}

#[tokio::test(start_paused = true)]
async fn slow_classifier_times_out() {
    let (registry, _breakers, router) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    registry.register(
        "router_classifier",
        CapabilityKind::ModelTier,
        from_fn(move |_inv: Invocation| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(InvocationOutput::new(json!({"text": "too late"})))
            }
        }),
    );

    let rec = router.route("What is 25 * 17?").await;
    assert!(rec.fallback);
    assert!(rec.reasoning.contains("timed out"));
    assert_eq!(rec.primary_capability, "math_solver");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn decisions_are_recorded() {
    let (_registry, _breakers, router) = setup();
    router.route_for(Some("t-1"), "hello").await;
    router.route_for(Some("t-2"), "What is 1 + 1?").await;

    let recent = router.recent(10);
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].thread_id.as_deref(), Some("t-2"));
    assert_eq!(recent[0].primary_capability, "math_solver");
    assert_eq!(recent[1].primary_capability, "llm_service");
}

#[tokio::test]
async fn reload_swaps_heuristics() {
    let (_registry, _breakers, router) = setup();
    let mut cfg = RouterConfig::default();
    cfg.heuristics.clear();
    cfg.default_capability = "template_synthesizer".into();
    router.reload(cfg);

    let rec = router.route("What is 25 * 17?").await;
    assert_eq!(rec.primary_capability, "template_synthesizer");
}

#[tokio::test]
async fn disabled_tool_is_not_recommended_by_heuristics() {
    let (registry, _breakers, router) = setup();
    registry.disable("math_solver").unwrap();

    let rec = router.route("What is 25 * 17?").await;
    assert_ne!(rec.primary_capability, "math_solver");
    assert_eq!(rec.primary_capability, "llm_service");
    assert!(!rec.requires_tools);
    assert!(rec.fallback);
}

#[tokio::test]
async fn unregistered_tool_is_not_recommended_by_heuristics() {
    let registry = Arc::new(CapabilityRegistry::new());
    register_builtins(&registry);
    let breakers = Arc::new(CircuitBreakers::new(BreakerConfig::default()));
    let router = Router::new(RouterConfig::default(), registry, breakers);

    let rec = router.route("What is the current date?").await;
    assert_eq!(rec.primary_capability, "llm_service");
    assert!(!rec.requires_tools);

    let rec = router.route("Summarize https://example.org/post").await;
    assert_eq!(rec.primary_capability, "llm_service");
}

#[tokio::test]
async fn heuristic_tool_rule_needs_a_tool_behind_it() {
    let (registry, _breakers, router) = setup();
    let noop = from_fn(|_inv: Invocation| async { Ok(InvocationOutput::new(json!({"text": "ok"}))) });
    // Registered under the rule's name, but as a model tier.
    registry.register("load_web_page", CapabilityKind::ModelTier, noop);

    let rec = router.route("Summarize https://example.org/post").await;
    assert_eq!(rec.primary_capability, "llm_service");
}
