//! Tier classifier.
//!
//! The primary path asks a registered MODEL_TIER capability (the
//! classifier) for a ranked recommendation under a short deadline.  Any
//! failure (missing/disabled classifier, open circuit, timeout,
//! unparsable output, nothing usable recommended) drops to the
//! deterministic [`HeuristicTable`].  `route` therefore always returns a
//! recommendation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::{json, Value};
use sy_domain::capability::{CapabilityKind, Invocation};
use sy_domain::config::{HeuristicRule, RouterConfig};
use sy_domain::thread::{Recommendation, RouteCandidate};

use crate::breaker::CircuitBreakers;
use crate::decisions::{DecisionLog, RouteDecision};
use crate::heuristic::HeuristicTable;
use crate::registry::CapabilityRegistry;

struct RouterSettings {
    config: RouterConfig,
    table: HeuristicTable,
}

pub struct Router {
    registry: Arc<CapabilityRegistry>,
    breakers: Arc<CircuitBreakers>,
    settings: RwLock<Arc<RouterSettings>>,
    decisions: DecisionLog,
}

impl Router {
    pub fn new(
        config: RouterConfig,
        registry: Arc<CapabilityRegistry>,
        breakers: Arc<CircuitBreakers>,
    ) -> Self {
        let decisions = DecisionLog::new(config.decision_log_capacity);
        Self {
            registry,
            breakers,
            settings: RwLock::new(Arc::new(RouterSettings {
                table: HeuristicTable::compile(&config),
                config,
            })),
            decisions,
        }
    }

    /// Swap in a new config and heuristic table. In-flight `route` calls
    /// finish with the settings they started with.
    pub fn reload(&self, config: RouterConfig) {
        let settings = RouterSettings {
            table: HeuristicTable::compile(&config),
            config,
        };
        *self.settings.write() = Arc::new(settings);
    }

    pub async fn route(&self, query: &str) -> Recommendation {
        self.route_for(None, query).await
    }

    /// Route and record the decision against `thread_id`.
    pub async fn route_for(&self, thread_id: Option<&str>, query: &str) -> Recommendation {
        let started = Instant::now();
        let settings = self.settings.read().clone();

        let mut rec = match self.classify(&settings.config, query).await {
            Ok(rec) => rec,
            Err(cause) => {
                tracing::warn!(
                    thread_id = thread_id.unwrap_or("-"),
                    cause = %cause,
                    "classifier unavailable, using heuristic routing"
                );
                settings
                    .table
                    .recommend(query, &cause, |rule| self.rule_usable(rule))
            }
        };
        rec.latency_ms = started.elapsed().as_millis() as u64;

        self.decisions
            .record(RouteDecision::from_recommendation(thread_id, query, &rec));
        rec
    }

    /// Most recent decisions, newest first.
    pub fn recent(&self, limit: usize) -> Vec<RouteDecision> {
        self.decisions.recent(limit)
    }

    async fn classify(&self, cfg: &RouterConfig, query: &str) -> Result<Recommendation, String> {
        let name = cfg.classifier_capability.as_str();
        let classifier = self
            .registry
            .get(name)
            .map_err(|e| format!("classifier unavailable: {e}"))?;
        if !self.breakers.allow(name) {
            return Err(format!("classifier '{name}' circuit is open"));
        }

        let input = json!({
            "system_prompt": self.system_prompt(),
            "query": query,
            "temperature": cfg.temperature,
            "max_tokens": cfg.max_tokens,
            "json_mode": true,
        });
        let deadline = Duration::from_millis(cfg.classifier_timeout_ms);

        let output = match tokio::time::timeout(deadline, classifier.invoke(Invocation::new(input))).await {
            Ok(Ok(out)) if !out.is_empty() => out,
            Ok(Ok(_)) => {
                self.breakers.record_failure(name);
                return Err("classifier returned empty output".into());
            }
            Ok(Err(e)) => {
                if e.counts_against_breaker() {
                    self.breakers.record_failure(name);
                }
                return Err(format!("classifier failed: {e}"));
            }
            Err(_) => {
                self.breakers.record_failure(name);
                return Err(format!("classifier timed out after {}ms", cfg.classifier_timeout_ms));
            }
        };
        self.breakers.record_success(name);

        let parsed = parse_classification(&output.output)?;
        self.finish(cfg, parsed)
    }

    /// A heuristic rule may only be chosen when its capability is
    /// registered and enabled; tool rules also need a TOOL behind them.
    fn rule_usable(&self, rule: &HeuristicRule) -> bool {
        if !self.registry.is_available(&rule.capability) {
            return false;
        }
        !rule.requires_tools
            || self.registry.kind_of(&rule.capability) == Some(CapabilityKind::Tool)
    }

    /// Filter unavailable capabilities, clamp, rank, and fill defaults.
    fn finish(&self, cfg: &RouterConfig, parsed: Classification) -> Result<Recommendation, String> {
        let mut candidates: Vec<RouteCandidate> = parsed
            .candidates
            .into_iter()
            .filter(|c| self.registry.is_available(&c.capability))
            .map(|mut c| {
                c.confidence = clamp_confidence(c.confidence);
                c
            })
            .collect();
        if candidates.is_empty() {
            return Err("classifier recommended no available capability".into());
        }
        // Stable sort keeps classifier order among equal confidences.
        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        candidates.truncate(cfg.max_candidates.max(1));

        let has_tool = candidates
            .iter()
            .any(|c| self.registry.kind_of(&c.capability) == Some(CapabilityKind::Tool));
        let requires_tools = parsed.requires_tools.unwrap_or(true) && has_tool;

        let primary = &candidates[0];
        Ok(Recommendation {
            primary_capability: primary.capability.clone(),
            confidence: primary.confidence,
            reasoning: primary.reasoning.clone(),
            requires_tools,
            candidates,
            latency_ms: 0,
            fallback: false,
        })
    }

    fn system_prompt(&self) -> String {
        let mut prompt = String::from(
            "You route user queries to the capability best suited to answer them.\n\nAvailable capabilities:\n",
        );
        for name in self.registry.list(None) {
            if !self.registry.is_available(&name) {
                continue;
            }
            let kind = self
                .registry
                .kind_of(&name)
                .map_or("unknown", |k| k.as_str());
            prompt.push_str(&format!("- {name} ({kind})\n"));
        }
        prompt.push_str(
            "\nRespond with JSON only:\n\
             {\"recommended_services\": [{\"service\": \"<name>\", \"confidence\": 0.0-1.0, \"reasoning\": \"<short>\"}],\n \
             \"primary_service\": \"<name>\", \"requires_tools\": true|false}\n\
             List at most 3 services ordered by relevance. requires_tools is true when a tool must run before answering.",
        );
        prompt
    }
}

fn clamp_confidence(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classifier output parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
struct Classification {
    candidates: Vec<RouteCandidate>,
    requires_tools: Option<bool>,
}

/// Accepts the JSON object directly or wrapped as `{"text": "..."}`, in
/// which case the outermost `{...}` span of the text is decoded.
fn parse_classification(output: &Value) -> Result<Classification, String> {
    let owned;
    let obj = if output.get("recommended_services").is_some() {
        output
    } else {
        let text = match output {
            Value::String(s) => s.as_str(),
            other => other
                .get("text")
                .and_then(Value::as_str)
                .ok_or("classifier output has no recommendation payload")?,
        };
        let start = text.find('{').ok_or("classifier text contains no JSON object")?;
        let end = text.rfind('}').ok_or("classifier text contains no JSON object")?;
        if end < start {
            return Err("classifier text contains no JSON object".into());
        }
        owned = serde_json::from_str::<Value>(&text[start..=end])
            .map_err(|e| format!("unparsable classifier output: {e}"))?;
        &owned
    };

    let services = obj
        .get("recommended_services")
        .and_then(Value::as_array)
        .ok_or("classifier output missing recommended_services")?;

    let mut candidates = Vec::new();
    for svc in services {
        let Some(capability) = svc
            .get("service")
            .or_else(|| svc.get("capability"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        let confidence = match svc.get("confidence") {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        };
        let reasoning = svc
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        candidates.push(RouteCandidate {
            capability: capability.to_owned(),
            confidence,
            reasoning,
        });
    }

    // Honor an explicit primary by moving it to the front before ranking.
    if let Some(primary) = obj.get("primary_service").and_then(Value::as_str) {
        if let Some(pos) = candidates.iter().position(|c| c.capability == primary) {
            let c = candidates.remove(pos);
            candidates.insert(0, c);
        }
    }

    Ok(Classification {
        candidates,
        requires_tools: obj.get("requires_tools").and_then(Value::as_bool),
    })
}
