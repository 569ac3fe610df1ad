//! Deterministic keyword/pattern routing used when the classifier is
//! unavailable.  Compiling the table is the only fallible step and it
//! happens at config load; [`HeuristicTable::recommend`] cannot fail.

use regex::Regex;
use sy_domain::config::{HeuristicRule, RouterConfig};
use sy_domain::thread::{Recommendation, RouteCandidate};

struct CompiledRule {
    rule: HeuristicRule,
    keywords: Vec<String>,
    patterns: Vec<Regex>,
}

impl CompiledRule {
    fn matches(&self, lowered: &str) -> bool {
        self.keywords.iter().any(|k| lowered.contains(k.as_str()))
            || self.patterns.iter().any(|p| p.is_match(lowered))
    }
}

pub struct HeuristicTable {
    rules: Vec<CompiledRule>,
    default_capability: String,
    default_confidence: f64,
}

impl HeuristicTable {
    /// Build from router config. Patterns that fail to compile are logged
    /// and skipped (config validation reports them as errors).
    pub fn compile(config: &RouterConfig) -> Self {
        let rules = config
            .heuristics
            .iter()
            .map(|rule| CompiledRule {
                rule: rule.clone(),
                keywords: rule.keywords.iter().map(|k| k.to_lowercase()).collect(),
                patterns: rule
                    .patterns
                    .iter()
                    .filter_map(|p| match Regex::new(p) {
                        Ok(re) => Some(re),
                        Err(e) => {
                            tracing::warn!(rule = %rule.name, pattern = %p, error = %e, "skipping invalid heuristic pattern");
                            None
                        }
                    })
                    .collect(),
            })
            .collect();

        Self {
            rules,
            default_capability: config.default_capability.clone(),
            default_confidence: config.default_confidence.clamp(0.0, 1.0),
        }
    }

    /// Route `query` using only the table. `cause` explains why the
    /// classifier was bypassed and is folded into `reasoning`.
    ///
    /// Rules rejected by `usable` are skipped, so a query whose matching
    /// capability is missing or disabled falls through to later rules and
    /// finally to the default bucket.
    pub fn recommend(
        &self,
        query: &str,
        cause: &str,
        usable: impl Fn(&HeuristicRule) -> bool,
    ) -> Recommendation {
        let lowered = query.to_lowercase();

        let matched = self.rules.iter().filter(|r| r.matches(&lowered)).find(|r| {
            let ok = usable(&r.rule);
            if !ok {
                tracing::debug!(rule = %r.rule.name, capability = %r.rule.capability, "heuristic rule skipped, capability unavailable");
            }
            ok
        });

        let (capability, confidence, requires_tools, reasoning) =
            match matched {
                Some(r) => (
                    r.rule.capability.clone(),
                    r.rule.confidence.clamp(0.0, 1.0),
                    r.rule.requires_tools,
                    format!("fallback heuristic: matched '{}' rule ({cause})", r.rule.name),
                ),
                None => (
                    self.default_capability.clone(),
                    self.default_confidence,
                    false,
                    format!("fallback heuristic: no rule matched, using default conversational capability ({cause})"),
                ),
            };

        Recommendation {
            primary_capability: capability.clone(),
            confidence,
            reasoning: reasoning.clone(),
            requires_tools,
            candidates: vec![RouteCandidate {
                capability,
                confidence,
                reasoning,
            }],
            latency_ms: 0,
            fallback: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> HeuristicTable {
        HeuristicTable::compile(&RouterConfig::default())
    }

    fn any(_: &HeuristicRule) -> bool {
        true
    }

    #[test]
    fn arithmetic_maps_to_math_solver() {
        let rec = table().recommend("What is 25 * 17?", "no classifier", any);
        assert_eq!(rec.primary_capability, "math_solver");
        assert!((rec.confidence - 0.7).abs() < f64::EPSILON);
        assert!(rec.requires_tools);
        assert!(rec.fallback);
        assert!(rec.reasoning.contains("fallback"));
    }

    #[test]
    fn search_keywords_win_first() {
        let rec = table().recommend("Latest news on the weather", "x", any);
        assert_eq!(rec.primary_capability, "web_search");
        assert!((rec.confidence - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn urls_route_to_page_loader() {
        let rec = table().recommend("Summarize https://example.org/post", "x", any);
        assert_eq!(rec.primary_capability, "load_web_page");
        assert!((rec.confidence - 0.65).abs() < f64::EPSILON);
    }

    #[test]
    fn default_bucket_is_conversational() {
        let rec = table().recommend("Hello, how are you?", "x", any);
        assert_eq!(rec.primary_capability, "llm_service");
        assert!((rec.confidence - 0.5).abs() < f64::EPSILON);
        assert!(!rec.requires_tools);
        assert_eq!(rec.candidates.len(), 1);
    }

    #[test]
    fn same_query_same_answer() {
        let t = table();
        let a = t.recommend("solve x^2 = 4", "timeout", any);
        let b = t.recommend("solve x^2 = 4", "timeout", any);
        assert_eq!(a, b);
    }

    #[test]
    fn unusable_rule_falls_through_to_default() {
        let rec = table().recommend("What is the current date?", "x", |r| {
            r.capability != "web_search"
        });
        assert_eq!(rec.primary_capability, "llm_service");
        assert!(!rec.requires_tools);
        assert!(rec.reasoning.contains("no rule matched"));
    }

    #[test]
    fn unusable_rule_yields_to_later_match() {
        // "search" hits web_search first; the URL still reaches the page loader.
        let rec = table().recommend("search http://example.org", "x", |r| {
            r.capability != "web_search"
        });
        assert_eq!(rec.primary_capability, "load_web_page");
    }

    #[test]
    fn invalid_pattern_is_skipped() {
        let mut cfg = RouterConfig::default();
        cfg.heuristics[0].patterns.push("(".into());
        let rec = HeuristicTable::compile(&cfg).recommend("breaking news", "x", any);
        assert_eq!(rec.primary_capability, "web_search");
    }
}
