use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use sy_domain::thread::Recommendation;

const SNIPPET_CHARS: usize = 80;

/// One routed query, as shown to operators.
#[derive(Debug, Clone, Serialize)]
pub struct RouteDecision {
    pub timestamp: DateTime<Utc>,
    pub thread_id: Option<String>,
    pub query_snippet: String,
    pub primary_capability: String,
    pub confidence: f64,
    pub requires_tools: bool,
    pub fallback: bool,
    pub latency_ms: u64,
    pub reasoning: String,
}

impl RouteDecision {
    pub fn from_recommendation(thread_id: Option<&str>, query: &str, rec: &Recommendation) -> Self {
        Self {
            timestamp: Utc::now(),
            thread_id: thread_id.map(str::to_owned),
            query_snippet: query.chars().take(SNIPPET_CHARS).collect(),
            primary_capability: rec.primary_capability.clone(),
            confidence: rec.confidence,
            requires_tools: rec.requires_tools,
            fallback: rec.fallback,
            latency_ms: rec.latency_ms,
            reasoning: rec.reasoning.clone(),
        }
    }
}

/// Bounded ring buffer of recent routing decisions.
///
/// The oldest entry is evicted once `capacity` is reached.
pub struct DecisionLog {
    inner: Mutex<VecDeque<RouteDecision>>,
    capacity: usize,
}

impl DecisionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn record(&self, decision: RouteDecision) {
        if self.capacity == 0 {
            return;
        }
        let mut buf = self.inner.lock();
        while buf.len() >= self.capacity {
            buf.pop_front();
        }
        buf.push_back(decision);
    }

    /// The `limit` most recent decisions, newest first.
    pub fn recent(&self, limit: usize) -> Vec<RouteDecision> {
        let buf = self.inner.lock();
        buf.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
