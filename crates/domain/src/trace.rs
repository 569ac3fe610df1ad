use serde::Serialize;

/// Structured trace events emitted across all Switchyard crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    TurnStarted {
        thread_id: String,
        org_id: String,
        turn: u32,
        resumed: bool,
    },
    RouteDecided {
        thread_id: String,
        capability: String,
        confidence: f64,
        fallback: bool,
        latency_ms: u64,
    },
    CapabilityInvoked {
        thread_id: String,
        capability: String,
        attempt: u32,
        duration_ms: u64,
        ok: bool,
        cached: bool,
    },
    CapabilityRetry {
        thread_id: String,
        capability: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    BreakerTransition {
        capability: String,
        from: String,
        to: String,
        failure_count: u32,
    },
    CheckpointWritten {
        thread_id: String,
        status: String,
        step: String,
    },
    ThreadCompleted {
        thread_id: String,
        turn: u32,
        run_units: f64,
    },
    ThreadFailed {
        thread_id: String,
        turn: u32,
        reason: String,
        permanent: bool,
    },
    QuotaDenied {
        org_id: String,
        used: f64,
        limit: f64,
    },
    RecoveryScan {
        scanned: usize,
        recovered: usize,
        still_incomplete: usize,
        skipped_busy: usize,
        marked_corrupt: usize,
        marked_exhausted: usize,
    },
    ConfigReloaded {
        path: String,
        warnings: usize,
    },
    LedgerWriteFailed {
        org_id: String,
        run_units: f64,
        error: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "sy_event");
    }
}
