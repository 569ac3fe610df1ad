pub mod engine;
pub mod idempotency;
pub mod orchestrator;
pub mod quota;
pub mod recovery;
pub mod retry;
pub mod thread_lock;

pub use engine::{ExecutionEngine, TurnOutcome, TurnRejected, TurnRequest, TurnStatus};
pub use orchestrator::{CapabilityHealth, Orchestrator, ThreadStatusView};
pub use quota::{InMemoryUsageLedger, QuotaDecision, QuotaGate, UsageLedger};
pub use recovery::{spawn_recovery_loop, RecoveryManager, RecoveryReport};
