pub mod breaker;
pub mod builtin;
pub mod decisions;
pub mod heuristic;
pub mod openai_compat;
pub mod registry;
pub mod router;
pub mod traits;

// Re-exports for convenience.
pub use breaker::{BreakerSnapshot, BreakerState, CircuitBreakers};
pub use decisions::{DecisionLog, RouteDecision};
pub use registry::{CapabilityInfo, CapabilityRegistry, RegistryError};
pub use router::Router;
pub use traits::{from_fn, Capability};
