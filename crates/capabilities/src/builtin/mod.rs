//! Capabilities that ship with the orchestrator and need no backend.

mod math;
mod template;

pub use math::{evaluate, MathSolver};
pub use template::TemplateSynthesizer;

use std::sync::Arc;

use sy_domain::capability::CapabilityKind;

use crate::registry::CapabilityRegistry;

pub const MATH_SOLVER: &str = "math_solver";
pub const TEMPLATE_SYNTHESIZER: &str = "template_synthesizer";

/// Register every built-in capability.
pub fn register_builtins(registry: &CapabilityRegistry) {
    registry.register(MATH_SOLVER, CapabilityKind::Tool, Arc::new(MathSolver));
    registry.register(
        TEMPLATE_SYNTHESIZER,
        CapabilityKind::ModelTier,
        Arc::new(TemplateSynthesizer),
    );
}
