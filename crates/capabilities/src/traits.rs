use std::future::Future;
use std::sync::Arc;

use sy_domain::capability::{CapabilityResult, Invocation};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core capability trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Uniform invocable interface shared by model tiers and tools.
///
/// Implementations must be safe to call again with the same
/// `idempotency_key`; the engine's replay cache prevents most duplicate
/// calls but not a crash between invocation and checkpoint.
#[async_trait::async_trait]
pub trait Capability: Send + Sync {
    async fn invoke(&self, invocation: Invocation) -> CapabilityResult;
}

/// Adapter turning an async closure into a capability.
pub struct FnCapability<F> {
    f: F,
}

#[async_trait::async_trait]
impl<F, Fut> Capability for FnCapability<F>
where
    F: Fn(Invocation) -> Fut + Send + Sync,
    Fut: Future<Output = CapabilityResult> + Send,
{
    async fn invoke(&self, invocation: Invocation) -> CapabilityResult {
        (self.f)(invocation).await
    }
}

/// Wrap an async closure as an `Arc<dyn Capability>`.
pub fn from_fn<F, Fut>(f: F) -> Arc<dyn Capability>
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CapabilityResult> + Send + 'static,
{
    Arc::new(FnCapability { f })
}
