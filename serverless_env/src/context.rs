//! Provisioning context and lifecycle traits.

use crate::dispatcher::Dispatcher;
use crate::registry::ServiceRegistry;
use std::sync::Arc;

/// Deterministic stream of seeds.
///
/// Every component that needs randomness draws its own seed from here
/// instead of touching ambient entropy, so a whole run is reproducible from
/// the master seed.
pub trait SeedSource: Send + Sync {
    /// Returns the next seed in the stream.
    fn next_seed(&self) -> u64;
}

/// What the surrounding simulation hands to a provisioning step.
///
/// # Implementations
///
/// - **Simulation**: `SimWorld` - virtual clock, ChaCha8 seeder, in-memory registry
///
/// The context is borrowed for the duration of [`ProvisioningStep::apply`];
/// a step keeps clones of the `Arc` handles it needs, never the context.
pub trait ProvisioningContext {
    /// The event dispatcher that owns the virtual clock.
    fn dispatcher(&self) -> Arc<dyn Dispatcher>;

    /// The seed stream, shared by every step applied to this context.
    fn seeder(&self) -> &dyn SeedSource;

    /// The registry where provisioned services are published.
    fn registry(&self) -> &dyn ServiceRegistry;
}

/// Resource released at the end of a simulation run.
///
/// `close` takes `self`, so a handle can only be closed once.
pub trait Teardown {
    fn close(self);
}

/// A one-shot setup operation applied to a [`ProvisioningContext`].
pub trait ProvisioningStep {
    /// Handle returned by `apply` that undoes the step.
    type Handle: Teardown;

    /// Error raised when the step cannot be applied.
    type Error: std::error::Error;

    /// Applies the step, consuming its configuration.
    fn apply(self, ctx: &dyn ProvisioningContext) -> Result<Self::Handle, Self::Error>;
}
