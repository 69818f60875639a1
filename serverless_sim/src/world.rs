//! SimWorld - The simulation harness container.

use crate::context::SimSeeder;
use crate::dispatcher::SimDispatcher;
use crate::registry::SimRegistry;

use serde::{Deserialize, Serialize};
use serverless_core::{FaasService, ServiceError};
use serverless_env::{
    Dispatcher, ProvisioningContext, RegistryExt, SeedSource, ServiceName, ServiceRegistry, SimTime,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Errors raised while driving the simulation.
#[derive(Debug, Error)]
pub enum WorldError {
    /// An event was addressed to a name with no registered service
    #[error("No service registered as '{0}'")]
    UnknownTarget(ServiceName),

    /// The target service failed to apply the event
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),
}

/// Configuration for a simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self { seed: 42 }
    }
}

/// The SimWorld - container for the entire simulation.
///
/// Owns the virtual clock, the seed stream and the registry, and is the
/// [`ProvisioningContext`] that provisioning steps are applied to. Events are
/// delivered one at a time: the world pops the earliest event, resolves its
/// target from the registry and hands it to [`FaasService::handle_event`].
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Event queue and virtual clock
    dispatcher: Arc<SimDispatcher>,

    /// Sub-seed stream
    seeder: SimSeeder,

    /// Provisioned services
    registry: SimRegistry,

    /// Events delivered so far
    delivered: u64,
}

impl SimWorld {
    /// Creates a new SimWorld with the given configuration.
    pub fn new(config: SimConfig) -> Self {
        let seeder = SimSeeder::new(config.seed);

        Self {
            config,
            dispatcher: SimDispatcher::shared(),
            seeder,
            registry: SimRegistry::new(),
            delivered: 0,
        }
    }

    /// The concrete dispatcher, for inspection.
    pub fn sim_dispatcher(&self) -> &Arc<SimDispatcher> {
        &self.dispatcher
    }

    /// The concrete registry, for inspection.
    pub fn sim_registry(&self) -> &SimRegistry {
        &self.registry
    }

    /// Current virtual time.
    pub fn now(&self) -> SimTime {
        self.dispatcher.now()
    }

    /// Returns the current simulation time in seconds.
    pub fn time(&self) -> f64 {
        self.now().as_secs_f64()
    }

    /// Number of events delivered so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Looks up a provisioned service by name.
    pub fn service(&self, name: &ServiceName) -> Option<Arc<FaasService>> {
        self.registry.resolve::<FaasService>(name.as_str())
    }

    /// Delivers the next pending event, if any.
    ///
    /// Returns `Ok(false)` once the queue is empty.
    pub fn step(&mut self) -> Result<bool, WorldError> {
        self.step_until(SimTime::MAX)
    }

    fn step_until(&mut self, until: SimTime) -> Result<bool, WorldError> {
        let Some((at, event)) = self.dispatcher.pop_until(until) else {
            return Ok(false);
        };

        let service = self
            .service(&event.target)
            .ok_or_else(|| WorldError::UnknownTarget(event.target.clone()))?;

        trace!("t={:?} delivering {:?} to {}", at, event.kind, event.target);
        service.handle_event(event.kind)?;
        self.delivered += 1;
        Ok(true)
    }

    /// Delivers every event due at or before `time`, then moves the clock to `time`.
    ///
    /// Returns the number of events delivered.
    pub fn run_until(&mut self, time: SimTime) -> Result<u64, WorldError> {
        let before = self.delivered;
        while self.step_until(time)? {}
        self.dispatcher.advance_to(time);
        Ok(self.delivered - before)
    }

    /// Delivers events until the queue is empty.
    pub fn run(&mut self) -> Result<u64, WorldError> {
        let before = self.delivered;
        while self.step()? {}
        Ok(self.delivered - before)
    }
}

impl ProvisioningContext for SimWorld {
    fn dispatcher(&self) -> Arc<dyn Dispatcher> {
        self.dispatcher.clone()
    }

    fn seeder(&self) -> &dyn SeedSource {
        &self.seeder
    }

    fn registry(&self) -> &dyn ServiceRegistry {
        &self.registry
    }
}

impl std::fmt::Debug for SimWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimWorld")
            .field("config", &self.config)
            .field("now", &self.now())
            .field("pending", &self.dispatcher.pending_count())
            .field("delivered", &self.delivered)
            .finish()
    }
}
