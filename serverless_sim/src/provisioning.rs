//! Provisioning step that installs a simulated FaaS platform into a world.
//!
//! ```text
//! FaasProvisioningStep::apply(ctx)
//!   ├─ validate machine profile and delay model
//!   ├─ reject a name that is already registered
//!   ├─ delay injector (seeded from ctx.seeder() when a model is configured)
//!   ├─ SimFunctionDeployer(ctx.dispatcher(), machine, injector)
//!   ├─ routing.build(ctx), termination.build(ctx)
//!   ├─ FaasService::new(...)
//!   └─ ctx.registry().register(name, service) ──► FaasServiceHandle
//! ```

use serverless_core::{
    DelayInjector, DelayModel, FaasService, MachineError, MachineProfile, ModelError,
    RoutingPolicyFactory, SimFunctionDeployer, StochasticDelayInjector, TerminationPolicyFactory,
    ZeroDelayInjector,
};
use serverless_env::{
    EnvError, ProvisioningContext, ProvisioningStep, RegistryExt, ServiceName, Teardown,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while provisioning a FaaS service.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The machine profile cannot host anything
    #[error("Invalid machine profile: {0}")]
    InvalidMachine(#[from] MachineError),

    /// The cold-start model is malformed
    #[error("Invalid delay model: {0}")]
    InvalidDelayModel(#[from] ModelError),

    /// The builder was finished without a required policy factory
    #[error("Missing {0} policy factory")]
    MissingFactory(&'static str),

    /// The service name is already taken in the registry
    #[error("Registration failed: {0}")]
    Registration(#[from] EnvError),
}

/// Installs one [`FaasService`] into a [`ProvisioningContext`].
pub struct FaasProvisioningStep {
    service_domain: ServiceName,
    machine: MachineProfile,
    routing: Box<dyn RoutingPolicyFactory>,
    termination: Box<dyn TerminationPolicyFactory>,
    cold_start: Option<Arc<dyn DelayModel>>,
}

impl FaasProvisioningStep {
    /// Creates a step from all of its parts.
    ///
    /// Without a cold-start model, instances become ready at their request time.
    pub fn new(
        service_domain: impl Into<ServiceName>,
        machine: MachineProfile,
        routing: impl RoutingPolicyFactory + 'static,
        termination: impl TerminationPolicyFactory + 'static,
        cold_start: Option<Arc<dyn DelayModel>>,
    ) -> Self {
        Self {
            service_domain: service_domain.into(),
            machine,
            routing: Box::new(routing),
            termination: Box::new(termination),
            cold_start,
        }
    }

    /// Starts building a step for `service_domain` on `machine`.
    pub fn builder(service_domain: impl Into<ServiceName>, machine: MachineProfile) -> FaasProvisioningStepBuilder {
        FaasProvisioningStepBuilder {
            service_domain: service_domain.into(),
            machine,
            routing: None,
            termination: None,
            cold_start: None,
        }
    }

    /// Name the service will be registered under.
    pub fn service_domain(&self) -> &ServiceName {
        &self.service_domain
    }
}

impl std::fmt::Debug for FaasProvisioningStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaasProvisioningStep")
            .field("service_domain", &self.service_domain)
            .field("machine", &self.machine)
            .field("cold_start", &self.cold_start)
            .finish_non_exhaustive()
    }
}

/// Builder for [`FaasProvisioningStep`].
pub struct FaasProvisioningStepBuilder {
    service_domain: ServiceName,
    machine: MachineProfile,
    routing: Option<Box<dyn RoutingPolicyFactory>>,
    termination: Option<Box<dyn TerminationPolicyFactory>>,
    cold_start: Option<Arc<dyn DelayModel>>,
}

impl FaasProvisioningStepBuilder {
    /// Sets the routing policy factory.
    pub fn routing(mut self, factory: impl RoutingPolicyFactory + 'static) -> Self {
        self.routing = Some(Box::new(factory));
        self
    }

    /// Sets the termination policy factory.
    pub fn termination(mut self, factory: impl TerminationPolicyFactory + 'static) -> Self {
        self.termination = Some(Box::new(factory));
        self
    }

    /// Sets the cold-start delay model.
    pub fn cold_start(mut self, model: impl DelayModel + 'static) -> Self {
        self.cold_start = Some(Arc::new(model));
        self
    }

    pub fn build(self) -> Result<FaasProvisioningStep, ProvisionError> {
        Ok(FaasProvisioningStep {
            routing: self.routing.ok_or(ProvisionError::MissingFactory("routing"))?,
            termination: self.termination.ok_or(ProvisionError::MissingFactory("termination"))?,
            service_domain: self.service_domain,
            machine: self.machine,
            cold_start: self.cold_start,
        })
    }
}

impl ProvisioningStep for FaasProvisioningStep {
    type Handle = FaasServiceHandle;
    type Error = ProvisionError;

    fn apply(self, ctx: &dyn ProvisioningContext) -> Result<FaasServiceHandle, ProvisionError> {
        self.machine.validate()?;
        if let Some(model) = &self.cold_start {
            model.validate()?;
        }
        // Fail before the seed stream or any factory is touched
        if ctx.registry().contains(self.service_domain.as_str()) {
            return Err(EnvError::already_registered(&self.service_domain).into());
        }

        // The seed stream is only consumed when there is something to sample
        let injector = match self.cold_start {
            Some(model) => {
                let seed = ctx.seeder().next_seed();
                debug!("Cold-start model {:?} seeded with {}", model, seed);
                DelayInjector::Stochastic(StochasticDelayInjector::new(model, seed))
            }
            None => DelayInjector::Zero(ZeroDelayInjector),
        };
        let cold_starts = !injector.is_zero();

        let dispatcher = ctx.dispatcher();
        let deployer = SimFunctionDeployer::new(dispatcher.clone(), self.machine.clone(), injector);
        let routing = self.routing.build(ctx);
        let termination = self.termination.build(ctx);

        let service = Arc::new(FaasService::new(
            self.service_domain.clone(),
            dispatcher,
            deployer,
            routing,
            termination,
        ));
        ctx.registry()
            .register(self.service_domain.as_str(), service.clone())?;

        info!(
            "Provisioned FaaS service {} on {} ({} CPUs @ {} MHz, {} MB), cold starts {}",
            self.service_domain,
            self.machine.name,
            self.machine.cpu_count,
            self.machine.cpu_frequency_mhz,
            self.machine.memory_mb,
            if cold_starts { "enabled" } else { "disabled" }
        );

        Ok(FaasServiceHandle {
            service,
            closed: false,
        })
    }
}

/// Disposal handle for a provisioned [`FaasService`].
///
/// Closing the handle shuts the service down and cancels every event it
/// still has pending. Dropping an unclosed handle does the same.
pub struct FaasServiceHandle {
    service: Arc<FaasService>,
    closed: bool,
}

impl FaasServiceHandle {
    pub fn service(&self) -> &Arc<FaasService> {
        &self.service
    }

    pub fn name(&self) -> &ServiceName {
        self.service.name()
    }
}

impl Teardown for FaasServiceHandle {
    fn close(mut self) {
        self.closed = true;
        self.service.close();
    }
}

impl Drop for FaasServiceHandle {
    fn drop(&mut self) {
        if !self.closed && !self.service.is_closed() {
            debug!("Handle for {} dropped without close", self.service.name());
            self.service.close();
        }
    }
}

impl std::fmt::Debug for FaasServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaasServiceHandle")
            .field("service", self.service.name())
            .field("closed", &self.closed)
            .finish()
    }
}
