//! Serverless Core - simulated Function-as-a-Service platform
//!
//! This library models the moving parts of a FaaS platform inside a
//! discrete-event simulation:
//! 1. **Cold starts**: delay models and the injectors that sample them
//! 2. **Instances**: a deployer that creates, reuses and reclaims function instances
//! 3. **Policies**: pluggable routing and termination strategies
//! 4. **Service**: the platform that ties them together and reacts to dispatcher events

pub mod delay;
pub mod delay_model;
pub mod deployer;
pub mod function;
pub mod machine;
pub mod routing;
pub mod service;
pub mod termination;

#[cfg(test)]
mod testing;

// Re-export key types for convenience
pub use delay::{DelayInjector, DelayStats, StochasticDelayInjector, ZeroDelayInjector};
pub use delay_model::{ColdStartModel, DelayModel, ModelError};
pub use deployer::{DeployError, Deployment, SimFunctionDeployer};
pub use function::{FunctionSpec, InstanceState, InstanceView, PendingInvocation};
pub use machine::{MachineError, MachineProfile};
pub use routing::{RoutingPolicy, RoutingPolicyFactory, RoutingPolicyKind};
pub use service::{FaasService, ServiceError, ServiceStats};
pub use termination::{TerminationPolicy, TerminationPolicyFactory, TerminationPolicyKind};
