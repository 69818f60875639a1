//! Serverless Environment Abstraction Layer
//!
//! This crate defines the narrow interfaces between the simulated FaaS
//! platform and the simulation that hosts it:
//! - Time and events (`Dispatcher`)
//! - Randomness (`SeedSource`)
//! - Service discovery (`ServiceRegistry`)
//! - Setup and teardown (`ProvisioningContext`, `ProvisioningStep`, `Teardown`)
//!
//! By deriving all entropy from a single 64-bit seed and all time from the
//! dispatcher's virtual clock, any run becomes reproducible via its seed.
//!
//! # Example
//!
//! ```ignore
//! use serverless_env::{ProvisioningContext, ProvisioningStep, Teardown};
//!
//! fn run<S: ProvisioningStep>(ctx: &dyn ProvisioningContext, step: S) {
//!     let handle = step.apply(ctx).expect("provisioning failed");
//!     // ... drive the dispatcher ...
//!     handle.close();
//! }
//! ```

mod context;
mod dispatcher;
mod error;
mod registry;
mod types;

pub use context::{ProvisioningContext, ProvisioningStep, SeedSource, Teardown};
pub use dispatcher::Dispatcher;
pub use error::EnvError;
pub use registry::{AnyService, RegistryExt, ServiceRegistry};
pub use types::{
    EventId, EventKind, FunctionId, InstanceId, InvocationId, ServiceName, SimEvent, SimTime,
};
