//! Serverless Deterministic Simulation Harness
//!
//! This crate hosts the simulated FaaS platform from `serverless_core` in a
//! single-threaded discrete-event world:
//! - **Time**: a virtual clock that only advances when an event is delivered
//! - **Randomness**: all entropy derived from a single 64-bit seed
//! - **Discovery**: an in-memory registry the world resolves event targets from
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                         SimWorld                          │
//! │  ┌───────────────┐  ┌────────────┐  ┌──────────────────┐  │
//! │  │ SimDispatcher │  │ SimSeeder  │  │   SimRegistry    │  │
//! │  │ (clock+queue) │  │ (ChaCha8)  │  │ name → service   │  │
//! │  └───────┬───────┘  └─────┬──────┘  └────────┬─────────┘  │
//! │          │ pop            │ next_seed        │ resolve    │
//! │          ▼                ▼                  ▼            │
//! │   FaasProvisioningStep::apply ──► FaasService ◄── events  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use serverless_core::{ColdStartModel, MachineProfile, RoutingPolicyKind, TerminationPolicyKind};
//! use serverless_env::{ProvisioningStep, Teardown};
//! use serverless_sim::{FaasProvisioningStep, SimConfig, SimWorld};
//!
//! let mut world = SimWorld::new(SimConfig { seed: 42 });
//! let handle = FaasProvisioningStep::builder("faas", MachineProfile::default())
//!     .routing(RoutingPolicyKind::FirstIdle)
//!     .termination(TerminationPolicyKind::default())
//!     .cold_start(ColdStartModel::Lambda)
//!     .build()?
//!     .apply(&world)?;
//!
//! let f = handle.service().register_function("thumbnail", 512);
//! handle.service().invoke(f, std::time::Duration::from_millis(200))?;
//! world.run()?;
//! handle.close();
//! ```

mod context;
mod dispatcher;
mod provisioning;
mod registry;
mod runner;
pub mod scenarios;
pub mod workload;
mod world;

pub use context::SimSeeder;
pub use dispatcher::SimDispatcher;
pub use provisioning::{FaasProvisioningStep, FaasProvisioningStepBuilder, FaasServiceHandle, ProvisionError};
pub use registry::SimRegistry;
pub use runner::{RunError, RunnerConfig, ScenarioMetrics, ScenarioResult, ScenarioRunner, SERVICE_NAME};
pub use world::{SimConfig, SimWorld, WorldError};
