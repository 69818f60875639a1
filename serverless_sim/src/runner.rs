//! Scenario runner - replays synthetic workloads against a provisioned service.

use crate::provisioning::{FaasProvisioningStep, ProvisionError};
use crate::scenarios::ScenarioId;
use crate::workload::{WorkloadConfig, WorkloadError, WorkloadGenerator};
use crate::world::{SimConfig, SimWorld, WorldError};

use serde::{Deserialize, Serialize};
use serverless_core::{MachineProfile, RoutingPolicyKind, ServiceError, ServiceStats};
use serverless_env::{FunctionId, ProvisioningContext, ProvisioningStep, Teardown};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Name the runner registers its service under.
pub const SERVICE_NAME: &str = "faas";

/// Errors that abort a scenario run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Workload error: {0}")]
    Workload(#[from] WorkloadError),

    #[error("Provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Simulation error: {0}")]
    World(#[from] WorldError),

    #[error("Invocation rejected: {0}")]
    Service(#[from] ServiceError),
}

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Virtual time when the last event was delivered, in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    pub invocations: u64,
    pub completed: u64,
    pub cold_starts: u64,
    pub warm_starts: u64,
    pub cold_start_ratio: f64,
    pub mean_cold_start_ms: f64,
    pub max_cold_start_ms: f64,
    pub instances_deployed: u64,
    pub instances_reclaimed: u64,
    pub peak_instances: usize,

    /// Events the world delivered to the service
    pub events_delivered: u64,
}

impl ScenarioMetrics {
    fn from_stats(stats: &ServiceStats, events_delivered: u64) -> Self {
        Self {
            invocations: stats.invocations,
            completed: stats.completed,
            cold_starts: stats.cold_starts,
            warm_starts: stats.warm_starts,
            cold_start_ratio: stats.cold_start_ratio(),
            mean_cold_start_ms: stats.mean_cold_start().as_secs_f64() * 1000.0,
            max_cold_start_ms: stats.max_cold_start.as_secs_f64() * 1000.0,
            instances_deployed: stats.instances_deployed,
            instances_reclaimed: stats.instances_reclaimed,
            peak_instances: stats.peak_instances,
            events_delivered,
        }
    }
}

/// Configuration shared by every scenario a runner executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Master seed
    pub seed: u64,

    /// Routing policy of the provisioned service
    pub routing: RoutingPolicyKind,

    /// Host the service runs on
    pub machine: MachineProfile,

    /// Base workload, adjusted per scenario
    pub workload: WorkloadConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            routing: RoutingPolicyKind::default(),
            machine: MachineProfile::default(),
            workload: WorkloadConfig::default(),
        }
    }
}

/// Runs cold-start scenarios.
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    config: RunnerConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            config: RunnerConfig {
                seed,
                ..Default::default()
            },
        }
    }

    pub fn from_config(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Sets the number of functions in the workload.
    pub fn with_functions(mut self, functions: usize) -> Self {
        self.config.workload.functions = functions;
        self
    }

    /// Sets the arrival window in seconds.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.config.workload.duration_secs = secs;
        self
    }

    pub fn with_routing(mut self, routing: RoutingPolicyKind) -> Self {
        self.config.routing = routing;
        self
    }

    pub fn with_machine(mut self, machine: MachineProfile) -> Self {
        self.config.machine = machine;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Runs a scenario and returns the result.
    ///
    /// Setup errors are reported as a failed result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        match self.try_run(scenario) {
            Ok(result) => result,
            Err(e) => {
                warn!("Scenario {} aborted: {}", scenario.name(), e);
                ScenarioResult {
                    scenario,
                    seed: self.config.seed,
                    passed: false,
                    final_time_secs: 0.0,
                    failure_reason: Some(e.to_string()),
                    metrics: ScenarioMetrics::default(),
                }
            }
        }
    }

    /// Runs a scenario, propagating setup and simulation errors.
    pub fn try_run(&self, scenario: ScenarioId) -> Result<ScenarioResult, RunError> {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.config.seed);
        debug!("  {}", scenario.description());

        let mut world = SimWorld::new(SimConfig {
            seed: self.config.seed,
        });

        let mut builder = FaasProvisioningStep::builder(SERVICE_NAME, self.config.machine.clone())
            .routing(self.config.routing)
            .termination(scenario.termination());
        if let Some(model) = scenario.cold_start() {
            builder = builder.cold_start(model);
        }
        let handle = builder.build()?.apply(&world)?;
        let service = handle.service().clone();

        // Drawn after provisioning so the workload never shifts the service's seeds
        let workload_seed = world.seeder().next_seed();
        let workload = WorkloadGenerator::new(scenario.workload(self.config.workload.clone()), workload_seed)?
            .generate();

        let functions: Vec<FunctionId> = workload
            .functions
            .iter()
            .map(|f| service.register_function(f.name.as_str(), f.memory_mb))
            .collect();
        info!(
            "Replaying {} invocations over {} functions",
            workload.requests.len(),
            functions.len()
        );

        for request in &workload.requests {
            world.run_until(request.at)?;
            service.invoke(functions[request.function], request.work)?;
        }
        world.run()?;

        let final_time_secs = world.time();
        let stats = service.stats();
        let metrics = ScenarioMetrics::from_stats(&stats, world.delivered());

        handle.close();

        let mut failures = Vec::new();
        if stats.completed != stats.invocations {
            failures.push(format!(
                "{} of {} invocations completed",
                stats.completed, stats.invocations
            ));
        }
        let leftover = world.sim_dispatcher().pending_for(service.name()).len();
        if leftover > 0 {
            failures.push(format!("{} events still pending after close", leftover));
        }
        let live = service.with_deployer(|deployer| deployer.live_instances());
        if live > 0 {
            failures.push(format!("{} instances still live after close", live));
        }
        if scenario.cold_start().is_none() && stats.max_cold_start > Duration::ZERO {
            failures.push(format!(
                "zero-delay scenario charged a {:?} cold start",
                stats.max_cold_start
            ));
        }

        let passed = failures.is_empty();
        info!(
            "Scenario {} done at t={:.1}s: {} invocations, {} cold starts ({:.1}%), mean {:.1} ms",
            scenario.name(),
            final_time_secs,
            metrics.invocations,
            metrics.cold_starts,
            metrics.cold_start_ratio * 100.0,
            metrics.mean_cold_start_ms
        );

        Ok(ScenarioResult {
            scenario,
            seed: self.config.seed,
            passed,
            final_time_secs,
            failure_reason: (!passed).then(|| failures.join("; ")),
            metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(seed: u64) -> ScenarioRunner {
        ScenarioRunner::new(seed).with_duration(30.0)
    }

    #[test]
    fn test_all_scenarios_pass() {
        for scenario in ScenarioId::all() {
            let result = runner(42).run(scenario);
            assert!(result.passed, "{} failed: {:?}", scenario, result.failure_reason);
            assert!(result.metrics.invocations > 0);
        }
    }

    #[test]
    fn test_lambda_deterministic() {
        let a = runner(12345).run(ScenarioId::Lambda);
        let b = runner(12345).run(ScenarioId::Lambda);

        assert_eq!(a.metrics, b.metrics);
        assert_eq!(a.final_time_secs, b.final_time_secs);
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = runner(1).run(ScenarioId::Lambda);
        let b = runner(2).run(ScenarioId::Lambda);

        assert_ne!(a.metrics, b.metrics);
    }

    #[test]
    fn test_zero_delay_charges_nothing() {
        let result = runner(7).run(ScenarioId::ZeroDelay);

        assert!(result.passed);
        assert_eq!(result.metrics.max_cold_start_ms, 0.0);
        assert_eq!(result.metrics.mean_cold_start_ms, 0.0);
    }

    #[test]
    fn test_first_invocation_of_each_function_is_cold() {
        let result = runner(3).with_functions(3).run(ScenarioId::Google);

        assert!(result.metrics.cold_starts >= 3);
        assert!(result.metrics.mean_cold_start_ms > 0.0);
        assert!(result.metrics.cold_starts + result.metrics.warm_starts == result.metrics.invocations);
    }

    #[test]
    fn test_bursty_reclaims_everything_before_close() {
        let result = runner(5).run(ScenarioId::Bursty);

        assert!(result.passed);
        assert_eq!(result.metrics.instances_reclaimed, result.metrics.instances_deployed);
    }

    #[test]
    fn test_random_routing() {
        let result = runner(9)
            .with_routing(RoutingPolicyKind::Random)
            .run(ScenarioId::Azure);

        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[test]
    fn test_setup_error_reported_as_failure() {
        let result = runner(1).with_functions(0).run(ScenarioId::Lambda);

        assert!(!result.passed);
        assert!(result
            .failure_reason
            .as_deref()
            .is_some_and(|reason| reason.contains("at least one function")));

        let tiny = MachineProfile::new("tiny", 1, 1000.0, 64);
        let result = runner(1).with_machine(tiny).run(ScenarioId::Lambda);
        assert!(!result.passed);
    }
}
