//! Synthetic invocation workloads.
//!
//! Each function gets an independent Poisson arrival process, exponential
//! execution times, and a memory size drawn from a tier list. All draws come
//! from one ChaCha8 stream, so a workload is fully determined by its seed.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp};
use serde::{Deserialize, Serialize};
use serverless_env::SimTime;
use std::time::Duration;
use thiserror::Error;

/// Shortest execution time a generated invocation can have.
const MIN_WORK: Duration = Duration::from_millis(1);

/// Errors raised for unusable workload configurations.
#[derive(Debug, Error, PartialEq)]
pub enum WorkloadError {
    #[error("Workload needs at least one function")]
    NoFunctions,

    #[error("Arrival rate must be positive and finite, got {0}")]
    InvalidRate(f64),

    #[error("Mean execution time must be positive and finite, got {0} ms")]
    InvalidExecutionTime(f64),

    #[error("Workload needs at least one memory tier")]
    NoMemoryTiers,

    #[error("Duration must be positive and finite, got {0} s")]
    InvalidDuration(f64),
}

/// Shape of a synthetic workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Number of distinct functions
    pub functions: usize,

    /// Mean invocations per second, per function
    pub arrival_rate_per_sec: f64,

    /// Mean execution time of one invocation
    pub mean_execution_ms: f64,

    /// Memory sizes functions are drawn from
    pub memory_tiers_mb: Vec<u64>,

    /// Arrivals are generated in `[0, duration_secs)`
    pub duration_secs: f64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            functions: 4,
            arrival_rate_per_sec: 0.5,
            mean_execution_ms: 200.0,
            memory_tiers_mb: vec![128, 256, 512, 1024, 2048],
            duration_secs: 60.0,
        }
    }
}

impl WorkloadConfig {
    pub fn validate(&self) -> Result<(), WorkloadError> {
        if self.functions == 0 {
            return Err(WorkloadError::NoFunctions);
        }
        if !(self.arrival_rate_per_sec.is_finite() && self.arrival_rate_per_sec > 0.0) {
            return Err(WorkloadError::InvalidRate(self.arrival_rate_per_sec));
        }
        if !(self.mean_execution_ms.is_finite() && self.mean_execution_ms > 0.0) {
            return Err(WorkloadError::InvalidExecutionTime(self.mean_execution_ms));
        }
        if self.memory_tiers_mb.is_empty() {
            return Err(WorkloadError::NoMemoryTiers);
        }
        if !(self.duration_secs.is_finite() && self.duration_secs > 0.0) {
            return Err(WorkloadError::InvalidDuration(self.duration_secs));
        }
        Ok(())
    }
}

/// A function of the workload, before it is registered with a service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkloadFunction {
    pub name: String,
    pub memory_mb: u64,
}

/// One invocation to submit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InvocationRequest {
    /// Submission time
    pub at: SimTime,

    /// Index into [`Workload::functions`]
    pub function: usize,

    /// Execution time once started
    pub work: Duration,
}

/// A generated workload, with requests sorted by submission time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Workload {
    pub functions: Vec<WorkloadFunction>,
    pub requests: Vec<InvocationRequest>,
}

impl Workload {
    /// Number of requests for one function.
    pub fn requests_for(&self, function: usize) -> usize {
        self.requests.iter().filter(|r| r.function == function).count()
    }
}

/// Deterministic workload generator.
pub struct WorkloadGenerator {
    config: WorkloadConfig,
    arrivals: Exp<f64>,
    execution: Exp<f64>,
    rng: ChaCha8Rng,
}

impl WorkloadGenerator {
    /// Creates a generator for `config` seeded with `seed`.
    pub fn new(config: WorkloadConfig, seed: u64) -> Result<Self, WorkloadError> {
        config.validate()?;

        // Rates were validated above, so construction cannot fail
        let arrivals = Exp::new(config.arrival_rate_per_sec)
            .map_err(|_| WorkloadError::InvalidRate(config.arrival_rate_per_sec))?;
        let execution = Exp::new(1.0 / config.mean_execution_ms)
            .map_err(|_| WorkloadError::InvalidExecutionTime(config.mean_execution_ms))?;

        Ok(Self {
            config,
            arrivals,
            execution,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    pub fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    /// Generates the next workload from the stream.
    pub fn generate(&mut self) -> Workload {
        let mut workload = Workload::default();

        for index in 0..self.config.functions {
            let tier = self.rng.gen_range(0..self.config.memory_tiers_mb.len());
            workload.functions.push(WorkloadFunction {
                name: format!("fn-{index}"),
                memory_mb: self.config.memory_tiers_mb[tier],
            });

            let mut t = 0.0;
            loop {
                t += self.arrivals.sample(&mut self.rng);
                if t >= self.config.duration_secs {
                    break;
                }
                let Ok(at) = Duration::try_from_secs_f64(t) else {
                    break;
                };

                let work_ms: f64 = self.execution.sample(&mut self.rng);
                let work = Duration::try_from_secs_f64(work_ms / 1000.0)
                    .unwrap_or(MIN_WORK)
                    .max(MIN_WORK);

                workload.requests.push(InvocationRequest {
                    at,
                    function: index,
                    work,
                });
            }
        }

        workload.requests.sort_by_key(|request| (request.at, request.function));
        workload
    }
}

impl std::fmt::Debug for WorkloadGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadGenerator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_same_seed_same_workload() {
        let a = WorkloadGenerator::new(WorkloadConfig::default(), 42).unwrap().generate();
        let b = WorkloadGenerator::new(WorkloadConfig::default(), 42).unwrap().generate();
        let c = WorkloadGenerator::new(WorkloadConfig::default(), 43).unwrap().generate();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_requests_sorted_and_bounded() {
        let config = WorkloadConfig {
            duration_secs: 30.0,
            ..Default::default()
        };
        let workload = WorkloadGenerator::new(config.clone(), 7).unwrap().generate();

        assert_eq!(workload.functions.len(), config.functions);
        assert!(workload.requests.windows(2).all(|w| w[0].at <= w[1].at));
        assert!(workload
            .requests
            .iter()
            .all(|r| r.at < Duration::from_secs(30) && r.work >= MIN_WORK));
        assert!(workload
            .functions
            .iter()
            .all(|f| config.memory_tiers_mb.contains(&f.memory_mb)));
    }

    #[test]
    fn test_arrival_rate_roughly_matches() {
        let config = WorkloadConfig {
            functions: 1,
            arrival_rate_per_sec: 2.0,
            duration_secs: 1000.0,
            ..Default::default()
        };
        let workload = WorkloadGenerator::new(config, 1).unwrap().generate();

        // Expect ~2000 arrivals; Poisson std-dev is ~45
        let count = workload.requests_for(0);
        assert!((1800..2200).contains(&count), "got {count} arrivals");
    }

    #[test]
    fn test_invalid_configs() {
        let bad = |config: WorkloadConfig| WorkloadGenerator::new(config, 0).err();

        assert_eq!(
            bad(WorkloadConfig { functions: 0, ..Default::default() }),
            Some(WorkloadError::NoFunctions)
        );
        assert_eq!(
            bad(WorkloadConfig { arrival_rate_per_sec: 0.0, ..Default::default() }),
            Some(WorkloadError::InvalidRate(0.0))
        );
        assert_eq!(
            bad(WorkloadConfig { memory_tiers_mb: vec![], ..Default::default() }),
            Some(WorkloadError::NoMemoryTiers)
        );
        assert!(matches!(
            bad(WorkloadConfig { mean_execution_ms: f64::NAN, ..Default::default() }),
            Some(WorkloadError::InvalidExecutionTime(_))
        ));
        assert!(matches!(
            bad(WorkloadConfig { duration_secs: -1.0, ..Default::default() }),
            Some(WorkloadError::InvalidDuration(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_requests_within_duration(seed in any::<u64>(), duration in 1.0f64..120.0) {
            let config = WorkloadConfig { duration_secs: duration, ..Default::default() };
            let workload = WorkloadGenerator::new(config, seed).unwrap().generate();

            for request in &workload.requests {
                prop_assert!(request.at.as_secs_f64() < duration);
                prop_assert!(request.function < workload.functions.len());
            }
        }
    }
}
