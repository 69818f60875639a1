//! Cold-start delay injection.
//!
//! Turns a [`DelayModel`] plus a seeded RNG into the concrete delay an
//! instance pays when it is created. Two variants:
//! - [`ZeroDelayInjector`]: always zero; used when no model is configured
//! - [`StochasticDelayInjector`]: samples the model with an exclusively owned RNG
//!
//! Whatever the model returns, the injector only ever hands out a
//! non-negative, finite [`Duration`]. Scheduling an event in the past would
//! corrupt the simulation clock.

use crate::delay_model::DelayModel;
use crate::function::FunctionSpec;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use serverless_env::InstanceId;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Running statistics over the delays an injector produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DelayStats {
    /// Number of delays handed out
    pub samples: u64,

    /// Samples that were negative, NaN or unrepresentable and clamped to zero
    pub clamped: u64,

    /// Sum of all delays
    pub total: Duration,

    /// Largest delay
    pub max: Duration,
}

impl DelayStats {
    fn record(&mut self, delay: Duration) {
        self.samples += 1;
        self.total = self.total.saturating_add(delay);
        self.max = self.max.max(delay);
    }

    /// Mean delay, or zero if nothing was sampled.
    pub fn mean(&self) -> Duration {
        mean_duration(self.total, self.samples)
    }
}

/// Mean of `count` durations summing to `total`.
///
/// Saturates at [`Duration::MAX`] once `total` has.
pub(crate) fn mean_duration(total: Duration, count: u64) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(total.as_secs_f64() / count as f64).unwrap_or(Duration::MAX)
}

/// Injector used when no cold-start model is configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZeroDelayInjector;

impl ZeroDelayInjector {
    pub fn delay(&self, _instance: InstanceId, _function: &FunctionSpec) -> Duration {
        Duration::ZERO
    }
}

/// Injector drawing cold-start delays from a [`DelayModel`].
///
/// The RNG is owned, never shared: two injectors built from the same seed
/// produce the same sequence no matter what else runs in the simulation.
#[derive(Debug)]
pub struct StochasticDelayInjector {
    model: Arc<dyn DelayModel>,
    rng: ChaCha8Rng,
    seed: u64,
    stats: DelayStats,
}

impl StochasticDelayInjector {
    /// Creates an injector sampling `model` with an RNG seeded from `seed`.
    pub fn new(model: Arc<dyn DelayModel>, seed: u64) -> Self {
        Self {
            model,
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
            stats: DelayStats::default(),
        }
    }

    /// Samples the cold-start delay for a new instance.
    pub fn delay(&mut self, instance: InstanceId, function: &FunctionSpec) -> Duration {
        let millis = self.model.sample_millis(function, &mut self.rng);

        let delay = match to_duration(millis) {
            Some(delay) => delay,
            None => {
                warn!(
                    "Cold start anomaly: model {:?} sampled {} ms for {} ({}), clamping to zero",
                    self.model, millis, instance, function.name
                );
                self.stats.clamped += 1;
                Duration::ZERO
            }
        };

        self.stats.record(delay);
        delay
    }

    /// Seed the RNG was created from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn stats(&self) -> &DelayStats {
        &self.stats
    }
}

/// Converts a millisecond sample into a schedulable delay.
///
/// Returns `None` for samples that cannot be a delay: negative, NaN, or too
/// large to represent.
fn to_duration(millis: f64) -> Option<Duration> {
    if millis.is_nan() || millis < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(millis / 1000.0).ok()
}

/// The delay injector owned by a function deployer.
#[derive(Debug)]
pub enum DelayInjector {
    Zero(ZeroDelayInjector),
    Stochastic(StochasticDelayInjector),
}

impl DelayInjector {
    /// Builds the injector for an optional model.
    ///
    /// Without a model this is the zero injector and `seed` is ignored.
    pub fn from_model(model: Option<Arc<dyn DelayModel>>, seed: u64) -> Self {
        match model {
            Some(model) => DelayInjector::Stochastic(StochasticDelayInjector::new(model, seed)),
            None => DelayInjector::Zero(ZeroDelayInjector),
        }
    }

    /// Returns the cold-start delay for a newly created instance.
    pub fn delay(&mut self, instance: InstanceId, function: &FunctionSpec) -> Duration {
        match self {
            DelayInjector::Zero(injector) => injector.delay(instance, function),
            DelayInjector::Stochastic(injector) => injector.delay(instance, function),
        }
    }

    /// Returns true for the zero injector.
    pub fn is_zero(&self) -> bool {
        matches!(self, DelayInjector::Zero(_))
    }

    /// Sampling statistics (empty for the zero injector).
    pub fn stats(&self) -> DelayStats {
        match self {
            DelayInjector::Zero(_) => DelayStats::default(),
            DelayInjector::Stochastic(injector) => injector.stats().clone(),
        }
    }
}

impl Default for DelayInjector {
    fn default() -> Self {
        DelayInjector::Zero(ZeroDelayInjector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay_model::ColdStartModel;
    use proptest::prelude::*;
    use rand::RngCore;
    use serverless_env::FunctionId;

    fn function() -> FunctionSpec {
        FunctionSpec::new(FunctionId::from_seed(1), "thumbnail", 512)
    }

    #[derive(Debug)]
    struct NanModel;

    impl DelayModel for NanModel {
        fn sample_millis(&self, _function: &FunctionSpec, _rng: &mut dyn RngCore) -> f64 {
            f64::NAN
        }
    }

    #[test]
    fn test_zero_injector_always_zero() {
        let mut injector = DelayInjector::from_model(None, 42);
        assert!(injector.is_zero());

        for i in 0..100 {
            assert_eq!(injector.delay(InstanceId(i), &function()), Duration::ZERO);
        }
        assert_eq!(injector.stats(), DelayStats::default());
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let model: Arc<dyn DelayModel> = Arc::new(ColdStartModel::Azure);
        let mut a = StochasticDelayInjector::new(model.clone(), 7);
        let mut b = StochasticDelayInjector::new(model, 7);

        let seq_a: Vec<_> = (0..50).map(|i| a.delay(InstanceId(i), &function())).collect();
        let seq_b: Vec<_> = (0..50).map(|i| b.delay(InstanceId(i), &function())).collect();

        assert_eq!(seq_a, seq_b);
        assert_eq!(a.seed(), 7);
        assert_eq!(a.seed(), b.seed());
    }

    #[test]
    fn test_different_seed_different_sequence() {
        let model: Arc<dyn DelayModel> = Arc::new(ColdStartModel::Lambda);
        let mut a = StochasticDelayInjector::new(model.clone(), 1);
        let mut b = StochasticDelayInjector::new(model, 2);

        let seq_a: Vec<_> = (0..20).map(|i| a.delay(InstanceId(i), &function())).collect();
        let seq_b: Vec<_> = (0..20).map(|i| b.delay(InstanceId(i), &function())).collect();

        assert_ne!(seq_a, seq_b);
    }

    #[test]
    fn test_negative_constant_clamps_to_zero() {
        let model: Arc<dyn DelayModel> = Arc::new(ColdStartModel::Constant { millis: -30.0 });
        let mut injector = StochasticDelayInjector::new(model, 0);

        assert_eq!(injector.delay(InstanceId(0), &function()), Duration::ZERO);
        assert_eq!(injector.stats().clamped, 1);
        assert_eq!(injector.stats().samples, 1);
    }

    #[test]
    fn test_nan_sample_clamps_to_zero() {
        let mut injector = StochasticDelayInjector::new(Arc::new(NanModel), 0);

        assert_eq!(injector.delay(InstanceId(0), &function()), Duration::ZERO);
        assert_eq!(injector.stats().clamped, 1);
    }

    #[test]
    fn test_stats_accumulate() {
        let model: Arc<dyn DelayModel> = Arc::new(ColdStartModel::Constant { millis: 100.0 });
        let mut injector = DelayInjector::from_model(Some(model), 0);

        for i in 0..4 {
            injector.delay(InstanceId(i), &function());
        }

        let stats = injector.stats();
        assert_eq!(stats.samples, 4);
        assert_eq!(stats.total, Duration::from_millis(400));
        assert_eq!(stats.max, Duration::from_millis(100));
        assert_eq!(stats.mean(), Duration::from_millis(100));
    }

    #[test]
    fn test_huge_delays_saturate_stats() {
        // Each sample is representable, their sum is not
        let model: Arc<dyn DelayModel> = Arc::new(ColdStartModel::Constant { millis: 1e22 });
        let mut injector = StochasticDelayInjector::new(model, 0);

        let first = injector.delay(InstanceId(0), &function());
        let second = injector.delay(InstanceId(1), &function());
        assert_eq!(first, second);
        assert!(first > Duration::from_secs(1_000_000_000));

        let stats = injector.stats();
        assert_eq!(stats.samples, 2);
        assert_eq!(stats.clamped, 0);
        assert_eq!(stats.total, Duration::MAX);
        assert_eq!(stats.max, first);
        assert!(stats.mean() >= Duration::from_secs(u64::MAX / 4));
    }

    #[test]
    fn test_mean_does_not_truncate_count() {
        let samples = u64::from(u32::MAX) + 1;
        assert_eq!(mean_duration(Duration::from_secs(samples), samples), Duration::from_secs(1));
        assert_eq!(mean_duration(Duration::from_secs(3), 0), Duration::ZERO);
        assert_eq!(mean_duration(Duration::MAX, 1), Duration::MAX);
    }

    proptest! {
        #[test]
        fn prop_delay_never_negative(
            mean_ms in -1000.0f64..1000.0,
            std_dev_ms in 0.0f64..2000.0,
            seed in any::<u64>(),
        ) {
            let model: Arc<dyn DelayModel> = Arc::new(ColdStartModel::Normal { mean_ms, std_dev_ms });
            let mut injector = StochasticDelayInjector::new(model, seed);

            for i in 0..32 {
                let delay = injector.delay(InstanceId(i), &function());
                prop_assert!(delay >= Duration::ZERO);
                prop_assert!(delay <= Duration::from_secs(60));
            }
        }
    }
}
