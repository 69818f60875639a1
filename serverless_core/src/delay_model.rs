//! Cold-start delay models.
//!
//! A delay model is a pure description of a latency distribution. It owns no
//! randomness: the caller passes the RNG in, so the same model can back any
//! number of independently seeded injectors.

use crate::function::FunctionSpec;
use rand::RngCore;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised by a structurally invalid delay model.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    /// Mean is NaN or infinite
    #[error("Delay model mean must be finite, got {0}")]
    NonFiniteMean(f64),

    /// Standard deviation is negative, NaN or infinite
    #[error("Delay model standard deviation must be finite and >= 0, got {0}")]
    InvalidStdDev(f64),
}

/// A distribution over cold-start latencies.
pub trait DelayModel: fmt::Debug + Send + Sync {
    /// Checks the model's parameters before it is used in a simulation.
    fn validate(&self) -> Result<(), ModelError> {
        Ok(())
    }

    /// Draws one cold-start latency in milliseconds for `function`.
    ///
    /// The raw sample is not clamped; it may be negative or NaN for
    /// distributions with unbounded support.
    fn sample_millis(&self, function: &FunctionSpec, rng: &mut dyn RngCore) -> f64;
}

/// Memory tiers (MB) of the provider models.
const MEMORY_TIERS_MB: [u64; 7] = [128, 256, 512, 1024, 1536, 2048, 3008];

/// (mean, std-dev) in milliseconds per memory tier.
const LAMBDA_PARAMS: [(f64, f64); 7] = [
    (265.21, 354.43),
    (261.46, 267.25),
    (263.55, 94.59),
    (259.23, 46.24),
    (251.79, 39.47),
    (248.17, 34.86),
    (244.12, 31.55),
];

const AZURE_PARAMS: [(f64, f64); 7] = [
    (1123.42, 1098.01),
    (1004.17, 913.52),
    (894.36, 702.18),
    (812.07, 511.30),
    (788.54, 460.92),
    (770.31, 402.85),
    (751.66, 377.40),
];

const GOOGLE_PARAMS: [(f64, f64); 7] = [
    (493.04, 345.80),
    (416.59, 245.80),
    (340.54, 111.60),
    (298.21, 79.13),
    (285.77, 66.48),
    (273.90, 58.02),
    (266.35, 51.71),
];

/// Built-in cold-start models.
///
/// The provider variants model measured cold starts of public FaaS
/// platforms as normal distributions whose parameters depend on the
/// function's provisioned memory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColdStartModel {
    Lambda,
    Azure,
    Google,

    /// Custom normal distribution
    Normal { mean_ms: f64, std_dev_ms: f64 },

    /// The same delay every time. Negative values are accepted and clamp to zero.
    Constant { millis: f64 },
}

impl ColdStartModel {
    /// Returns (mean, std-dev) in milliseconds for a function with `memory_mb`.
    ///
    /// Provider models pick the smallest tier that fits the function; larger
    /// functions use the top tier.
    pub fn params(&self, memory_mb: u64) -> (f64, f64) {
        let table = match self {
            ColdStartModel::Lambda => &LAMBDA_PARAMS,
            ColdStartModel::Azure => &AZURE_PARAMS,
            ColdStartModel::Google => &GOOGLE_PARAMS,
            ColdStartModel::Normal { mean_ms, std_dev_ms } => return (*mean_ms, *std_dev_ms),
            ColdStartModel::Constant { millis } => return (*millis, 0.0),
        };

        let tier = MEMORY_TIERS_MB
            .iter()
            .position(|&tier| memory_mb <= tier)
            .unwrap_or(MEMORY_TIERS_MB.len() - 1);
        table[tier]
    }

    /// Returns the model name.
    pub fn name(&self) -> &'static str {
        match self {
            ColdStartModel::Lambda => "lambda",
            ColdStartModel::Azure => "azure",
            ColdStartModel::Google => "google",
            ColdStartModel::Normal { .. } => "normal",
            ColdStartModel::Constant { .. } => "constant",
        }
    }
}

impl fmt::Display for ColdStartModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ColdStartModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lambda" | "aws" => Ok(ColdStartModel::Lambda),
            "azure" => Ok(ColdStartModel::Azure),
            "google" | "gcf" => Ok(ColdStartModel::Google),
            _ => Err(format!("Unknown cold start model: {}", s)),
        }
    }
}

impl DelayModel for ColdStartModel {
    fn validate(&self) -> Result<(), ModelError> {
        match *self {
            ColdStartModel::Normal { mean_ms, std_dev_ms } => {
                if !mean_ms.is_finite() {
                    return Err(ModelError::NonFiniteMean(mean_ms));
                }
                if !(std_dev_ms.is_finite() && std_dev_ms >= 0.0) {
                    return Err(ModelError::InvalidStdDev(std_dev_ms));
                }
                Ok(())
            }
            ColdStartModel::Constant { millis } if !millis.is_finite() => {
                Err(ModelError::NonFiniteMean(millis))
            }
            _ => Ok(()),
        }
    }

    fn sample_millis(&self, function: &FunctionSpec, rng: &mut dyn RngCore) -> f64 {
        if let ColdStartModel::Constant { millis } = *self {
            return millis;
        }

        let (mean, std_dev) = self.params(function.memory_mb);
        // Invalid parameters surface as NaN and get clamped by the injector
        match Normal::new(mean, std_dev) {
            Ok(normal) => normal.sample(rng),
            Err(_) => f64::NAN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serverless_env::FunctionId;

    fn function(memory_mb: u64) -> FunctionSpec {
        FunctionSpec::new(FunctionId::from_seed(1), "f", memory_mb)
    }

    #[test]
    fn test_provider_tiers() {
        assert_eq!(ColdStartModel::Lambda.params(128), LAMBDA_PARAMS[0]);
        assert_eq!(ColdStartModel::Lambda.params(129), LAMBDA_PARAMS[1]);
        assert_eq!(ColdStartModel::Google.params(1024), GOOGLE_PARAMS[3]);
        // Above the largest tier
        assert_eq!(ColdStartModel::Azure.params(10_240), AZURE_PARAMS[6]);
    }

    #[test]
    fn test_validate() {
        assert!(ColdStartModel::Lambda.validate().is_ok());
        assert!(ColdStartModel::Constant { millis: -5.0 }.validate().is_ok());
        assert_eq!(
            ColdStartModel::Normal { mean_ms: 10.0, std_dev_ms: -1.0 }.validate(),
            Err(ModelError::InvalidStdDev(-1.0))
        );
        assert!(matches!(
            ColdStartModel::Normal { mean_ms: f64::NAN, std_dev_ms: 1.0 }.validate(),
            Err(ModelError::NonFiniteMean(_))
        ));
    }

    #[test]
    fn test_constant_sample() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let model = ColdStartModel::Constant { millis: 250.0 };
        assert_eq!(model.sample_millis(&function(128), &mut rng), 250.0);
    }

    #[test]
    fn test_samples_track_mean() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let model = ColdStartModel::Lambda;
        let f = function(1024);

        let n = 10_000;
        let mean: f64 = (0..n).map(|_| model.sample_millis(&f, &mut rng)).sum::<f64>() / n as f64;

        approx::assert_abs_diff_eq!(mean, LAMBDA_PARAMS[3].0, epsilon = 5.0);
    }

    #[test]
    fn test_parse_model() {
        assert_eq!("aws".parse::<ColdStartModel>(), Ok(ColdStartModel::Lambda));
        assert_eq!("Azure".parse::<ColdStartModel>(), Ok(ColdStartModel::Azure));
        assert!("unknown".parse::<ColdStartModel>().is_err());
    }
}
