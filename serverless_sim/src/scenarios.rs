//! Named cold-start scenarios.

use crate::workload::WorkloadConfig;
use serverless_core::{ColdStartModel, TerminationPolicyKind};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// AWS Lambda cold starts, 10 minute keep-alive
    Lambda,

    /// Azure Functions cold starts, 20 minute keep-alive
    Azure,

    /// Google Cloud Functions cold starts, 15 minute keep-alive
    Google,

    /// No cold-start delay at all
    ZeroDelay,

    /// Bursty arrivals with instances reclaimed as soon as they go idle
    Bursty,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Lambda,
            ScenarioId::Azure,
            ScenarioId::Google,
            ScenarioId::ZeroDelay,
            ScenarioId::Bursty,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Lambda => "lambda",
            ScenarioId::Azure => "azure",
            ScenarioId::Google => "google",
            ScenarioId::ZeroDelay => "zero",
            ScenarioId::Bursty => "bursty",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Lambda => "Lambda memory-tier cold starts with a 10 min keep-alive",
            ScenarioId::Azure => "Azure memory-tier cold starts with a 20 min keep-alive",
            ScenarioId::Google => "Google memory-tier cold starts with a 15 min keep-alive",
            ScenarioId::ZeroDelay => "Instances are ready at their request time",
            ScenarioId::Bursty => "High arrival rate, Lambda cold starts, immediate reclamation",
        }
    }

    /// Cold-start model, or `None` for zero delay.
    pub fn cold_start(&self) -> Option<ColdStartModel> {
        match self {
            ScenarioId::Lambda | ScenarioId::Bursty => Some(ColdStartModel::Lambda),
            ScenarioId::Azure => Some(ColdStartModel::Azure),
            ScenarioId::Google => Some(ColdStartModel::Google),
            ScenarioId::ZeroDelay => None,
        }
    }

    pub fn termination(&self) -> TerminationPolicyKind {
        let minutes = |m: u64| TerminationPolicyKind::FixedKeepAlive { timeout_ms: m * 60_000 };
        match self {
            ScenarioId::Lambda | ScenarioId::ZeroDelay => minutes(10),
            ScenarioId::Azure => minutes(20),
            ScenarioId::Google => minutes(15),
            ScenarioId::Bursty => TerminationPolicyKind::Immediate,
        }
    }

    /// Adjusts the base workload for this scenario.
    pub fn workload(&self, base: WorkloadConfig) -> WorkloadConfig {
        match self {
            ScenarioId::Bursty => WorkloadConfig {
                arrival_rate_per_sec: base.arrival_rate_per_sec * 10.0,
                ..base
            },
            _ => base,
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lambda" | "aws" => Ok(ScenarioId::Lambda),
            "azure" => Ok(ScenarioId::Azure),
            "google" | "gcf" => Ok(ScenarioId::Google),
            "zero" | "zero_delay" | "zerodelay" => Ok(ScenarioId::ZeroDelay),
            "bursty" | "burst" => Ok(ScenarioId::Bursty),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert_eq!("AWS".parse::<ScenarioId>(), Ok(ScenarioId::Lambda));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_zero_delay_has_no_model() {
        assert!(ScenarioId::ZeroDelay.cold_start().is_none());
        assert!(ScenarioId::all()
            .into_iter()
            .filter(|s| *s != ScenarioId::ZeroDelay)
            .all(|s| s.cold_start().is_some()));
    }

    #[test]
    fn test_bursty_workload() {
        let base = WorkloadConfig::default();
        let bursty = ScenarioId::Bursty.workload(base.clone());

        assert_eq!(bursty.arrival_rate_per_sec, base.arrival_rate_per_sec * 10.0);
        assert_eq!(ScenarioId::Lambda.workload(base.clone()), base);
        assert_eq!(ScenarioId::Bursty.termination(), TerminationPolicyKind::Immediate);
    }
}
