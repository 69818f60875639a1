//! Machine profile of the hosts that run function instances.
//!
//! The profile is an opaque capacity description from the point of view of
//! the provisioning step: it is validated once and then handed to the
//! deployer, which carves one [`MachineReservation`] out of it per instance.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by an invalid or exhausted machine profile.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MachineError {
    /// Profile declares no processing units
    #[error("Machine '{0}' has no CPUs")]
    NoCpus(String),

    /// Clock frequency is zero, negative or not a number
    #[error("Machine '{name}' has invalid CPU frequency {mhz} MHz")]
    InvalidFrequency { name: String, mhz: f64 },

    /// Profile declares no memory
    #[error("Machine '{0}' has no memory")]
    NoMemory(String),

    /// A function asked for more memory than one machine provides
    #[error("Function needs {requested_mb} MB but machine '{name}' provides {available_mb} MB")]
    InsufficientMemory {
        name: String,
        requested_mb: u64,
        available_mb: u64,
    },
}

/// Per-instance compute capacity of the simulated host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineProfile {
    /// Human-readable model name
    pub name: String,

    /// Number of processing units
    pub cpu_count: u32,

    /// Clock frequency of each processing unit in MHz
    pub cpu_frequency_mhz: f64,

    /// Memory available to one function instance in MB
    pub memory_mb: u64,
}

impl MachineProfile {
    /// Creates a new machine profile.
    pub fn new(name: impl Into<String>, cpu_count: u32, cpu_frequency_mhz: f64, memory_mb: u64) -> Self {
        Self {
            name: name.into(),
            cpu_count,
            cpu_frequency_mhz,
            memory_mb,
        }
    }

    /// Checks that the profile describes a machine that can run anything.
    pub fn validate(&self) -> Result<(), MachineError> {
        if self.cpu_count == 0 {
            return Err(MachineError::NoCpus(self.name.clone()));
        }
        if !(self.cpu_frequency_mhz.is_finite() && self.cpu_frequency_mhz > 0.0) {
            return Err(MachineError::InvalidFrequency {
                name: self.name.clone(),
                mhz: self.cpu_frequency_mhz,
            });
        }
        if self.memory_mb == 0 {
            return Err(MachineError::NoMemory(self.name.clone()));
        }
        Ok(())
    }

    /// Reserves capacity for one instance of a function needing `memory_mb`.
    pub fn reserve(&self, memory_mb: u64) -> Result<MachineReservation, MachineError> {
        if memory_mb > self.memory_mb {
            return Err(MachineError::InsufficientMemory {
                name: self.name.clone(),
                requested_mb: memory_mb,
                available_mb: self.memory_mb,
            });
        }

        Ok(MachineReservation {
            cpu_count: self.cpu_count,
            cpu_frequency_mhz: self.cpu_frequency_mhz,
            memory_mb,
        })
    }
}

impl Default for MachineProfile {
    fn default() -> Self {
        // Dual-core node, sized for the largest common FaaS memory tier
        Self::new("faas-node", 2, 2900.0, 3008)
    }
}

/// Capacity held by a live function instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MachineReservation {
    pub cpu_count: u32,
    pub cpu_frequency_mhz: f64,
    pub memory_mb: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_is_valid() {
        assert!(MachineProfile::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_profiles() {
        let no_cpu = MachineProfile::new("m", 0, 2000.0, 1024);
        assert_eq!(no_cpu.validate(), Err(MachineError::NoCpus("m".into())));

        let bad_freq = MachineProfile::new("m", 1, f64::NAN, 1024);
        assert!(matches!(bad_freq.validate(), Err(MachineError::InvalidFrequency { .. })));

        let no_mem = MachineProfile::new("m", 1, 2000.0, 0);
        assert_eq!(no_mem.validate(), Err(MachineError::NoMemory("m".into())));
    }

    #[test]
    fn test_reserve_respects_memory() {
        let machine = MachineProfile::new("m", 2, 2000.0, 512);

        let reservation = machine.reserve(256).unwrap();
        assert_eq!(reservation.memory_mb, 256);
        assert_eq!(reservation.cpu_count, 2);

        assert!(matches!(
            machine.reserve(1024),
            Err(MachineError::InsufficientMemory { requested_mb: 1024, available_mb: 512, .. })
        ));
    }
}
