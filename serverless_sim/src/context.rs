//! Seed source for deterministic simulation runs.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serverless_env::SeedSource;
use std::sync::{Mutex, PoisonError};

/// Seed stream backed by a ChaCha8 RNG seeded from the master seed.
///
/// Every component that needs randomness (delay injectors, random routing,
/// workload generation) draws its own sub-seed here, in a fixed order, so a
/// whole run is reproducible from one number.
pub struct SimSeeder {
    /// Master seed for this simulation
    master_seed: u64,

    /// Stream of sub-seeds
    rng: Mutex<ChaCha8Rng>,
}

impl SimSeeder {
    /// Creates a new SimSeeder with the given master seed.
    pub fn new(master_seed: u64) -> Self {
        Self {
            master_seed,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(master_seed)),
        }
    }

    /// Returns the master seed (for logging/debugging).
    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }
}

impl SeedSource for SimSeeder {
    fn next_seed(&self) -> u64 {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).next_u64()
    }
}

impl std::fmt::Debug for SimSeeder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimSeeder")
            .field("master_seed", &self.master_seed)
            .finish()
    }
}
