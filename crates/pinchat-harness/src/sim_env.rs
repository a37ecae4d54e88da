//! Deterministic environment for simulation tests.
//!
//! Time comes from tokio's clock, which turmoil and `start_paused` tests
//! control. Randomness comes from a seeded `ChaCha8Rng`, so the same seed
//! always yields the same session PIN.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use pinchat_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seed used by [`SimEnv::new`].
pub const DEFAULT_SEED: u64 = 0x5EED;

/// Wall-clock time the simulation pretends to start at (2024-01-01 12:00:00 UTC).
const SIM_EPOCH_SECS: u64 = 1_704_110_400;

/// Simulation environment: tokio time plus a seeded RNG.
///
/// Clones share the RNG stream.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
    start: tokio::time::Instant,
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").field("start", &self.start).finish_non_exhaustive()
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Environment seeded with [`DEFAULT_SEED`].
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Environment with an explicit seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            start: tokio::time::Instant::now(),
        }
    }
}

impl Environment for SimEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }

    fn wall_clock_secs(&self) -> u64 {
        SIM_EPOCH_SECS + (self.now() - self.start).as_secs()
    }
}
