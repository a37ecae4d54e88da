//! Production environment: system clock and OS randomness.

use std::time::Duration;

use pinchat_core::Environment;

/// Production environment using system time and OS RNG.
///
/// Uses `std::time::Instant::now()` for time, `tokio::time::sleep()` for
/// async sleeping, and getrandom for PIN digits.
///
/// # Panics
///
/// Panics if the OS RNG fails. A host that cannot draw a PIN cannot admit
/// anyone, and RNG failure indicates an OS-level fault.
#[derive(Debug, Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }

    #[allow(clippy::disallowed_methods)]
    fn wall_clock_secs(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs())
    }
}
