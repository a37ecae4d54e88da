//! Environment abstraction for deterministic testing.
//!
//! Decouples the PIN generator and the message store from system resources
//! (time, randomness). Production code uses real time and OS entropy; tests
//! use a paused tokio clock and a seeded RNG so retention and PIN generation
//! are reproducible.

use std::time::Duration;

/// Abstract environment providing time, randomness, and async sleeping.
///
/// # Invariants
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` draws from a uniform source
/// - Methods are infallible except in exceptional circumstances (OS entropy
///   exhaustion, broken simulation setup)
pub trait Environment: Clone + Send + Sync + 'static {
    /// The instant type used by this environment.
    ///
    /// Production uses `std::time::Instant`, simulation uses
    /// `tokio::time::Instant` so the clock can be paused and advanced.
    type Instant: Copy + Ord + Send + Sync + std::fmt::Debug + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only background tasks (store eviction) call this. Protocol logic takes
    /// time as a value.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Seconds since the Unix epoch, for human-readable timestamps only.
    ///
    /// Never used for expiry decisions; those use [`Environment::now`].
    fn wall_clock_secs(&self) -> u64 {
        0
    }
}
