//! Property-based tests for PIN issuance and validation

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use pinchat_core::{AuthGate, Environment, MAX_PIN_LENGTH};
use proptest::prelude::*;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[derive(Clone)]
struct SeededEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SeededEnv {
    fn new(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))) }
    }
}

impl Environment for SeededEnv {
    type Instant = Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        async {}
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap().fill_bytes(buffer);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Every issued PIN is all decimal digits of the requested length.
    #[test]
    fn prop_pin_is_numeric_with_requested_length(seed in any::<u64>(), length in 1usize..=MAX_PIN_LENGTH) {
        let gate = AuthGate::new();
        let secret = gate.generate(&SeededEnv::new(seed), length).unwrap();

        prop_assert_eq!(secret.len(), length);
        prop_assert!(secret.as_str().bytes().all(|b| b.is_ascii_digit()));
        prop_assert!(gate.validate(secret.as_str()));
    }

    /// Anything other than the exact PIN is rejected.
    #[test]
    fn prop_only_exact_pin_validates(seed in any::<u64>(), candidate in "\\PC{0,12}") {
        let gate = AuthGate::new();
        let secret = gate.generate(&SeededEnv::new(seed), 6).unwrap();

        prop_assert_eq!(gate.validate(&candidate), candidate == secret.as_str());
    }

    /// The same seed always yields the same PIN.
    #[test]
    fn prop_generation_is_deterministic_under_seed(seed in any::<u64>()) {
        let a = AuthGate::new().generate(&SeededEnv::new(seed), 8).unwrap();
        let b = AuthGate::new().generate(&SeededEnv::new(seed), 8).unwrap();
        prop_assert_eq!(a, b);
    }
}

#[test]
fn digits_are_roughly_uniform() {
    let env = SeededEnv::new(7);
    let mut counts = [0usize; 10];

    for _ in 0..200 {
        let secret = AuthGate::new().generate(&env, MAX_PIN_LENGTH).unwrap();
        for b in secret.as_str().bytes() {
            counts[usize::from(b - b'0')] += 1;
        }
    }

    // 12_800 digits, expect ~1280 each
    for (digit, count) in counts.iter().enumerate() {
        assert!((1000..1560).contains(count), "digit {digit} drawn {count} times");
    }
}
