//! Session PIN issuance and validation.
//!
//! The host generates one numeric PIN per session and shows it to the
//! operator out of band. Peers prove they were told the PIN by sending it as
//! the handshake response. There is no lockout: repeated wrong guesses are
//! not penalized.

use std::{fmt, sync::OnceLock};

use subtle::ConstantTimeEq;

use crate::{env::Environment, error::AuthError};

/// PIN length used when the operator does not choose one.
pub const DEFAULT_PIN_LENGTH: usize = 6;

/// Longest PIN the gate will issue.
pub const MAX_PIN_LENGTH: usize = 64;

/// Largest multiple of 10 that fits in a byte. Bytes at or above this are
/// rejected so every digit is equally likely.
const DIGIT_REJECTION_BOUND: u8 = 250;

/// A numeric session secret.
///
/// `Debug` never prints the digits so the secret does not leak into logs by
/// accident. Use [`Secret::as_str`] to display it to the operator.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// The PIN digits.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of digits.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for issued secrets.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({} digits)", self.0.len())
    }
}

/// Owns the single shared secret of a host session.
///
/// The secret is written at most once; afterwards it is immutable and reads
/// are lock-free, so the gate can be shared by every handshake worker.
#[derive(Debug, Default)]
pub struct AuthGate {
    secret: OnceLock<Secret>,
}

impl AuthGate {
    /// Create a gate with no secret. Every candidate is rejected until
    /// [`AuthGate::generate`] succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate and store a `length`-digit PIN.
    ///
    /// Returns the PIN for display to the operator.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidLength`] if `length` is 0 or above
    ///   [`MAX_PIN_LENGTH`]
    /// - [`AuthError::AlreadyGenerated`] if this session already has a secret
    pub fn generate<E: Environment>(&self, env: &E, length: usize) -> Result<Secret, AuthError> {
        if length == 0 || length > MAX_PIN_LENGTH {
            return Err(AuthError::InvalidLength { length, max: MAX_PIN_LENGTH });
        }

        if self.secret.get().is_some() {
            return Err(AuthError::AlreadyGenerated);
        }

        let secret = Secret(random_digits(env, length));
        self.secret.set(secret.clone()).map_err(|_| AuthError::AlreadyGenerated)?;

        debug_assert_eq!(secret.len(), length);
        Ok(secret)
    }

    /// True iff a secret exists and `candidate` equals it exactly.
    ///
    /// Comparison is constant-time over the candidate bytes.
    pub fn validate(&self, candidate: &str) -> bool {
        match self.secret.get() {
            Some(secret) => bool::from(secret.0.as_bytes().ct_eq(candidate.as_bytes())),
            None => false,
        }
    }

    /// The current secret, if one has been generated.
    pub fn secret(&self) -> Option<&Secret> {
        self.secret.get()
    }
}

/// Draw `length` uniformly distributed decimal digits from the environment.
fn random_digits<E: Environment>(env: &E, length: usize) -> String {
    let mut digits = String::with_capacity(length);
    let mut pool = [0u8; 32];

    while digits.len() < length {
        env.random_bytes(&mut pool);
        for byte in pool {
            if byte >= DIGIT_REJECTION_BOUND {
                continue;
            }
            digits.push(char::from(b'0' + byte % 10));
            if digits.len() == length {
                break;
            }
        }
    }

    digits
}
