//! Host error types.

use std::fmt;

use pinchat_core::{AuthError, TransportError};

/// Errors that stop the host from starting or running.
///
/// Per-connection failures never surface here: they end that connection's
/// worker and are logged.
#[derive(Debug)]
pub enum HostError {
    /// Invalid configuration (bad bind address, zero retention, ...).
    ///
    /// Fatal at startup. Fix configuration and restart.
    Config(String),

    /// Could not issue the session PIN.
    Auth(AuthError),

    /// Transport failed to advertise or bind.
    Transport(TransportError),

    /// Host message exceeds the configured content limit.
    MessageTooLong {
        /// Size of the rejected message
        size: usize,
        /// Configured limit
        max: usize,
    },
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Auth(err) => write!(f, "pin error: {err}"),
            Self::Transport(err) => write!(f, "transport error: {err}"),
            Self::MessageTooLong { size, max } => {
                write!(f, "message too long: {size} bytes exceeds maximum {max}")
            },
        }
    }
}

impl std::error::Error for HostError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(_) | Self::MessageTooLong { .. } => None,
            Self::Auth(err) => Some(err),
            Self::Transport(err) => Some(err),
        }
    }
}

impl From<AuthError> for HostError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

impl From<TransportError> for HostError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}
