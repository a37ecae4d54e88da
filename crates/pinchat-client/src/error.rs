//! Client error types.

use pinchat_core::{ConnectionError, FrameError, TransportError};
use thiserror::Error;

/// Errors surfaced by [`crate::ClientSession`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The transport could not produce a stream.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Handshake did not end in `AUTH_SUCCESS`.
    ///
    /// Covers an explicit `AUTH_FAILED`, a garbled or missing token, a
    /// timeout, and a stream that broke mid-handshake.
    #[error("authentication failed: {0}")]
    AuthFailed(ConnectionError),

    /// Operation needs a connected session.
    #[error("not connected")]
    NotConnected,

    /// Outgoing message exceeds the configured content limit.
    #[error("message too long: {size} bytes exceeds maximum {max}")]
    MessageTooLong {
        /// Size of the rejected message
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// Writing to the host failed. The session is now disconnected.
    #[error("send failed: {0}")]
    Write(#[from] FrameError),
}

impl ClientError {
    /// True if the host explicitly rejected the secret.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::AuthFailed(ConnectionError::AuthRejected))
    }
}
