//! Error types for the pinchat protocol core.
//!
//! Strongly-typed errors for each layer: PIN issuance, frame codec,
//! connection state machines, and the transport provider boundary.
//!
//! Registry and store operations are infallible. Every failure surfaces at
//! the I/O boundary inside a session worker.

use std::{io, time::Duration};

use thiserror::Error;

/// Errors from [`crate::AuthGate`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// A secret already exists for this session and is immutable.
    #[error("secret already generated for this session")]
    AlreadyGenerated,

    /// Requested PIN length is outside the supported range.
    #[error("invalid pin length {length}: must be between 1 and {max}")]
    InvalidLength {
        /// Length that was requested
        length: usize,
        /// Largest supported length
        max: usize,
    },
}

/// Errors from the length-prefixed frame codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Declared payload length exceeds the codec limit.
    ///
    /// Fatal for the connection: the stream cannot be resynchronized.
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    TooLarge {
        /// Declared payload size
        size: usize,
        /// Maximum allowed payload size
        max: usize,
    },

    /// Payload is not valid UTF-8 text.
    #[error("frame payload is not valid utf-8")]
    InvalidUtf8,

    /// Relayed frame lacks the `"<sender>: <content>"` separator.
    #[error("malformed relay frame: missing sender separator")]
    MalformedRelay,

    /// Stream ended in the middle of a frame.
    #[error("stream closed mid-frame")]
    UnexpectedEof,

    /// Underlying read or write failed.
    #[error("frame i/o error: {0}")]
    Io(String),
}

impl FrameError {
    /// Returns true if the connection can keep reading after this error.
    ///
    /// Content errors (bad text, bad relay shape) leave the stream aligned on
    /// a frame boundary. Size and I/O errors do not.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidUtf8 | Self::MalformedRelay)
    }
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::UnexpectedEof
        } else {
            Self::Io(err.to_string())
        }
    }
}

/// Errors that can occur during connection state machine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Operation is not valid in the current state.
    #[error("invalid state transition: cannot {operation} from {state}")]
    InvalidState {
        /// Current state when the error occurred
        state: String,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Received something other than the expected handshake token.
    #[error("unexpected handshake token: expected {expected}, got {got:?}")]
    UnexpectedToken {
        /// Token the state machine was waiting for
        expected: &'static str,
        /// What actually arrived (lossy text)
        got: String,
    },

    /// Host rejected the supplied secret.
    #[error("authentication failed")]
    AuthRejected,

    /// Handshake did not complete within the configured timeout.
    #[error("handshake timeout after {elapsed:?}")]
    HandshakeTimeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// Application message exceeds the configured content limit.
    #[error("message too long: {size} bytes exceeds maximum {max}")]
    MessageTooLong {
        /// Size of the rejected message
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// Frame codec error.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Peer closed the stream.
    #[error("connection closed by peer")]
    Closed,
}

impl ConnectionError {
    /// Returns true if this error belongs to the handshake (AuthFailure)
    /// class rather than the transport class.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::AuthRejected | Self::UnexpectedToken { .. } | Self::HandshakeTimeout { .. }
        )
    }

    /// Returns true if the session can drop the offending message and keep
    /// reading.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::MessageTooLong { .. } => true,
            Self::Frame(err) => err.is_recoverable(),
            _ => false,
        }
    }
}

/// Errors raised by a transport provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Device or host discovery failed.
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// Outbound connection failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Could not advertise (bind) the service.
    #[error("advertise failed: {0}")]
    Advertise(String),

    /// Accepting an incoming connection failed.
    #[error("accept failed: {0}")]
    Accept(String),

    /// Listener was closed.
    #[error("listener closed")]
    Closed,
}
