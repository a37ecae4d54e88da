//! Per-connection handshake and streaming state machines.
//!
//! Both sides use the action pattern: methods consume an input (a token, a
//! candidate secret, a message) and return actions for the async worker to
//! execute. The state machines do no I/O, which keeps every transition unit
//! testable without a transport.
//!
//! # Host
//!
//! ```text
//! ┌───────────┐ accept ┌──────────────┐ valid secret ┌───────────────┐ registered ┌───────────┐
//! │ Listening │───────>│ AwaitingAuth │─────────────>│ Authenticated │───────────>│ Streaming │
//! └───────────┘        └──────────────┘              └───────────────┘            └───────────┘
//!                             │ bad secret / timeout / error                            │ EOF / error
//!                             ↓                                                         ↓
//!                        ┌────────┐                                                ┌────────┐
//!                        │ Closed │                                                │ Closed │
//!                        └────────┘                                                └────────┘
//! ```
//!
//! # Client
//!
//! ```text
//! Connecting → AwaitingChallenge → Authenticating → Connected → Closed
//! ```
//!
//! Any unexpected input during the client handshake moves straight to
//! `Closed`.

use crate::{
    auth::AuthGate,
    error::ConnectionError,
    proto::{RelayFrame, Token},
};

/// Default limit on one application message from a peer.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024;

/// Host-side connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    /// Not yet accepted
    Listening,
    /// Challenge sent, waiting for the candidate secret
    AwaitingAuth,
    /// Secret accepted, not yet registered
    Authenticated,
    /// Registered and relaying messages
    Streaming,
    /// Terminal
    Closed,
}

/// Actions returned by [`HostConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostAction {
    /// Write this handshake token to the peer
    Send(Token),
    /// Add the connection to the registry, then call
    /// [`HostConnection::registered`]
    Register,
    /// Append a message from this peer to the store
    Store {
        /// Message text
        content: String,
    },
    /// Relay a message from this peer to every other peer
    Broadcast {
        /// Message text
        content: String,
    },
    /// Close the stream
    Close {
        /// Reason for closing
        reason: String,
    },
}

/// Host-side state machine for one accepted connection.
#[derive(Debug, Clone)]
pub struct HostConnection {
    state: HostState,
    peer_id: Option<String>,
    max_message_bytes: usize,
}

impl Default for HostConnection {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_BYTES)
    }
}

impl HostConnection {
    /// Create a connection in [`HostState::Listening`].
    pub fn new(max_message_bytes: usize) -> Self {
        Self { state: HostState::Listening, peer_id: None, max_message_bytes }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> HostState {
        self.state
    }

    /// Peer identifier once registered.
    #[must_use]
    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id.as_deref()
    }

    /// Transport accepted the stream: issue the challenge.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` if not in `Listening`
    pub fn accept(&mut self) -> Result<Vec<HostAction>, ConnectionError> {
        self.expect_state(HostState::Listening, "accept")?;
        self.state = HostState::AwaitingAuth;
        Ok(vec![HostAction::Send(Token::AuthRequest)])
    }

    /// Check the candidate secret the peer sent in reply to the challenge.
    ///
    /// A mismatch is not an error: it produces `AUTH_FAILED` and `Close`
    /// actions and moves to `Closed`.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` if not in `AwaitingAuth`
    pub fn handle_candidate(
        &mut self,
        candidate: &str,
        gate: &AuthGate,
    ) -> Result<Vec<HostAction>, ConnectionError> {
        self.expect_state(HostState::AwaitingAuth, "handle_candidate")?;

        if gate.validate(candidate) {
            self.state = HostState::Authenticated;
            Ok(vec![HostAction::Send(Token::AuthSuccess), HostAction::Register])
        } else {
            self.state = HostState::Closed;
            Ok(vec![
                HostAction::Send(Token::AuthFailed),
                HostAction::Close { reason: "invalid secret".to_string() },
            ])
        }
    }

    /// The handshake broke before a candidate could be checked (timeout,
    /// garbled or missing response, transport error).
    ///
    /// The driver sends `AUTH_FAILED` only if the stream is still writable.
    pub fn handshake_failed(&mut self, error: &ConnectionError) -> Vec<HostAction> {
        debug_assert!(matches!(self.state, HostState::AwaitingAuth | HostState::Closed));
        self.state = HostState::Closed;
        vec![
            HostAction::Send(Token::AuthFailed),
            HostAction::Close { reason: format!("handshake failed: {error}") },
        ]
    }

    /// Registry accepted the connection under `peer_id`.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` if not in `Authenticated`
    pub fn registered(&mut self, peer_id: impl Into<String>) -> Result<(), ConnectionError> {
        self.expect_state(HostState::Authenticated, "registered")?;
        self.peer_id = Some(peer_id.into());
        self.state = HostState::Streaming;
        Ok(())
    }

    /// Application message received from the peer: store it, then relay it.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` if not in `Streaming`
    /// - `ConnectionError::MessageTooLong` if `content` exceeds the limit
    ///   (recoverable: drop the message and keep reading)
    pub fn handle_message(&mut self, content: String) -> Result<Vec<HostAction>, ConnectionError> {
        self.expect_state(HostState::Streaming, "handle_message")?;

        if content.len() > self.max_message_bytes {
            return Err(ConnectionError::MessageTooLong {
                size: content.len(),
                max: self.max_message_bytes,
            });
        }

        Ok(vec![HostAction::Store { content: content.clone() }, HostAction::Broadcast { content }])
    }

    /// Mark the connection closed.
    ///
    /// Returns true if it had been handed to the registry, meaning the driver
    /// must unregister it.
    pub fn close(&mut self) -> bool {
        let was_registered = self.peer_id.is_some();
        self.state = HostState::Closed;
        was_registered
    }

    fn expect_state(&self, expected: HostState, operation: &'static str) -> Result<(), ConnectionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ConnectionError::InvalidState { state: format!("{:?}", self.state), operation })
        }
    }
}

/// Client-side connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Waiting for the transport to yield a stream
    Connecting,
    /// Stream open, waiting for `AUTH_REQUEST`
    AwaitingChallenge,
    /// Secret sent, waiting for the verdict
    Authenticating,
    /// Authenticated, exchanging messages
    Connected,
    /// Terminal
    Closed,
}

/// Client-side state machine for the single outbound connection.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    state: ClientState,
}

impl Default for ClientConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientConnection {
    /// Create a connection in [`ClientState::Connecting`].
    pub fn new() -> Self {
        Self { state: ClientState::Connecting }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Transport yielded a connected stream.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` if not in `Connecting`
    pub fn stream_opened(&mut self) -> Result<(), ConnectionError> {
        self.expect_state(ClientState::Connecting, "stream_opened")?;
        self.state = ClientState::AwaitingChallenge;
        Ok(())
    }

    /// First frame from the host. Anything but `AUTH_REQUEST` is fatal.
    ///
    /// On success the caller sends the candidate secret.
    pub fn handle_challenge(&mut self, text: &str) -> Result<(), ConnectionError> {
        self.expect_state(ClientState::AwaitingChallenge, "handle_challenge")?;

        if Token::parse(text) == Some(Token::AuthRequest) {
            self.state = ClientState::Authenticating;
            Ok(())
        } else {
            self.state = ClientState::Closed;
            Err(ConnectionError::UnexpectedToken {
                expected: Token::AuthRequest.as_str(),
                got: text.to_string(),
            })
        }
    }

    /// Host's verdict on the secret.
    pub fn handle_auth_response(&mut self, text: &str) -> Result<(), ConnectionError> {
        self.expect_state(ClientState::Authenticating, "handle_auth_response")?;

        match Token::parse(text) {
            Some(Token::AuthSuccess) => {
                self.state = ClientState::Connected;
                Ok(())
            },
            Some(Token::AuthFailed) => {
                self.state = ClientState::Closed;
                Err(ConnectionError::AuthRejected)
            },
            _ => {
                self.state = ClientState::Closed;
                Err(ConnectionError::UnexpectedToken {
                    expected: Token::AuthSuccess.as_str(),
                    got: text.to_string(),
                })
            },
        }
    }

    /// Decode a relayed frame while connected.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` if not `Connected`
    /// - `ConnectionError::Frame(MalformedRelay)` (recoverable) if the text
    ///   has no sender separator
    pub fn handle_relay(&self, text: &str) -> Result<RelayFrame, ConnectionError> {
        self.expect_state(ClientState::Connected, "handle_relay")?;
        Ok(RelayFrame::decode(text)?)
    }

    /// Any failure or explicit disconnect.
    pub fn close(&mut self) {
        self.state = ClientState::Closed;
    }

    fn expect_state(
        &self,
        expected: ClientState,
        operation: &'static str,
    ) -> Result<(), ConnectionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ConnectionError::InvalidState { state: format!("{:?}", self.state), operation })
        }
    }
}
