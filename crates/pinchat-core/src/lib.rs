//! Pinchat core
//!
//! Transport-agnostic building blocks for a PIN-gated host/peer chat: the
//! session secret, the wire format, the time-bounded message store, and the
//! per-connection handshake state machines.
//!
//! # Architecture
//!
//! Protocol logic follows the Sans-IO pattern. [`HostConnection`] and
//! [`ClientConnection`] consume inputs and return actions; the async drivers
//! in `pinchat-server` and `pinchat-client` execute those actions against a
//! real (or simulated) stream. Time and randomness come from an
//! [`Environment`] so tests can pause the clock and seed the RNG.
//!
//! # Components
//!
//! - [`AuthGate`]: Issues and checks the session PIN
//! - [`MessageStore`]: Ordered, retention-bounded message history
//! - [`frame`]: Length-prefixed framing over byte streams
//! - [`proto`]: Handshake tokens and relay frames
//! - [`transport`]: Provider and listener traits
//! - [`TcpTransport`]: Tokio TCP provider for hosts and clients

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod auth;
pub mod connection;
pub mod env;
pub mod error;
pub mod frame;
pub mod proto;
pub mod store;
pub mod tcp;
pub mod transport;

pub use auth::{AuthGate, DEFAULT_PIN_LENGTH, MAX_PIN_LENGTH, Secret};
pub use connection::{
    ClientConnection, ClientState, DEFAULT_MAX_MESSAGE_BYTES, HostAction, HostConnection,
    HostState,
};
pub use env::Environment;
pub use error::{AuthError, ConnectionError, FrameError, TransportError};
pub use frame::{BoxedWriter, FrameReader, FrameWriter, MAX_FRAME_PAYLOAD};
pub use proto::{RelayFrame, Token};
pub use store::{DEFAULT_EVICTION_INTERVAL, DEFAULT_RETENTION, Message, MessageStore};
pub use tcp::{DEFAULT_BIND_ADDRESS, TcpServiceListener, TcpTransport};
pub use transport::{ByteStream, PeerAddress, TransportListener, TransportProvider};
