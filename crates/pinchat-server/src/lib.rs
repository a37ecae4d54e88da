//! Pinchat host.
//!
//! Async runtime glue around [`pinchat_core`]: the accept loop, per-peer
//! workers, the connection registry and broadcast fan-out, plus the
//! production environment.
//!
//! # Components
//!
//! - [`Host`]: Starts a session and returns a [`HostHandle`]
//! - [`ConnectionRegistry`]: Authenticated peers keyed by sequential id
//! - [`BroadcastRouter`]: Relays a message to every peer but its sender
//! - [`TcpTransport`]: Tokio TCP transport provider (from [`pinchat_core`])
//! - [`SystemEnv`]: Production environment (real time, OS RNG)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod host;
mod registry;
mod router;
mod system_env;

pub use error::HostError;
pub use host::{
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_SERVICE_NAME, HOST_SENDER, Host, HostConfig, HostHandle,
};
pub use registry::{
    ConnectionId, ConnectionRegistry, DEFAULT_WRITE_TIMEOUT, OUTBOUND_QUEUE_CAPACITY, OutboundWriter,
    PeerConnection, PeerId, SendError,
};
pub use router::{BroadcastReport, BroadcastRouter};
pub use system_env::SystemEnv;
pub use pinchat_core::{TcpServiceListener, TcpTransport};
