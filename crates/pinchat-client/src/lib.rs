//! Pinchat client
//!
//! Joins a host session: connects through a transport provider, answers the
//! PIN challenge, then keeps a local, retention-bounded history of relayed
//! messages while the caller sends its own.
//!
//! The handshake transitions live in [`pinchat_core::ClientConnection`]; this
//! crate drives them over a real stream.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod session;

pub use error::ClientError;
pub use pinchat_core::{ClientState, Environment, Message, PeerAddress, TcpTransport};
pub use session::{
    ClientConfig, ClientSession, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_WRITE_TIMEOUT, LOCAL_SENDER,
};
