//! Transport provider boundary.
//!
//! The host and client never touch sockets directly. A transport yields
//! connected byte streams; everything above it (framing, handshake, relay) is
//! transport-agnostic. Production uses TCP, tests use in-process pipes or a
//! simulated network.

use std::{fmt, net::SocketAddr};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TransportError;

/// Opaque address of a reachable host or peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddress(String);

impl PeerAddress {
    /// Wrap an address string.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Address text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl From<&str> for PeerAddress {
    fn from(addr: &str) -> Self {
        Self(addr.to_string())
    }
}

/// A connected, reliable, ordered byte stream.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Produces connected streams and advertises the host service.
#[async_trait]
pub trait TransportProvider: Send + Sync + 'static {
    /// Stream type for both inbound and outbound connections.
    type Stream: ByteStream;

    /// Listener returned by [`TransportProvider::advertise`].
    type Listener: TransportListener<Stream = Self::Stream>;

    /// Addresses of hosts currently reachable.
    async fn discover(&self) -> Result<Vec<PeerAddress>, TransportError>;

    /// Open a stream to `address`.
    async fn connect(&self, address: &PeerAddress) -> Result<Self::Stream, TransportError>;

    /// Make the host reachable under `service` and start accepting.
    async fn advertise(&self, service: &str) -> Result<Self::Listener, TransportError>;
}

/// Accepts inbound streams for an advertised service.
#[async_trait]
pub trait TransportListener: Send + 'static {
    /// Accepted stream type.
    type Stream: ByteStream;

    /// Wait for the next inbound stream.
    async fn accept(&mut self) -> Result<(Self::Stream, PeerAddress), TransportError>;

    /// Address peers can connect to, if the transport has one.
    fn local_addr(&self) -> Option<PeerAddress>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_address_from_socket_addr() {
        let addr: SocketAddr = "127.0.0.1:7070".parse().unwrap();
        assert_eq!(PeerAddress::from(addr).as_str(), "127.0.0.1:7070");
    }

    #[test]
    fn peer_address_display() {
        assert_eq!(PeerAddress::new("host:1").to_string(), "host:1");
    }
}
