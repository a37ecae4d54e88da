//! TCP transport provider, shared by hosts and clients.
//!
//! Discovery is static: the operator supplies the hosts a client may join.
//! Advertising binds a listening socket; the service name only appears in
//! logs since plain TCP has no service registry.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

use crate::{
    error::TransportError,
    transport::{PeerAddress, TransportListener, TransportProvider},
};

/// Bind address used by [`TcpTransport::default`].
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:7070";

/// TCP transport using tokio sockets.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    bind_address: String,
    known_hosts: Vec<PeerAddress>,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_BIND_ADDRESS)
    }
}

impl TcpTransport {
    /// Transport that advertises on `bind_address` (e.g. `"0.0.0.0:7070"`).
    ///
    /// Clients that only connect never use the bind address.
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self { bind_address: bind_address.into(), known_hosts: Vec::new() }
    }

    /// Hosts returned by [`TransportProvider::discover`].
    #[must_use]
    pub fn with_known_hosts(mut self, hosts: impl IntoIterator<Item = PeerAddress>) -> Self {
        self.known_hosts = hosts.into_iter().collect();
        self
    }

    /// Address this transport binds when advertising.
    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }
}

#[async_trait]
impl TransportProvider for TcpTransport {
    type Stream = TcpStream;
    type Listener = TcpServiceListener;

    async fn discover(&self) -> Result<Vec<PeerAddress>, TransportError> {
        Ok(self.known_hosts.clone())
    }

    async fn connect(&self, address: &PeerAddress) -> Result<TcpStream, TransportError> {
        let stream = TcpStream::connect(address.as_str())
            .await
            .map_err(|e| TransportError::Connect(format!("{address}: {e}")))?;

        // Frames are small and latency matters more than throughput
        stream.set_nodelay(true).map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(stream)
    }

    async fn advertise(&self, service: &str) -> Result<TcpServiceListener, TransportError> {
        let addr: SocketAddr = self.bind_address.parse().map_err(|e| {
            TransportError::Advertise(format!("invalid bind address '{}': {e}", self.bind_address))
        })?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Advertise(format!("bind {addr}: {e}")))?;

        let local = listener.local_addr().map_err(|e| TransportError::Advertise(e.to_string()))?;
        tracing::info!(service, %local, "advertising service");

        Ok(TcpServiceListener { listener, local })
    }
}

/// Listening socket for an advertised service.
#[derive(Debug)]
pub struct TcpServiceListener {
    listener: TcpListener,
    local: SocketAddr,
}

#[async_trait]
impl TransportListener for TcpServiceListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> Result<(TcpStream, PeerAddress), TransportError> {
        let (stream, remote) =
            self.listener.accept().await.map_err(|e| TransportError::Accept(e.to_string()))?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%remote, error = %e, "set_nodelay failed");
        }
        Ok((stream, remote.into()))
    }

    fn local_addr(&self) -> Option<PeerAddress> {
        Some(self.local.into())
    }
}
