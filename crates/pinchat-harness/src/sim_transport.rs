//! Turmoil-backed transport for deterministic network simulation.
//!
//! Hosts advertise on a bind address inside the simulation; peers connect by
//! turmoil host name (`"host:7070"`).

use std::net::SocketAddr;

use async_trait::async_trait;
use pinchat_core::{PeerAddress, TransportError, TransportListener, TransportProvider};
use turmoil::net::{TcpListener, TcpStream};

/// Port used by simulated hosts.
pub const SIM_PORT: u16 = 7070;

/// Transport over turmoil's simulated TCP.
#[derive(Debug, Clone)]
pub struct SimTransport {
    bind_address: String,
    known_hosts: Vec<PeerAddress>,
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new(format!("0.0.0.0:{SIM_PORT}"))
    }
}

impl SimTransport {
    /// Transport that advertises on `bind_address`.
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self { bind_address: bind_address.into(), known_hosts: Vec::new() }
    }

    /// Hosts returned by [`TransportProvider::discover`].
    #[must_use]
    pub fn with_known_hosts(mut self, hosts: impl IntoIterator<Item = PeerAddress>) -> Self {
        self.known_hosts = hosts.into_iter().collect();
        self
    }
}

#[async_trait]
impl TransportProvider for SimTransport {
    type Stream = TcpStream;
    type Listener = SimListener;

    async fn discover(&self) -> Result<Vec<PeerAddress>, TransportError> {
        Ok(self.known_hosts.clone())
    }

    async fn connect(&self, address: &PeerAddress) -> Result<TcpStream, TransportError> {
        TcpStream::connect(address.as_str())
            .await
            .map_err(|e| TransportError::Connect(format!("{address}: {e}")))
    }

    async fn advertise(&self, service: &str) -> Result<SimListener, TransportError> {
        let listener = TcpListener::bind(self.bind_address.as_str())
            .await
            .map_err(|e| TransportError::Advertise(format!("bind {}: {e}", self.bind_address)))?;
        let local = listener.local_addr().map_err(|e| TransportError::Advertise(e.to_string()))?;

        tracing::debug!(service, %local, "advertising simulated service");
        Ok(SimListener { listener, local })
    }
}

/// Listening socket inside the simulation.
pub struct SimListener {
    listener: TcpListener,
    local: SocketAddr,
}

impl std::fmt::Debug for SimListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimListener").field("local", &self.local).finish_non_exhaustive()
    }
}

#[async_trait]
impl TransportListener for SimListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> Result<(TcpStream, PeerAddress), TransportError> {
        let (stream, remote) =
            self.listener.accept().await.map_err(|e| TransportError::Accept(e.to_string()))?;
        Ok((stream, remote.into()))
    }

    fn local_addr(&self) -> Option<PeerAddress> {
        Some(self.local.into())
    }
}
