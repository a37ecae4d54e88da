//! In-process transport over tokio duplex pipes.
//!
//! Services are addressed by name: `advertise("pinchat")` makes
//! `connect(&"pinchat".into())` succeed. Useful for host scenarios that do
//! not need network faults.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use pinchat_core::{PeerAddress, TransportError, TransportListener, TransportProvider};
use tokio::{io::DuplexStream, sync::mpsc};

/// Pipe capacity per direction.
const PIPE_CAPACITY: usize = 16 * 1024;

/// Pending connections queued per listener.
const BACKLOG: usize = 16;

type Incoming = (DuplexStream, PeerAddress);

/// Shared registry of advertised services. Clones see the same services.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    services: Arc<Mutex<HashMap<String, mpsc::Sender<Incoming>>>>,
    next_client: Arc<AtomicU64>,
}

impl MemoryTransport {
    /// Transport with no advertised services.
    pub fn new() -> Self {
        Self::default()
    }

    fn services(&self) -> MutexGuard<'_, HashMap<String, mpsc::Sender<Incoming>>> {
        self.services.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TransportProvider for MemoryTransport {
    type Stream = DuplexStream;
    type Listener = MemoryListener;

    async fn discover(&self) -> Result<Vec<PeerAddress>, TransportError> {
        let mut names: Vec<_> = self
            .services()
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(name, _)| PeerAddress::new(name.clone()))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn connect(&self, address: &PeerAddress) -> Result<DuplexStream, TransportError> {
        let tx = self
            .services()
            .get(address.as_str())
            .cloned()
            .ok_or_else(|| TransportError::Connect(format!("no service at {address}")))?;

        let n = self.next_client.fetch_add(1, Ordering::Relaxed) + 1;
        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);

        tx.send((remote, PeerAddress::new(format!("memory-client-{n}"))))
            .await
            .map_err(|_| TransportError::Connect(format!("{address} stopped listening")))?;
        Ok(local)
    }

    async fn advertise(&self, service: &str) -> Result<MemoryListener, TransportError> {
        let mut services = self.services();
        if services.get(service).is_some_and(|tx| !tx.is_closed()) {
            return Err(TransportError::Advertise(format!("{service} already advertised")));
        }

        let (tx, rx) = mpsc::channel(BACKLOG);
        services.insert(service.to_string(), tx);
        Ok(MemoryListener { rx, address: PeerAddress::new(service) })
    }
}

/// Listener half of an advertised in-memory service.
#[derive(Debug)]
pub struct MemoryListener {
    rx: mpsc::Receiver<Incoming>,
    address: PeerAddress,
}

#[async_trait]
impl TransportListener for MemoryListener {
    type Stream = DuplexStream;

    async fn accept(&mut self) -> Result<Incoming, TransportError> {
        self.rx.recv().await.ok_or(TransportError::Closed)
    }

    fn local_addr(&self) -> Option<PeerAddress> {
        Some(self.address.clone())
    }
}
