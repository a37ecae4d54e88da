//! Registry of authenticated peer connections.
//!
//! Each registered connection gets the next sequential peer identifier
//! (`peer1`, `peer2`, ...). Identifiers are never reused, even after the
//! connection that held one disconnects.
//!
//! Registration hands the write half of the stream to an [`OutboundWriter`].
//! That task owns the stream and drains a bounded queue of frames. Senders
//! only enqueue, so a stalled peer never blocks anyone else's worker. The
//! first failed or timed-out write closes the connection: a partial frame is
//! followed by end-of-stream, never by another frame.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use pinchat_core::{BoxedWriter, PeerAddress};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default bound on a single frame write to a peer.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Frames queued per connection before further sends are dropped.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Sequential peer identifier, rendered as `peer<N>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    /// The sequence number (1 for `peer1`).
    pub fn number(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer{}", self.0)
    }
}

/// Process-unique handle for one registered connection.
///
/// Used to exclude the originator from a broadcast and to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

/// Why a frame could not be queued for a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The connection's writer has stopped
    Closed,
    /// The peer is not keeping up; the frame was dropped
    QueueFull,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("connection closed"),
            Self::QueueFull => f.write_str("outbound queue full"),
        }
    }
}

impl std::error::Error for SendError {}

/// A registered, authenticated peer connection.
#[derive(Debug)]
pub struct PeerConnection {
    id: ConnectionId,
    peer_id: PeerId,
    address: PeerAddress,
    outbound: mpsc::Sender<String>,
    /// Cancelled when the writer stops, for any reason
    closed: CancellationToken,
}

impl PeerConnection {
    /// Registry handle.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Assigned peer identifier.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Transport address the peer connected from.
    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    /// Queue one text frame. Never waits.
    pub fn send_text(&self, text: &str) -> Result<(), SendError> {
        if self.closed.is_cancelled() {
            return Err(SendError::Closed);
        }
        self.outbound.try_send(text.to_string()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// True until the writer stops.
    pub fn is_open(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Stop the writer. The peer sees end-of-stream. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Resolves once the writer has stopped.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}

/// Owns the write half of one registered connection.
///
/// Spawn [`OutboundWriter::run`] next to the connection's worker. Dropping it
/// without running closes the connection.
#[must_use = "frames are only written while `run` is polled"]
pub struct OutboundWriter {
    peer_id: PeerId,
    writer: BoxedWriter,
    queue: mpsc::Receiver<String>,
    closed: CancellationToken,
}

impl fmt::Debug for OutboundWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundWriter").field("peer_id", &self.peer_id).finish_non_exhaustive()
    }
}

impl Drop for OutboundWriter {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

impl OutboundWriter {
    /// Write queued frames in order until the connection closes or a write
    /// fails or exceeds `write_timeout`, then shut the stream down.
    pub async fn run(mut self, write_timeout: Duration) {
        loop {
            let text = tokio::select! {
                biased;
                () = self.closed.cancelled() => break,
                next = self.queue.recv() => match next {
                    Some(text) => text,
                    None => break,
                },
            };

            match tokio::time::timeout(write_timeout, self.writer.write_text(&text)).await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => {
                    tracing::warn!(peer = %self.peer_id, error = %e, "relay write failed");
                    break;
                },
                Err(_) => {
                    tracing::warn!(peer = %self.peer_id, timeout = ?write_timeout, "relay write timed out");
                    break;
                },
            }
        }

        // A partial frame may be on the wire: nothing else may follow it
        self.closed.cancel();
        self.queue.close();

        match tokio::time::timeout(write_timeout, self.writer.shutdown()).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => tracing::debug!(peer = %self.peer_id, error = %e, "shutdown failed"),
            Err(_) => tracing::debug!(peer = %self.peer_id, "shutdown timed out"),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    /// Sequence number of the last issued peer identifier
    last_peer: u64,
    /// Registration order equals `ConnectionId` order
    peers: BTreeMap<ConnectionId, Arc<PeerConnection>>,
}

/// Thread-safe registry of authenticated connections.
///
/// All mutations and snapshots are mutually exclusive; the lock is never held
/// across an `.await`.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an authenticated connection under the next peer identifier.
    ///
    /// Returns the shared handle and the writer task that owns `writer`.
    pub fn register(
        &self,
        writer: BoxedWriter,
        address: PeerAddress,
    ) -> (Arc<PeerConnection>, OutboundWriter) {
        let (outbound, queue) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let closed = CancellationToken::new();

        let mut inner = self.lock();
        inner.last_peer += 1;

        let n = inner.last_peer;
        let connection = Arc::new(PeerConnection {
            id: ConnectionId(n),
            peer_id: PeerId(n),
            address,
            outbound,
            closed: closed.clone(),
        });

        let previous = inner.peers.insert(connection.id, Arc::clone(&connection));
        debug_assert!(previous.is_none(), "connection ids are never reused");

        (connection, OutboundWriter { peer_id: PeerId(n), writer, queue, closed })
    }

    /// Remove a connection. No-op if it is not registered.
    ///
    /// Returns the entry if this call removed it.
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<PeerConnection>> {
        self.lock().peers.remove(&id)
    }

    /// Point-in-time copy of every registered connection, in registration
    /// order.
    pub fn snapshot(&self) -> Vec<(PeerId, Arc<PeerConnection>)> {
        self.lock().peers.values().map(|conn| (conn.peer_id, Arc::clone(conn))).collect()
    }

    /// Identifiers of every registered connection, in registration order.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.lock().peers.values().map(|conn| conn.peer_id).collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.lock().peers.len()
    }

    /// True if no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().peers.is_empty()
    }

    /// True if `id` is currently registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().peers.contains_key(&id)
    }

    /// Remove every connection and stop its writer.
    ///
    /// Returns how many connections were closed.
    pub fn close_all(&self) -> usize {
        let drained = std::mem::take(&mut self.lock().peers);
        for conn in drained.values() {
            conn.close();
        }
        drained.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use pinchat_core::{FrameError, FrameReader, FrameWriter};
    use tokio::{io::DuplexStream, task::JoinHandle};

    use super::*;

    fn register(registry: &ConnectionRegistry) -> Arc<PeerConnection> {
        let (near, _far) = tokio::io::duplex(1024);
        let (conn, _outbound) = registry.register(FrameWriter::new(near).boxed(), PeerAddress::new("test"));
        conn
    }

    /// Register over a pipe of `capacity` bytes and start the writer task.
    fn spawn_connection(
        registry: &ConnectionRegistry,
        capacity: usize,
        write_timeout: Duration,
    ) -> (Arc<PeerConnection>, FrameReader<DuplexStream>, JoinHandle<()>) {
        let (near, far) = tokio::io::duplex(capacity);
        let (conn, outbound) = registry.register(FrameWriter::new(near).boxed(), PeerAddress::new("test"));
        let task = tokio::spawn(outbound.run(write_timeout));
        (conn, FrameReader::new(far), task)
    }

    #[test]
    fn peer_ids_are_sequential() {
        let registry = ConnectionRegistry::new();

        let ids: Vec<_> = (0..3).map(|_| register(&registry).peer_id().to_string()).collect();
        assert_eq!(ids, ["peer1", "peer2", "peer3"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn identifiers_are_not_reused() {
        let registry = ConnectionRegistry::new();
        let first = register(&registry);
        let second = register(&registry);

        registry.unregister(second.id());
        let third = register(&registry);

        assert_eq!(third.peer_id().to_string(), "peer3");
        assert_eq!(registry.peer_ids(), vec![first.peer_id(), third.peer_id()]);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let conn = register(&registry);
        register(&registry);

        assert!(registry.unregister(conn.id()).is_some());
        assert!(registry.unregister(conn.id()).is_none());
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(conn.id()));
    }

    #[test]
    fn snapshot_is_detached_from_registry() {
        let registry = ConnectionRegistry::new();
        let conn = register(&registry);

        let snapshot = registry.snapshot();
        registry.unregister(conn.id());

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, conn.peer_id());
        assert!(registry.is_empty());
    }

    #[test]
    fn dropped_writer_closes_connection() {
        let registry = ConnectionRegistry::new();
        let conn = register(&registry);

        assert!(!conn.is_open());
        assert_eq!(conn.send_text("peer2: hi"), Err(SendError::Closed));
    }

    #[tokio::test]
    async fn frames_arrive_in_send_order() {
        let registry = ConnectionRegistry::new();
        let (conn, mut reader, _task) = spawn_connection(&registry, 1024, DEFAULT_WRITE_TIMEOUT);

        for i in 0..5 {
            conn.send_text(&format!("peer2: m{i}")).unwrap();
        }
        for i in 0..5 {
            assert_eq!(reader.read_text().await.unwrap(), Some(format!("peer2: m{i}")));
        }
    }

    #[tokio::test]
    async fn close_all_drains_and_shuts_down() {
        let registry = ConnectionRegistry::new();
        let (_conn, mut reader, task) = spawn_connection(&registry, 1024, DEFAULT_WRITE_TIMEOUT);
        register(&registry);

        assert_eq!(registry.close_all(), 2);
        assert!(registry.is_empty());

        task.await.unwrap();
        assert_eq!(reader.read_text().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_write_closes_instead_of_desyncing() {
        let registry = ConnectionRegistry::new();
        // Smaller than one frame and nobody reads yet
        let (conn, mut reader, task) = spawn_connection(&registry, 8, Duration::from_millis(50));

        conn.send_text("peer2: first").unwrap();
        task.await.unwrap();

        assert!(!conn.is_open());
        assert_eq!(conn.send_text("peer2: second"), Err(SendError::Closed));

        // The peer sees the truncated frame end the stream, never a bogus frame
        assert_eq!(reader.read_text().await, Err(FrameError::UnexpectedEof));
    }

    #[tokio::test]
    async fn failed_write_closes_connection() {
        let registry = ConnectionRegistry::new();
        let (conn, reader, task) = spawn_connection(&registry, 1024, DEFAULT_WRITE_TIMEOUT);
        drop(reader);

        conn.send_text("peer2: into the void").unwrap();
        task.await.unwrap();

        assert_eq!(conn.send_text("peer2: again"), Err(SendError::Closed));
        // Removal is the worker's job
        assert!(registry.contains(conn.id()));
    }

    #[tokio::test]
    async fn full_queue_drops_without_waiting() {
        let registry = ConnectionRegistry::new();
        let (near, _far) = tokio::io::duplex(1024);
        // Writer not running, so nothing drains the queue
        let (conn, _outbound) = registry.register(FrameWriter::new(near).boxed(), PeerAddress::new("test"));

        for _ in 0..OUTBOUND_QUEUE_CAPACITY {
            conn.send_text("peer2: hi").unwrap();
        }
        assert_eq!(conn.send_text("peer2: hi"), Err(SendError::QueueFull));
        assert!(conn.is_open());
    }
}
