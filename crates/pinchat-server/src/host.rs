//! Host session: accept loop and per-connection workers.
//!
//! One task runs the accept loop and hands each inbound stream to its own
//! worker task, so a slow handshake or a stalled peer only ever blocks its own
//! worker. Each worker drives a [`HostConnection`] state machine and executes
//! the actions it returns:
//!
//! ```text
//! accept ─> AUTH_REQUEST ─> read candidate ─┬─> AUTH_SUCCESS ─> register ─> stream loop ─> unregister
//!                                           └─> AUTH_FAILED ─> close
//! ```
//!
//! Shutdown cancels a token observed by the accept loop and every worker,
//! closes all registered connections, and stops store eviction.

use std::{sync::Arc, time::Duration};

use pinchat_core::{
    AuthGate, BoxedWriter, ByteStream, ConnectionError, DEFAULT_EVICTION_INTERVAL,
    DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_PIN_LENGTH, DEFAULT_RETENTION, Environment, FrameError,
    FrameReader, FrameWriter, HostAction, HostConnection, HostState, MAX_FRAME_PAYLOAD,
    MessageStore, PeerAddress, Secret, Token, TransportError, TransportListener,
    TransportProvider,
};
use tokio::{io::AsyncRead, task::JoinHandle};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    error::HostError,
    registry::{ConnectionRegistry, DEFAULT_WRITE_TIMEOUT, PeerConnection, PeerId},
    router::{BroadcastReport, BroadcastRouter},
};

/// Service name advertised when none is configured.
pub const DEFAULT_SERVICE_NAME: &str = "pinchat";

/// How long a peer has to answer the challenge.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Sender name for messages typed on the host.
pub const HOST_SENDER: &str = "host";

/// Host configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Name the transport advertises
    pub service_name: String,
    /// Digits in the session PIN
    pub pin_length: usize,
    /// How long messages stay readable
    pub retention: Duration,
    /// Period of the background eviction sweep
    pub eviction_interval: Duration,
    /// Bound on the challenge/response exchange
    pub handshake_timeout: Duration,
    /// Bound on a single frame write to a peer
    pub write_timeout: Duration,
    /// Largest accepted application message, in bytes
    pub max_message_bytes: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            pin_length: DEFAULT_PIN_LENGTH,
            retention: DEFAULT_RETENTION,
            eviction_interval: DEFAULT_EVICTION_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl HostConfig {
    fn validate(&self) -> Result<(), HostError> {
        if self.retention.is_zero() {
            return Err(HostError::Config("retention must be non-zero".to_string()));
        }
        if self.eviction_interval.is_zero() {
            return Err(HostError::Config("eviction interval must be non-zero".to_string()));
        }
        if self.handshake_timeout.is_zero() || self.write_timeout.is_zero() {
            return Err(HostError::Config("timeouts must be non-zero".to_string()));
        }
        if self.max_message_bytes == 0 || self.max_message_bytes > MAX_FRAME_PAYLOAD {
            return Err(HostError::Config(format!(
                "max message size must be between 1 and {MAX_FRAME_PAYLOAD} bytes"
            )));
        }
        Ok(())
    }
}

/// State shared by the accept loop, every worker, and the handle.
struct Shared<E: Environment> {
    gate: AuthGate,
    registry: Arc<ConnectionRegistry>,
    router: BroadcastRouter,
    store: MessageStore<E>,
    config: HostConfig,
    shutdown: CancellationToken,
    workers: TaskTracker,
}

/// Entry point for running a host session.
#[derive(Debug)]
pub struct Host;

impl Host {
    /// Generate the session PIN, advertise the service, and start accepting
    /// peers.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start<T, E>(
        transport: &T,
        env: E,
        config: HostConfig,
    ) -> Result<HostHandle<E>, HostError>
    where
        T: TransportProvider,
        E: Environment,
    {
        config.validate()?;

        let gate = AuthGate::new();
        let pin = gate.generate(&env, config.pin_length)?;

        let listener = transport.advertise(&config.service_name).await?;
        let local_addr = listener.local_addr();

        let registry = Arc::new(ConnectionRegistry::new());
        let shared = Arc::new(Shared {
            gate,
            router: BroadcastRouter::new(Arc::clone(&registry)),
            registry,
            store: MessageStore::new(env, config.retention),
            shutdown: CancellationToken::new(),
            workers: TaskTracker::new(),
            config,
        });

        let eviction = shared.store.spawn_eviction(shared.config.eviction_interval);
        let accept = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));

        tracing::info!(
            service = %shared.config.service_name,
            address = %local_addr.as_ref().map_or_else(|| "-".to_string(), ToString::to_string),
            pin_length = pin.len(),
            "host started"
        );

        Ok(HostHandle { shared, pin, local_addr, accept, eviction })
    }
}

/// Control surface for a running host.
pub struct HostHandle<E: Environment> {
    shared: Arc<Shared<E>>,
    pin: Secret,
    local_addr: Option<PeerAddress>,
    accept: JoinHandle<()>,
    eviction: JoinHandle<()>,
}

impl<E: Environment> std::fmt::Debug for HostHandle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostHandle")
            .field("local_addr", &self.local_addr)
            .field("peers", &self.shared.registry.len())
            .finish_non_exhaustive()
    }
}

impl<E: Environment> HostHandle<E> {
    /// The session PIN, for display to the operator.
    pub fn pin(&self) -> &Secret {
        &self.pin
    }

    /// Registry of authenticated peers.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.shared.registry
    }

    /// Session message history.
    pub fn store(&self) -> &MessageStore<E> {
        &self.shared.store
    }

    /// Address peers connect to, if the transport has one.
    pub fn local_addr(&self) -> Option<&PeerAddress> {
        self.local_addr.as_ref()
    }

    /// Currently connected peers, in connection order.
    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.shared.registry.peer_ids()
    }

    /// Store a message from the host and queue it for every peer.
    pub fn send(&self, content: &str) -> Result<BroadcastReport, HostError> {
        let max = self.shared.config.max_message_bytes;
        if content.len() > max {
            return Err(HostError::MessageTooLong { size: content.len(), max });
        }

        self.shared.store.add(HOST_SENDER, content);
        Ok(self.shared.router.broadcast(HOST_SENDER, content, None))
    }

    /// Stop accepting, close every connection, and stop eviction.
    ///
    /// Returns once the accept loop and every worker have exited.
    pub async fn shutdown(self) {
        tracing::info!("host shutting down");

        self.shared.shutdown.cancel();
        self.shared.workers.close();

        if let Err(e) = self.accept.await {
            tracing::warn!(error = %e, "accept loop panicked");
        }

        let closed = self.shared.registry.close_all();
        self.shared.workers.wait().await;

        self.shared.store.stop();
        if let Err(e) = self.eviction.await {
            tracing::warn!(error = %e, "eviction task panicked");
        }

        tracing::info!(closed, "host stopped");
    }
}

async fn accept_loop<L, E>(mut listener: L, shared: Arc<Shared<E>>)
where
    L: TransportListener,
    E: Environment,
{
    loop {
        let accepted = tokio::select! {
            () = shared.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, address)) => {
                tracing::debug!(%address, "incoming connection");
                shared.workers.spawn(run_connection(stream, address, Arc::clone(&shared)));
            },
            Err(TransportError::Closed) => {
                tracing::info!("listener closed");
                break;
            },
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
            },
        }
    }

    tracing::debug!("accept loop stopped");
}

/// Full lifecycle of one accepted stream.
async fn run_connection<S, E>(stream: S, address: PeerAddress, shared: Arc<Shared<E>>)
where
    S: ByteStream,
    E: Environment,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FrameReader::new(read_half);

    let mut worker = Worker {
        conn: HostConnection::new(shared.config.max_message_bytes),
        writer: Some(FrameWriter::new(write_half).boxed()),
        peer: None,
        address,
        shared,
    };

    match worker.handshake(&mut reader).await {
        Ok(()) if worker.conn.state() == HostState::Streaming => worker.stream(&mut reader).await,
        Ok(()) => {},
        Err(e) => {
            tracing::debug!(address = %worker.address, error = %e, "handshake aborted");
        },
    }

    worker.finish().await;
}

struct Worker<E: Environment> {
    shared: Arc<Shared<E>>,
    conn: HostConnection,
    address: PeerAddress,
    /// Write half until registration moves it into the registry
    writer: Option<BoxedWriter>,
    peer: Option<Arc<PeerConnection>>,
}

impl<E: Environment> Worker<E> {
    async fn handshake<R>(&mut self, reader: &mut FrameReader<R>) -> Result<(), ConnectionError>
    where
        R: AsyncRead + Send + Unpin,
    {
        let actions = self.conn.accept()?;
        self.execute(actions).await?;

        let timeout = self.shared.config.handshake_timeout;
        let candidate = tokio::select! {
            () = self.shared.shutdown.cancelled() => Err(ConnectionError::Closed),
            read = tokio::time::timeout(timeout, reader.read_text()) => match read {
                Ok(Ok(Some(text))) => Ok(text),
                Ok(Ok(None)) => Err(ConnectionError::Closed),
                Ok(Err(e)) => Err(ConnectionError::from(e)),
                Err(_) => Err(ConnectionError::HandshakeTimeout { elapsed: timeout }),
            },
        };

        let actions = match candidate {
            Ok(candidate) => self.conn.handle_candidate(&candidate, &self.shared.gate)?,
            Err(e) => {
                tracing::info!(address = %self.address, error = %e, "handshake failed");
                self.conn.handshake_failed(&e)
            },
        };

        self.execute(actions).await
    }

    async fn stream<R>(&mut self, reader: &mut FrameReader<R>)
    where
        R: AsyncRead + Send + Unpin,
    {
        let Some(peer_id) = self.peer.as_ref().map(|peer| peer.peer_id()) else {
            return;
        };

        loop {
            let read = tokio::select! {
                () = self.shared.shutdown.cancelled() => break,
                read = reader.read_text() => read,
            };

            let content = match read {
                Ok(Some(content)) => content,
                Ok(None) => {
                    tracing::debug!(peer = %peer_id, "end of stream");
                    break;
                },
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(peer = %peer_id, error = %e, "dropping malformed frame");
                    continue;
                },
                Err(e) => {
                    tracing::info!(peer = %peer_id, error = %e, "read failed");
                    break;
                },
            };

            match self.conn.handle_message(content) {
                Ok(actions) => {
                    if let Err(e) = self.execute(actions).await {
                        tracing::warn!(peer = %peer_id, error = %e, "relay failed");
                        break;
                    }
                },
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(peer = %peer_id, error = %e, "dropping message");
                },
                Err(e) => {
                    tracing::warn!(peer = %peer_id, error = %e, "closing connection");
                    break;
                },
            }
        }
    }

    async fn execute(&mut self, actions: Vec<HostAction>) -> Result<(), ConnectionError> {
        for action in actions {
            match action {
                HostAction::Send(token) => self.send_token(token).await?,
                HostAction::Register => self.register()?,
                HostAction::Store { content } => {
                    if let Some(peer) = &self.peer {
                        self.shared.store.add(peer.peer_id().to_string(), content);
                    }
                },
                HostAction::Broadcast { content } => {
                    if let Some(peer) = &self.peer {
                        let sender = peer.peer_id().to_string();
                        self.shared.router.broadcast(&sender, &content, Some(peer.id()));
                    }
                },
                HostAction::Close { reason } => {
                    tracing::info!(address = %self.address, reason = %reason, "closing connection");
                    self.close_writer().await;
                },
            }
        }
        Ok(())
    }

    async fn send_token(&mut self, token: Token) -> Result<(), ConnectionError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(ConnectionError::Closed);
        };

        let timeout = self.shared.config.write_timeout;
        let result = match tokio::time::timeout(timeout, writer.write_text(token.as_str())).await {
            Ok(result) => result,
            Err(_) => Err(FrameError::Io(format!("write timed out after {timeout:?}"))),
        };

        match result {
            Ok(()) => {
                tracing::debug!(address = %self.address, %token, "sent");
                Ok(())
            },
            Err(e) => {
                // A partial frame may be on the wire: never write after it
                self.writer = None;

                // Best effort: the peer may already be gone
                if token == Token::AuthFailed {
                    tracing::debug!(address = %self.address, error = %e, "could not deliver AUTH_FAILED");
                    Ok(())
                } else {
                    Err(e.into())
                }
            },
        }
    }

    fn register(&mut self) -> Result<(), ConnectionError> {
        let writer = self.writer.take().ok_or(ConnectionError::Closed)?;
        let (peer, outbound) = self.shared.registry.register(writer, self.address.clone());
        self.shared.workers.spawn(outbound.run(self.shared.config.write_timeout));
        self.peer = Some(Arc::clone(&peer));
        self.conn.registered(peer.peer_id().to_string())?;

        tracing::info!(
            peer = %peer.peer_id(),
            address = %self.address,
            peers = %format_peers(&self.shared.registry.peer_ids()),
            "peer connected"
        );
        Ok(())
    }

    async fn close_writer(&mut self) {
        if let Some(mut writer) = self.writer.take()
            && let Err(e) = writer.shutdown().await
        {
            tracing::debug!(address = %self.address, error = %e, "shutdown failed");
        }
    }

    /// Close the stream and leave the registry. The only place a connection
    /// is unregistered, apart from host shutdown.
    async fn finish(mut self) {
        let was_registered = self.conn.close();
        self.close_writer().await;

        if let Some(peer) = self.peer.take() {
            debug_assert!(was_registered);
            self.shared.registry.unregister(peer.id());
            peer.close();

            tracing::info!(
                peer = %peer.peer_id(),
                peers = %format_peers(&self.shared.registry.peer_ids()),
                "peer disconnected"
            );
        }
    }
}

fn format_peers(peers: &[PeerId]) -> String {
    if peers.is_empty() {
        return "(none)".to_string();
    }
    peers.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}
