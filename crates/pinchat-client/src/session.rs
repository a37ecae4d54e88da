//! Client session: handshake, then concurrent send and receive.
//!
//! The handshake runs inline on the caller's task. Once connected, a
//! background task reads relay frames into the local [`MessageStore`] while
//! [`ClientSession::send`] writes directly to the stream.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use pinchat_core::{
    BoxedWriter, ByteStream, ClientConnection, ClientState, ConnectionError,
    DEFAULT_EVICTION_INTERVAL, DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_RETENTION, Environment,
    FrameError, FrameReader, FrameWriter, Message, MessageStore, PeerAddress, TransportProvider,
};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;

/// Sender name for messages this client sent.
pub const LOCAL_SENDER: &str = "me";

/// How long the client waits for the host to finish the handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on writing one message to the host.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bound on the whole challenge/response exchange
    pub handshake_timeout: Duration,
    /// How long received messages stay readable
    pub retention: Duration,
    /// Period of the background eviction sweep
    pub eviction_interval: Duration,
    /// Largest message [`ClientSession::send`] accepts
    pub max_message_bytes: usize,
    /// Bound on a single write to the host
    pub write_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            retention: DEFAULT_RETENTION,
            eviction_interval: DEFAULT_EVICTION_INTERVAL,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// An authenticated connection to a host.
pub struct ClientSession<E: Environment> {
    state: Arc<Mutex<ClientConnection>>,
    writer: tokio::sync::Mutex<BoxedWriter>,
    store: MessageStore<E>,
    max_message_bytes: usize,
    write_timeout: Duration,
    /// Cancelled to stop the receive loop and abort in-flight writes
    cancel: CancellationToken,
    /// Cancelled by the receive loop when it exits
    closed: CancellationToken,
}

impl<E: Environment> std::fmt::Debug for ClientSession<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("state", &self.state())
            .field("messages", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl<E: Environment> ClientSession<E> {
    /// Connect to `address` and authenticate with `secret`.
    pub async fn connect<T>(
        transport: &T,
        address: &PeerAddress,
        secret: &str,
        env: E,
        config: ClientConfig,
    ) -> Result<Self, ClientError>
    where
        T: TransportProvider,
    {
        tracing::debug!(%address, "connecting");
        let stream = transport.connect(address).await?;
        Self::handshake(stream, secret, env, config).await
    }

    /// Authenticate over an already connected stream.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn handshake<S>(
        stream: S,
        secret: &str,
        env: E,
        config: ClientConfig,
    ) -> Result<Self, ClientError>
    where
        S: ByteStream,
    {
        let mut conn = ClientConnection::new();
        conn.stream_opened().map_err(ClientError::AuthFailed)?;

        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FrameReader::new(read_half);
        let mut writer = FrameWriter::new(write_half).boxed();

        let timeout = config.handshake_timeout;
        let outcome =
            match tokio::time::timeout(timeout, exchange(&mut conn, &mut reader, &mut writer, secret))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ConnectionError::HandshakeTimeout { elapsed: timeout }),
            };

        if let Err(e) = outcome {
            conn.close();
            if let Err(shutdown) = writer.shutdown().await {
                tracing::debug!(error = %shutdown, "shutdown after failed handshake");
            }
            tracing::info!(error = %e, "handshake failed");
            return Err(ClientError::AuthFailed(e));
        }

        debug_assert_eq!(conn.state(), ClientState::Connected);
        tracing::info!("connected");

        let store = MessageStore::new(env, config.retention);
        // Detached: stopped through `MessageStore::stop`
        drop(store.spawn_eviction(config.eviction_interval));

        let state = Arc::new(Mutex::new(conn));
        let cancel = CancellationToken::new();
        let closed = CancellationToken::new();

        tokio::spawn(receive_loop(
            reader,
            Arc::clone(&state),
            store.clone(),
            cancel.clone(),
            closed.clone(),
        ));

        Ok(Self {
            state,
            writer: tokio::sync::Mutex::new(writer),
            store,
            max_message_bytes: config.max_message_bytes,
            write_timeout: config.write_timeout,
            cancel,
            closed,
        })
    }

    /// Send a message to the host and record it locally as sent by
    /// [`LOCAL_SENDER`].
    ///
    /// A write failure or timeout disconnects the session. A concurrent
    /// [`ClientSession::disconnect`] aborts the write with
    /// [`ClientError::NotConnected`].
    pub async fn send(&self, content: &str) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        if content.len() > self.max_message_bytes {
            return Err(ClientError::MessageTooLong {
                size: content.len(),
                max: self.max_message_bytes,
            });
        }

        let timeout = self.write_timeout;
        let write = async {
            let mut writer = self.writer.lock().await;
            match tokio::time::timeout(timeout, writer.write_text(content)).await {
                Ok(result) => result,
                Err(_) => Err(FrameError::Io(format!("write timed out after {timeout:?}"))),
            }
        };

        let written = tokio::select! {
            () = self.cancel.cancelled() => return Err(ClientError::NotConnected),
            written = write => written,
        };
        if let Err(e) = written {
            // A partial frame may be on the wire, so the stream is unusable
            tracing::info!(error = %e, "send failed, disconnecting");
            self.mark_closed();
            return Err(e.into());
        }

        self.store.add(LOCAL_SENDER, content);
        Ok(())
    }

    /// Up to `limit` most recent unexpired messages, oldest first.
    pub fn messages(&self, limit: Option<usize>) -> Vec<Message<E::Instant>> {
        self.store.get(limit)
    }

    /// Local message history.
    pub fn store(&self) -> &MessageStore<E> {
        &self.store
    }

    /// True until the stream breaks or [`ClientSession::disconnect`] runs.
    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    /// Current connection state.
    pub fn state(&self) -> ClientState {
        lock(&self.state).state()
    }

    /// Resolves once the receive loop has exited.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Close the connection and stop background work. Idempotent.
    ///
    /// Aborts any in-flight [`ClientSession::send`] first, so it never waits
    /// on a host that stopped reading.
    pub async fn disconnect(&self) {
        self.mark_closed();

        let shutdown = async { self.writer.lock().await.shutdown().await };
        match tokio::time::timeout(self.write_timeout, shutdown).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => tracing::debug!(error = %e, "shutdown failed"),
            Err(_) => tracing::debug!("shutdown timed out"),
        }

        self.closed().await;
        self.store.stop();
    }

    fn mark_closed(&self) {
        lock(&self.state).close();
        self.cancel.cancel();
    }
}

impl<E: Environment> Drop for ClientSession<E> {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.store.stop();
    }
}

/// Challenge, secret, verdict.
async fn exchange<R>(
    conn: &mut ClientConnection,
    reader: &mut FrameReader<R>,
    writer: &mut BoxedWriter,
    secret: &str,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let challenge = read_required(reader).await?;
    conn.handle_challenge(&challenge)?;
    tracing::debug!("challenge received");

    writer.write_text(secret).await?;

    let verdict = read_required(reader).await?;
    conn.handle_auth_response(&verdict)
}

async fn read_required<R>(reader: &mut FrameReader<R>) -> Result<String, ConnectionError>
where
    R: AsyncRead + Unpin,
{
    reader.read_text().await?.ok_or(ConnectionError::Closed)
}

async fn receive_loop<R, E>(
    mut reader: FrameReader<R>,
    state: Arc<Mutex<ClientConnection>>,
    store: MessageStore<E>,
    cancel: CancellationToken,
    closed: CancellationToken,
) where
    R: AsyncRead + Send + Unpin,
    E: Environment,
{
    loop {
        let read = tokio::select! {
            () = cancel.cancelled() => break,
            read = reader.read_text() => read,
        };

        let text = match read {
            Ok(Some(text)) => text,
            Ok(None) => {
                tracing::info!("host closed the connection");
                break;
            },
            Err(e) if e.is_recoverable() => {
                tracing::warn!(error = %e, "dropping malformed frame");
                continue;
            },
            Err(e) => {
                tracing::info!(error = %e, "connection lost");
                break;
            },
        };

        let relay = lock(&state).handle_relay(&text);
        match relay {
            Ok(relay) => {
                store.add(relay.sender, relay.content);
            },
            Err(e) if e.is_recoverable() => {
                tracing::warn!(error = %e, "dropping malformed relay");
            },
            Err(e) => {
                tracing::debug!(error = %e, "receive loop stopping");
                break;
            },
        }
    }

    lock(&state).close();
    closed.cancel();
}

fn lock(state: &Mutex<ClientConnection>) -> MutexGuard<'_, ClientConnection> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
