//! Client session against a scripted host over an in-memory pipe.

use std::time::Duration;

use pinchat_client::{ClientConfig, ClientError, ClientSession, ClientState, Environment};
use pinchat_core::{ConnectionError, FrameReader, FrameWriter};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

#[derive(Clone)]
struct TestEnv;

impl Environment for TestEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        buffer.fill(0);
    }
}

/// Host side of the pipe.
struct ScriptedHost {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: FrameWriter<WriteHalf<DuplexStream>>,
}

impl ScriptedHost {
    async fn send(&mut self, text: &str) {
        self.writer.write_text(text).await.unwrap();
    }

    async fn recv(&mut self) -> Option<String> {
        self.reader.read_text().await.unwrap()
    }

    /// Challenge, check the secret, reply.
    async fn admit(&mut self, pin: &str) -> bool {
        self.send("AUTH_REQUEST").await;
        let candidate = self.recv().await.unwrap();
        let ok = candidate == pin;
        self.send(if ok { "AUTH_SUCCESS" } else { "AUTH_FAILED" }).await;
        ok
    }
}

fn pipe() -> (DuplexStream, ScriptedHost) {
    pipe_with_capacity(4096)
}

fn pipe_with_capacity(capacity: usize) -> (DuplexStream, ScriptedHost) {
    let (client, host) = tokio::io::duplex(capacity);
    let (read_half, write_half) = tokio::io::split(host);
    (client, ScriptedHost { reader: FrameReader::new(read_half), writer: FrameWriter::new(write_half) })
}

async fn connected(pin: &str) -> (ClientSession<TestEnv>, ScriptedHost) {
    let (stream, mut host) = pipe();
    let (session, admitted) = tokio::join!(
        ClientSession::handshake(stream, pin, TestEnv, ClientConfig::default()),
        host.admit("482913"),
    );
    assert!(admitted);
    (session.unwrap(), host)
}

#[tokio::test]
async fn handshake_success_then_relay() {
    let (session, mut host) = connected("482913").await;
    assert!(session.is_connected());
    assert_eq!(session.state(), ClientState::Connected);

    host.send("peer2: hi").await;
    host.send("host: note: bring snacks").await;

    session.send("hello all").await.unwrap();
    assert_eq!(host.recv().await.as_deref(), Some("hello all"));

    // Close from the host side and let the receive loop drain
    host.writer.shutdown().await.unwrap();
    session.closed().await;

    let rendered: Vec<_> =
        session.messages(None).iter().map(|m| format!("{}: {}", m.sender(), m.content())).collect();
    assert!(rendered.contains(&"peer2: hi".to_string()));
    assert!(rendered.contains(&"host: note: bring snacks".to_string()));
    assert!(rendered.contains(&"me: hello all".to_string()));
}

#[tokio::test]
async fn rejected_secret_surfaces_auth_failed() {
    let (stream, mut host) = pipe();
    let (session, admitted) = tokio::join!(
        ClientSession::handshake(stream, "000000", TestEnv, ClientConfig::default()),
        host.admit("482913"),
    );

    assert!(!admitted);
    let err = session.unwrap_err();
    assert!(err.is_rejected());
    assert_eq!(err, ClientError::AuthFailed(ConnectionError::AuthRejected));
}

#[tokio::test]
async fn unexpected_challenge_is_fatal() {
    let (stream, mut host) = pipe();
    let (session, ()) = tokio::join!(
        ClientSession::handshake(stream, "482913", TestEnv, ClientConfig::default()),
        host.send("HELLO"),
    );

    assert!(matches!(
        session.unwrap_err(),
        ClientError::AuthFailed(ConnectionError::UnexpectedToken { expected: "AUTH_REQUEST", .. })
    ));
}

#[tokio::test]
async fn host_hangup_mid_handshake() {
    let (stream, mut host) = pipe();
    host.send("AUTH_REQUEST").await;
    drop(host);

    let err = ClientSession::handshake(stream, "482913", TestEnv, ClientConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::AuthFailed(_)));
    assert!(!err.is_rejected());
}

#[tokio::test(start_paused = true)]
async fn silent_host_times_out() {
    let (stream, _host) = pipe();
    let config = ClientConfig { handshake_timeout: Duration::from_secs(5), ..ClientConfig::default() };

    let err = ClientSession::handshake(stream, "482913", TestEnv, config).await.unwrap_err();
    assert_eq!(
        err,
        ClientError::AuthFailed(ConnectionError::HandshakeTimeout { elapsed: Duration::from_secs(5) })
    );
}

#[tokio::test]
async fn malformed_relay_is_dropped() {
    let (session, mut host) = connected("482913").await;

    host.send("no separator here").await;
    host.writer.write_frame(&[0xff, 0xfe]).await.unwrap();
    host.send("peer3: still flowing").await;
    host.writer.shutdown().await.unwrap();
    session.closed().await;

    let messages = session.messages(None);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender(), "peer3");
    assert_eq!(messages[0].content(), "still flowing");
}

#[tokio::test]
async fn host_disconnect_marks_session_closed() {
    let (session, host) = connected("482913").await;
    drop(host);

    session.closed().await;
    assert!(!session.is_connected());
    assert_eq!(session.send("anyone?").await, Err(ClientError::NotConnected));
}

#[tokio::test]
async fn oversized_send_is_rejected_locally() {
    let (session, _host) = connected("482913").await;
    let too_long = "x".repeat(1025);

    assert!(matches!(session.send(&too_long).await, Err(ClientError::MessageTooLong { .. })));
    assert!(session.is_connected());
    assert!(session.messages(None).is_empty());
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let (session, mut host) = connected("482913").await;

    session.disconnect().await;
    assert_eq!(session.state(), ClientState::Closed);
    assert_eq!(host.recv().await, None);

    session.disconnect().await;
}

#[tokio::test]
async fn disconnect_aborts_a_send_the_host_never_reads() {
    let (stream, mut host) = pipe_with_capacity(64);
    let (session, admitted) = tokio::join!(
        ClientSession::handshake(stream, "482913", TestEnv, ClientConfig::default()),
        host.admit("482913"),
    );
    assert!(admitted);
    let session = session.unwrap();

    // Far larger than the pipe, and the host stops reading
    let big = "x".repeat(1000);
    let (sent, disconnected) = tokio::join!(session.send(&big), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::time::timeout(Duration::from_secs(2), session.disconnect()).await
    });

    assert!(disconnected.is_ok());
    assert_eq!(sent, Err(ClientError::NotConnected));
    assert!(!session.is_connected());
    assert!(!session.messages(None).iter().any(|m| m.content() == big));
    drop(host);
}

#[tokio::test(start_paused = true)]
async fn stalled_send_times_out_and_disconnects() {
    let (stream, mut host) = pipe_with_capacity(64);
    let config = ClientConfig { write_timeout: Duration::from_millis(100), ..ClientConfig::default() };
    let (session, admitted) =
        tokio::join!(ClientSession::handshake(stream, "482913", TestEnv, config), host.admit("482913"));
    assert!(admitted);
    let session = session.unwrap();

    let err = session.send(&"x".repeat(1000)).await.unwrap_err();
    assert!(matches!(err, ClientError::Write(_)));
    assert!(!session.is_connected());
    assert_eq!(session.send("again").await, Err(ClientError::NotConnected));
    drop(host);
}
