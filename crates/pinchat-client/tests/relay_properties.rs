//! Property-based tests for the client's receive path
//!
//! Whatever mix of relay frames and junk the host sends, the session keeps
//! exactly the well-formed relays, in arrival order, split at the first
//! separator.

use std::time::Duration;

use pinchat_client::{ClientConfig, ClientSession, Environment};
use pinchat_core::{FrameReader, FrameWriter};
use proptest::prelude::*;

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

#[derive(Debug, Clone)]
enum Incoming {
    Relay { sender: String, content: String },
    /// Text with no separator
    Junk(String),
}

impl Incoming {
    fn text(&self) -> String {
        match self {
            Self::Relay { sender, content } => format!("{sender}: {content}"),
            Self::Junk(text) => text.clone(),
        }
    }
}

fn incoming() -> impl Strategy<Value = Incoming> {
    prop_oneof![
        3 => ("[a-z0-9]{1,10}", "[ -~]{0,40}")
            .prop_map(|(sender, content)| Incoming::Relay { sender, content }),
        1 => "[a-zA-Z0-9 ]{0,20}".prop_map(Incoming::Junk),
    ]
}

/// Admit the client, send every frame, hang up, and return what it kept.
fn deliver(frames: &[Incoming]) -> Vec<(String, String)> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

    runtime.block_on(async {
        let (client, host) = tokio::io::duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(host);
        let mut reader = FrameReader::new(read_half);
        let mut writer = FrameWriter::new(write_half);

        let admit = async {
            writer.write_text("AUTH_REQUEST").await.unwrap();
            reader.read_text().await.unwrap();
            writer.write_text("AUTH_SUCCESS").await.unwrap();
        };
        let (session, ()) =
            tokio::join!(ClientSession::handshake(client, "1", TestEnv, ClientConfig::default()), admit);
        let session = session.unwrap();

        for frame in frames {
            writer.write_text(&frame.text()).await.unwrap();
        }
        writer.shutdown().await.unwrap();
        session.closed().await;

        session.messages(None).iter().map(|m| (m.sender().to_string(), m.content().to_string())).collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_only_well_formed_relays_are_kept(frames in prop::collection::vec(incoming(), 0..20)) {
        let expected: Vec<_> = frames
            .iter()
            .filter_map(|frame| match frame {
                Incoming::Relay { sender, content } => Some((sender.clone(), content.clone())),
                Incoming::Junk(_) => None,
            })
            .collect();

        // PROPERTY: junk is dropped without ending the session early
        prop_assert_eq!(deliver(&frames), expected);
    }
}
