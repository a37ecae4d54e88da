//! Host and clients over turmoil's simulated network.
//!
//! The simulation seeds every environment identically, so a client can derive
//! the host's PIN by drawing from its own `SimEnv`. That doubles as a check
//! that PIN generation is deterministic under a fixed seed.

use std::time::Duration;

use pinchat_client::{ClientConfig, ClientSession};
use pinchat_core::{AuthGate, DEFAULT_PIN_LENGTH, PeerAddress};
use pinchat_harness::{SIM_PORT, SimEnv, SimTransport};
use pinchat_server::{Host, HostConfig};

fn expected_pin() -> String {
    AuthGate::new().generate(&SimEnv::new(), DEFAULT_PIN_LENGTH).unwrap().as_str().to_string()
}

fn host_address() -> PeerAddress {
    PeerAddress::new(format!("host:{SIM_PORT}"))
}

async fn join(pin: &str) -> Result<ClientSession<SimEnv>, pinchat_client::ClientError> {
    ClientSession::connect(
        &SimTransport::default(),
        &host_address(),
        pin,
        SimEnv::new(),
        ClientConfig::default(),
    )
    .await
}

/// Wait until `session` holds a message from `sender` with `content`.
async fn wait_for(session: &ClientSession<SimEnv>, sender: &str, content: &str) {
    while !session.messages(None).iter().any(|m| m.sender() == sender && m.content() == content) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn transcript(session: &ClientSession<SimEnv>) -> String {
    session
        .messages(None)
        .iter()
        .map(|m| format!("{}: {}", m.sender(), m.content()))
        .collect::<Vec<_>>()
        .join(" | ")
}

#[test]
fn three_peers_chat_through_host() {
    let mut sim = turmoil::Builder::new().build();

    sim.host("host", || async {
        let host = Host::start(&SimTransport::default(), SimEnv::new(), HostConfig::default()).await?;
        assert_eq!(host.pin().as_str(), expected_pin());

        while host.registry().len() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        host.send("welcome")?;

        std::future::pending::<()>().await;
        Ok(())
    });

    // Staggered joins fix the peer numbering: alice=peer1, bob=peer2, carol=peer3
    for (name, delay_ms) in [("alice", 0), ("carol", 200)] {
        sim.client(name, async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let session = join(&expected_pin()).await?;

            wait_for(&session, "peer2", "hi").await;
            insta::allow_duplicates! {
                insta::assert_snapshot!(transcript(&session), @"host: welcome | peer2: hi");
            }
            Ok(())
        });
    }

    sim.client("bob", async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let session = join(&expected_pin()).await?;

        wait_for(&session, "host", "welcome").await;
        session.send("hi").await?;

        // Give the relay time to reach everyone else; nothing comes back here
        tokio::time::sleep(Duration::from_secs(1)).await;
        insta::assert_snapshot!(transcript(&session), @"host: welcome | me: hi");
        Ok(())
    });

    sim.run().unwrap();
}

#[test]
fn wrong_pin_is_refused_over_the_network() {
    let mut sim = turmoil::Builder::new().build();

    sim.host("host", || async {
        let _host = Host::start(&SimTransport::default(), SimEnv::new(), HostConfig::default()).await?;
        std::future::pending::<()>().await;
        Ok(())
    });

    sim.client("intruder", async {
        let wrong = if expected_pin() == "000000" { "111111" } else { "000000" };
        let err = join(wrong).await.unwrap_err();
        assert!(err.is_rejected());
        Ok(())
    });

    sim.run().unwrap();
}
