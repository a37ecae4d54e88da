//! Fuzz target for the host connection state machine
//!
//! Drives a `HostConnection` with arbitrary operation sequences and checks
//! that no sequence can reach `Streaming` without the correct secret.
//!
//! # Invariants
//!
//! - Nothing panics; out-of-order operations return `InvalidState`
//! - `Register` is emitted only in reply to the exact secret
//! - `Streaming` implies a registered peer and a validated secret
//! - `Closed` is terminal

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pinchat_core::{AuthGate, ConnectionError, Environment, HostAction, HostConnection, HostState};

#[derive(Clone)]
struct FuzzEnv;

impl Environment for FuzzEnv {
    type Instant = Duration;

    fn now(&self) -> Duration {
        Duration::ZERO
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = (i * 7 % 10) as u8;
        }
    }
}

#[derive(Debug, Arbitrary)]
enum Op {
    Accept,
    Candidate(String),
    CorrectCandidate,
    HandshakeFailed,
    Registered(u8),
    Message(String),
    Close,
}

fuzz_target!(|ops: Vec<Op>| {
    let gate = AuthGate::new();
    let Ok(secret) = gate.generate(&FuzzEnv, 6) else {
        return;
    };

    let mut conn = HostConnection::new(64);
    let mut validated = false;

    for op in ops {
        let before = conn.state();

        match op {
            Op::Accept => {
                let _ = conn.accept();
            },
            Op::Candidate(candidate) => {
                if let Ok(actions) = conn.handle_candidate(&candidate, &gate) {
                    let admitted = actions.contains(&HostAction::Register);
                    assert_eq!(admitted, candidate == secret.as_str());
                    validated |= admitted;
                }
            },
            Op::CorrectCandidate => {
                if let Ok(actions) = conn.handle_candidate(secret.as_str(), &gate) {
                    assert!(actions.contains(&HostAction::Register));
                    validated = true;
                }
            },
            Op::HandshakeFailed => {
                if matches!(before, HostState::AwaitingAuth | HostState::Closed) {
                    let actions = conn.handshake_failed(&ConnectionError::Closed);
                    assert!(!actions.contains(&HostAction::Register));
                }
            },
            Op::Registered(n) => {
                let _ = conn.registered(format!("peer{n}"));
            },
            Op::Message(content) => {
                let too_long = content.len() > 64;
                match conn.handle_message(content) {
                    Ok(actions) => assert_eq!(actions.len(), 2),
                    Err(ConnectionError::MessageTooLong { .. }) => assert!(too_long),
                    Err(_) => assert_ne!(before, HostState::Streaming),
                }
            },
            Op::Close => {
                conn.close();
            },
        }

        if conn.state() == HostState::Streaming {
            assert!(validated);
            assert!(conn.peer_id().is_some());
        }
        if before == HostState::Closed {
            assert_eq!(conn.state(), HostState::Closed);
        }
    }
});
