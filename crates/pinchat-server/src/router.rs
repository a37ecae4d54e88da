//! Fan-out of relayed messages to registered peers.

use std::sync::Arc;

use pinchat_core::RelayFrame;

use crate::registry::{ConnectionId, ConnectionRegistry};

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections that accepted the frame into their outbound queue
    pub delivered: usize,
    /// Connections that were closed or too far behind to take it
    pub failed: usize,
}

/// Queues relay frames on every registered connection except the
/// originator.
///
/// Broadcasting never waits on a peer: each connection's writer task does the
/// I/O. A failure is logged and counted, never propagated. The failing
/// connection stays registered until its own worker unregisters it.
#[derive(Debug, Clone)]
pub struct BroadcastRouter {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastRouter {
    /// Create a router over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Queue `"<sender>: <content>"` for every connection in a registry
    /// snapshot except `exclude`.
    pub fn broadcast(&self, sender: &str, content: &str, exclude: Option<ConnectionId>) -> BroadcastReport {
        let frame = RelayFrame::new(sender, content).encode();
        let mut report = BroadcastReport::default();

        for (peer_id, conn) in self.registry.snapshot() {
            if Some(conn.id()) == exclude {
                continue;
            }

            match conn.send_text(&frame) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(peer = %peer_id, error = %e, "relay dropped");
                    report.failed += 1;
                },
            }
        }

        tracing::debug!(sender, delivered = report.delivered, failed = report.failed, "broadcast");
        report
    }
}
