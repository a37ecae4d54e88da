//! Deterministic test harness for Pinchat.
//!
//! Simulation implementations of the [`pinchat_core::Environment`] and
//! transport traits, so host and client can be exercised end to end without
//! real sockets or real time.
//!
//! - [`SimEnv`]: tokio clock plus seeded RNG
//! - [`MemoryTransport`]: in-process duplex pipes addressed by service name
//! - [`SimTransport`]: turmoil simulated TCP, for network fault scenarios

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod memory_transport;
pub mod sim_env;
pub mod sim_transport;

pub use memory_transport::{MemoryListener, MemoryTransport};
pub use sim_env::{DEFAULT_SEED, SimEnv};
pub use sim_transport::{SIM_PORT, SimListener, SimTransport};
