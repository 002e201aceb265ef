//! # rendezvous-server
//!
//! Loopback-only WebSocket relay that lets two peers find each other and
//! trade handshake messages.
//!
//! - Relay listener: `register` first, then `ping`, `handshake`, `forward`,
//!   and `shutdown` per session
//! - Connection registry keyed by client identifier, with RAII slot release
//! - Status listener: one-shot status push, `/health`, `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod status;

pub use config::ServerConfig;
pub use errors::{RegistryError, ServerError};
pub use registry::Registry;
pub use server::{ListenAddrs, RendezvousServer};
pub use shutdown::{ListenerTask, ShutdownCoordinator};
