//! # rendezvous-core
//!
//! Shared vocabulary for the rendezvous relay:
//!
//! - **Identifiers**: [`ids::ClientId`] (client-supplied) and [`ids::ConnectionId`] (server-generated)
//! - **Envelopes**: [`envelope::ClientMessage`] (inbound) and [`envelope::ServerMessage`] (outbound)
//! - **Tokens**: [`token::ServerToken`] and [`token::fingerprint`]
//! - **Errors**: [`errors::EnvelopeError`]
//! - **Logging**: [`logging::init_subscriber`]
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by the settings, server, and agent crates.

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod token;

pub use envelope::{ClientMessage, PortsReport, ServerMessage, StatusReport};
pub use errors::EnvelopeError;
pub use ids::{ClientId, ConnectionId};
pub use logging::LogFormat;
pub use token::{ServerToken, fingerprint};

/// Current time as an RFC 3339 UTC string, the timestamp format of every
/// outbound envelope.
pub fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339()
}
