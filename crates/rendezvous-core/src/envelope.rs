//! Wire envelopes.
//!
//! Every frame is a UTF-8 JSON object with a string `type` discriminator.
//! Inbound frames are decoded leniently: unknown fields are ignored and a
//! field of the wrong JSON type reads as absent. Outbound frames are
//! serialized from [`ServerMessage`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::EnvelopeError;

/// `message` text of the `registered` confirmation.
pub const REGISTERED_MESSAGE: &str = "registered, waiting for peer";
/// `message` text of the `shutdown_ack` reply.
pub const SHUTDOWN_ACK_MESSAGE: &str = "connection closed";
/// `reason` text of `register_rejected`.
pub const DUPLICATE_CLIENT_REASON: &str = "client_id is already registered";

/// A decoded inbound envelope.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientMessage {
    /// First envelope of every session.
    Register {
        /// Requested registry key; `None` when absent, empty, or not a string.
        client_id: Option<String>,
        /// Client token material; only a fingerprint is ever retained.
        token_hash: Option<String>,
    },
    /// Heartbeat.
    Ping,
    /// Relay the raw envelope to `target`.
    Handshake {
        /// Registered identifier to deliver to.
        target: Option<String>,
        /// Sender's self-reported identifier (diagnostic only).
        source: Option<String>,
    },
    /// Relay `payload` alone to `target`.
    Forward {
        /// Registered identifier to deliver to.
        target: Option<String>,
        /// Body to deliver; `{}` when the field is absent.
        payload: Value,
    },
    /// End the session after acknowledging.
    Shutdown,
    /// Well-formed envelope with a `type` the relay does not handle.
    Unrecognized {
        /// The `type` value as received.
        kind: String,
    },
}

impl ClientMessage {
    /// Decode one text frame.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let object: Map<String, Value> = serde_json::from_str(text)?;
        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(EnvelopeError::MissingType)?;

        let message = match kind {
            "register" => Self::Register {
                client_id: string_field(&object, "client_id").filter(|id| !id.is_empty()),
                token_hash: string_field(&object, "token_hash"),
            },
            "ping" => Self::Ping,
            "handshake" => Self::Handshake {
                target: string_field(&object, "target"),
                source: string_field(&object, "source"),
            },
            "forward" => Self::Forward {
                target: string_field(&object, "target"),
                payload: object
                    .get("payload")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Map::new())),
            },
            "shutdown" => Self::Shutdown,
            other => Self::Unrecognized {
                kind: other.to_owned(),
            },
        };
        Ok(message)
    }

    /// The wire `type` of this envelope, for logs and metric labels.
    pub fn kind(&self) -> &str {
        match self {
            Self::Register { .. } => "register",
            Self::Ping => "ping",
            Self::Handshake { .. } => "handshake",
            Self::Forward { .. } => "forward",
            Self::Shutdown => "shutdown",
            Self::Unrecognized { kind } => kind,
        }
    }
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(str::to_owned)
}

/// Listening ports reported by the status endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortsReport {
    /// Relay listener port.
    pub main: u16,
    /// Status listener port.
    pub status: u16,
}

/// Body of the `status` envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Server identity.
    pub server: String,
    /// Server version.
    pub version: String,
    /// Number of registered identifiers.
    pub clients_count: usize,
    /// Registered identifiers, sorted.
    pub clients: Vec<String>,
    /// Server token fingerprint (never the full token).
    pub server_token: String,
    /// Report time.
    pub timestamp: String,
    /// Both listening ports.
    pub ports: PortsReport,
}

/// An outbound envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registration confirmation.
    Registered {
        /// Full per-process server token.
        server_token: String,
        /// Echo of the registered identifier.
        client_id: String,
        /// Confirmation time.
        timestamp: String,
        /// Human-readable note.
        message: String,
    },
    /// Heartbeat reply.
    Pong {
        /// Reply time.
        timestamp: String,
    },
    /// Reply to `shutdown`, sent right before the session ends.
    ShutdownAck {
        /// Human-readable note.
        message: String,
    },
    /// Status endpoint report.
    Status(StatusReport),
    /// Registration refused because the identifier is held by a live session.
    RegisterRejected {
        /// The refused identifier.
        client_id: String,
        /// Why it was refused.
        reason: String,
        /// Rejection time.
        timestamp: String,
    },
}

impl ServerMessage {
    /// Build a `registered` confirmation.
    pub fn registered(server_token: &str, client_id: &str) -> Self {
        Self::Registered {
            server_token: server_token.to_owned(),
            client_id: client_id.to_owned(),
            timestamp: crate::timestamp_now(),
            message: REGISTERED_MESSAGE.to_owned(),
        }
    }

    /// Build a `pong` stamped with the current time.
    pub fn pong() -> Self {
        Self::Pong {
            timestamp: crate::timestamp_now(),
        }
    }

    /// Build a `shutdown_ack`.
    pub fn shutdown_ack() -> Self {
        Self::ShutdownAck {
            message: SHUTDOWN_ACK_MESSAGE.to_owned(),
        }
    }

    /// Build a `register_rejected` for a duplicate identifier.
    pub fn register_rejected(client_id: &str) -> Self {
        Self::RegisterRejected {
            client_id: client_id.to_owned(),
            reason: DUPLICATE_CLIENT_REASON.to_owned(),
            timestamp: crate::timestamp_now(),
        }
    }

    /// The wire `type` of this envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "registered",
            Self::Pong { .. } => "pong",
            Self::ShutdownAck { .. } => "shutdown_ack",
            Self::Status(_) => "status",
            Self::RegisterRejected { .. } => "register_rejected",
        }
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
