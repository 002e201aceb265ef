//! Message router for registered sessions.
//!
//! [`decide`] classifies one inbound text frame against the registry and
//! returns a [`Decision`]. It performs no I/O and emits no logs; the session
//! logs the decision and then applies it.

use std::sync::Arc;

use rendezvous_core::{ClientMessage, EnvelopeError, ServerMessage};

use crate::connection::ClientConnection;
use crate::registry::Registry;

/// Which relay path a frame took.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayKind {
    /// Raw envelope delivered unmodified.
    Handshake,
    /// Only the `payload` object delivered.
    Forward,
}

impl RelayKind {
    /// Wire name, used as a metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::Forward => "forward",
        }
    }
}

/// What the session should do with one frame.
pub enum Decision {
    /// Send this envelope back to the sender.
    Reply(ServerMessage),
    /// Queue `frame` on the target's connection.
    Relay {
        /// Relay path.
        kind: RelayKind,
        /// Registered target identifier.
        target: String,
        /// Sender's self-reported identifier (handshake only).
        source: Option<String>,
        /// Target's outbound handle.
        connection: Arc<ClientConnection>,
        /// Exact text to deliver.
        frame: Arc<String>,
    },
    /// Relay target missing or not registered; drop silently.
    Undeliverable {
        /// Relay path.
        kind: RelayKind,
        /// Requested target, if the envelope named one.
        target: Option<String>,
    },
    /// Send this envelope, then end the session.
    Close(ServerMessage),
    /// The frame did not decode; keep the session.
    Malformed(EnvelopeError),
    /// Well-formed envelope the relay does not act on; keep the session.
    Ignored {
        /// The envelope's `type`.
        kind: String,
    },
}

impl Decision {
    /// Envelope type this decision was made for (`"malformed"` if none).
    pub fn msg_type(&self) -> &str {
        match self {
            Self::Reply(_) => "ping",
            Self::Relay { kind, .. } | Self::Undeliverable { kind, .. } => kind.as_str(),
            Self::Close(_) => "shutdown",
            Self::Malformed(_) => "malformed",
            Self::Ignored { kind } => kind,
        }
    }

    /// Bounded metric label; unrecognized types collapse to `"unrecognized"`.
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Reply(_) => "ping",
            Self::Relay { kind, .. } | Self::Undeliverable { kind, .. } => kind.as_str(),
            Self::Close(_) => "shutdown",
            Self::Malformed(_) => "malformed",
            Self::Ignored { kind } if kind == "register" => "register",
            Self::Ignored { .. } => "unrecognized",
        }
    }

    /// Whether the session ends after applying this decision.
    pub fn ends_session(&self) -> bool {
        matches!(self, Self::Close(_))
    }
}

/// Classify one inbound frame from a registered session.
pub fn decide(text: &str, registry: &Registry) -> Decision {
    let message = match ClientMessage::parse(text) {
        Ok(m) => m,
        Err(e) => return Decision::Malformed(e),
    };

    match message {
        ClientMessage::Ping => Decision::Reply(ServerMessage::pong()),
        ClientMessage::Handshake { target, source } => {
            relay(registry, RelayKind::Handshake, target, source, || text.to_owned())
        }
        ClientMessage::Forward { target, payload } => {
            relay(registry, RelayKind::Forward, target, None, || payload.to_string())
        }
        ClientMessage::Shutdown => Decision::Close(ServerMessage::shutdown_ack()),
        ClientMessage::Register { .. } => Decision::Ignored {
            kind: "register".to_owned(),
        },
        ClientMessage::Unrecognized { kind } => Decision::Ignored { kind },
    }
}

fn relay(
    registry: &Registry,
    kind: RelayKind,
    target: Option<String>,
    source: Option<String>,
    frame: impl FnOnce() -> String,
) -> Decision {
    let Some(target) = target else {
        return Decision::Undeliverable { kind, target: None };
    };
    match registry.lookup(&target) {
        Some(record) => Decision::Relay {
            kind,
            target,
            source,
            connection: Arc::clone(&record.connection),
            frame: Arc::new(frame()),
        },
        None => Decision::Undeliverable {
            kind,
            target: Some(target),
        },
    }
}
