//! Settings types with compiled defaults.

use rendezvous_core::LogFormat;
use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RendezvousSettings {
    /// Listener settings.
    pub server: ServerSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

/// What happens when a `register` names an identifier that a live session
/// already holds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// The newer session takes the slot; the older one keeps running unregistered.
    #[default]
    Replace,
    /// The newer session is refused with `register_rejected` and closed.
    Reject,
}

/// Relay and status listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address; must resolve to a loopback address.
    pub host: String,
    /// Relay listener port (`0` = ephemeral).
    pub relay_port: u16,
    /// Status listener port (`0` = ephemeral).
    pub status_port: u16,
    /// Per-connection outbound queue length.
    pub send_queue_capacity: usize,
    /// Maximum WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Identifier collision handling.
    pub collision_policy: CollisionPolicy,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            relay_port: 8765,
            status_port: 8766,
            send_queue_capacity: 256,
            max_message_size: 1024 * 1024,
            collision_policy: CollisionPolicy::Replace,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
