//! Server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use rendezvous_settings::{CollisionPolicy, ServerSettings};
use serde::{Deserialize, Serialize};

use crate::errors::ServerError;

/// Configuration for both listeners and every relay session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`); must be loopback.
    pub host: String,
    /// Relay listener port (`0` for auto-assign).
    pub relay_port: u16,
    /// Status listener port (`0` for auto-assign).
    pub status_port: u16,
    /// Per-connection outbound queue length.
    pub send_queue_capacity: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// What a colliding `register` does.
    pub collision_policy: CollisionPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerSettings::default().into()
    }
}

impl From<ServerSettings> for ServerConfig {
    fn from(s: ServerSettings) -> Self {
        Self {
            host: s.host,
            relay_port: s.relay_port,
            status_port: s.status_port,
            send_queue_capacity: s.send_queue_capacity,
            max_message_size: s.max_message_size,
            collision_policy: s.collision_policy,
        }
    }
}

impl ServerConfig {
    /// Config bound to `127.0.0.1` with both ports auto-assigned.
    pub fn ephemeral() -> Self {
        Self {
            relay_port: 0,
            status_port: 0,
            ..Self::default()
        }
    }

    /// Resolve `host` to a loopback IP.
    ///
    /// Accepts `localhost` and IP literals; anything that is not a loopback
    /// address is refused.
    pub fn loopback_ip(&self) -> Result<IpAddr, ServerError> {
        let host = self.host.trim();
        let ip = if host.eq_ignore_ascii_case("localhost") {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            host.trim_start_matches('[')
                .trim_end_matches(']')
                .parse::<IpAddr>()
                .map_err(|_| ServerError::NonLoopbackHost(self.host.clone()))?
        };
        if ip.is_loopback() {
            Ok(ip)
        } else {
            Err(ServerError::NonLoopbackHost(self.host.clone()))
        }
    }

    /// Relay and status socket addresses, in that order.
    pub fn socket_addrs(&self) -> Result<(SocketAddr, SocketAddr), ServerError> {
        let ip = self.loopback_ip()?;
        Ok((
            SocketAddr::new(ip, self.relay_port),
            SocketAddr::new(ip, self.status_port),
        ))
    }
}
