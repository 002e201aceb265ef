//! Server and registry error types.

use std::net::SocketAddr;
use std::time::Duration;

use rendezvous_core::ClientId;
use thiserror::Error;

/// Errors that prevent the listeners from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A listener could not bind its port.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The configured host is not a loopback address.
    #[error("refusing to bind non-loopback host {0:?}")]
    NonLoopbackHost(String),
    /// Any other I/O failure during startup.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by registry mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The identifier is held by a live session and the policy refuses takeover.
    #[error("client {0} is already registered")]
    Duplicate(ClientId),
}

/// Why a frame never reached a connection's outbound queue.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The writer task is gone.
    #[error("outbound queue closed")]
    Closed,
    /// The queue stayed full for the whole wait.
    #[error("outbound queue stayed full for {0:?}")]
    Stalled(Duration),
    /// The envelope could not be serialized.
    #[error("failed to serialize envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

impl DeliveryError {
    /// Metric label for this failure.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Stalled(_) => "stalled",
            Self::Encode(_) => "encode",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_display_names_address() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:8765".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"),
        };
        let text = err.to_string();
        assert!(text.contains("127.0.0.1:8765"));
        assert!(text.contains("address in use"));
    }

    #[test]
    fn non_loopback_display() {
        let err = ServerError::NonLoopbackHost("0.0.0.0".into());
        assert_eq!(err.to_string(), "refusing to bind non-loopback host \"0.0.0.0\"");
    }

    #[test]
    fn duplicate_display() {
        let err = RegistryError::Duplicate(ClientId::parse("guardianA").unwrap());
        assert_eq!(err.to_string(), "client guardianA is already registered");
    }

    #[test]
    fn delivery_reasons() {
        assert_eq!(DeliveryError::Closed.reason(), "closed");
        let stalled = DeliveryError::Stalled(Duration::from_secs(5));
        assert_eq!(stalled.reason(), "stalled");
        assert_eq!(stalled.to_string(), "outbound queue stayed full for 5s");
    }
}
