//! Status endpoint: one registry read, one envelope, done.

use axum::extract::ws::{Message, WebSocket};
use metrics::counter;
use rendezvous_core::{PortsReport, ServerMessage, ServerToken, StatusReport};
use tracing::{debug, warn};

use crate::metrics::STATUS_REQUESTS_TOTAL;
use crate::registry::Registry;

/// Server identity reported in every status envelope.
pub const SERVER_NAME: &str = "rendezvous";

/// Server version reported in every status envelope.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build the status report from a single registry snapshot.
pub fn build_report(registry: &Registry, server_token: &ServerToken, ports: &PortsReport) -> StatusReport {
    let snapshot = registry.snapshot();
    StatusReport {
        server: SERVER_NAME.to_owned(),
        version: SERVER_VERSION.to_owned(),
        clients_count: snapshot.count,
        clients: snapshot.clients,
        server_token: server_token.fingerprint(),
        timestamp: rendezvous_core::timestamp_now(),
        ports: ports.clone(),
    }
}

/// Push one status envelope to a freshly upgraded socket, then a Close frame.
///
/// Nothing is read from the client.
pub async fn push_status(mut ws: WebSocket, report: StatusReport) {
    counter!(STATUS_REQUESTS_TOTAL, "endpoint" => "ws").increment(1);
    let text = match ServerMessage::Status(report).to_text() {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "failed to serialize status report");
            return;
        }
    };
    if let Err(e) = ws.send(Message::Text(text.into())).await {
        debug!(error = %e, "status client went away before report was sent");
        return;
    }
    let _ = ws.send(Message::Close(None)).await;
}
