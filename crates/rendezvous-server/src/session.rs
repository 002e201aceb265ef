//! Relay session lifecycle: one connected client from upgrade through
//! disconnect.
//!
//! 1. Spawns the outbound writer task
//! 2. Waits for a valid `register` and inserts the registry record
//! 3. Routes every later frame through [`router::decide`]
//! 4. Releases the registry slot, flushes the final frame, and closes

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use rendezvous_core::{ClientId, ClientMessage, ConnectionId, ServerMessage, ServerToken, fingerprint};
use rendezvous_settings::CollisionPolicy;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, instrument, warn};

use crate::connection::ClientConnection;
use crate::errors::{DeliveryError, RegistryError};
use crate::metrics::{
    RELAY_CONNECTIONS_TOTAL, RELAY_ENVELOPES_TOTAL, RELAY_FORWARD_DROPS_TOTAL, RELAY_FORWARDS_TOTAL,
    RELAY_MALFORMED_ENVELOPES_TOTAL, RELAY_REGISTRATIONS_REJECTED_TOTAL, RELAY_REGISTRATIONS_TOTAL,
    RELAY_SESSION_DURATION_SECONDS,
};
use crate::registry::{ConnectionRecord, RegistrationGuard, Registry};
use crate::router::{self, Decision};

/// How long the writer may take to flush and close after the session ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a send may wait on a full outbound queue before the frame is
/// dropped.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// State shared by every relay session.
pub struct RelayContext {
    /// Registry of live sessions.
    pub registry: Arc<Registry>,
    /// Per-process token sent in `registered`.
    pub server_token: ServerToken,
    /// Outbound queue length per connection.
    pub send_queue_capacity: usize,
    /// What a colliding `register` does.
    pub collision_policy: CollisionPolicy,
    /// Server-wide shutdown signal.
    pub shutdown: CancellationToken,
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EndReason {
    PeerClosed,
    TransportError,
    ShutdownRequested,
    ServerShutdown,
    ProtocolViolation,
    Rejected,
}

impl EndReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::TransportError => "transport_error",
            Self::ShutdownRequested => "shutdown_requested",
            Self::ServerShutdown => "server_shutdown",
            Self::ProtocolViolation => "protocol_violation",
            Self::Rejected => "rejected",
        }
    }
}

/// How a session stops: the reason plus an optional last envelope to send
/// once the registry slot is released.
struct Ending {
    reason: EndReason,
    last: Option<ServerMessage>,
}

impl From<EndReason> for Ending {
    fn from(reason: EndReason) -> Self {
        Self { reason, last: None }
    }
}

enum Inbound {
    Text(String),
    Skip,
    End(EndReason),
}

/// Run a relay session for an upgraded connection.
#[instrument(skip_all, fields(conn_id = %conn_id, client_id = tracing::field::Empty))]
pub async fn run_relay_session(
    ws: WebSocket,
    conn_id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    ctx: Arc<RelayContext>,
) {
    let (ws_tx, mut ws_rx) = ws.split();
    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(ctx.send_queue_capacity);
    let connection = Arc::new(ClientConnection::new(conn_id, send_tx));
    let closing = CancellationToken::new();
    let mut writer = tokio::spawn(write_outbound(ws_tx, send_rx, closing.clone()));

    counter!(RELAY_CONNECTIONS_TOTAL).increment(1);
    info!(peer = ?peer_addr, "relay connection accepted");

    let ending = match await_registration(&mut ws_rx, &connection, peer_addr, &ctx).await {
        Ok(guard) => {
            let _ = Span::current().record("client_id", guard.client_id().as_str());
            let ending = serve(&mut ws_rx, &connection, &ctx).await;
            drop(guard);
            ending
        }
        Err(ending) => ending,
    };

    // The slot is released before the last frame goes out, so a client that
    // has seen `shutdown_ack` never finds itself in a status report.
    if let Some(last) = &ending.last {
        if let Err(e) = connection.send_message(last, SEND_TIMEOUT).await {
            warn!(msg_type = last.kind(), error = %e, "final envelope not delivered");
        }
    }
    closing.cancel();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        warn!("outbound writer did not finish, aborting");
        writer.abort();
    }

    let age = connection.age();
    histogram!(RELAY_SESSION_DURATION_SECONDS).record(age.as_secs_f64());
    info!(
        reason = ending.reason.as_str(),
        dropped = connection.drop_count(),
        age_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX),
        "relay connection closed"
    );
}

/// Wait for the first valid `register`.
///
/// Malformed frames and a `register` without `client_id` are logged and
/// skipped. Any other well-formed envelope ends the session unregistered.
async fn await_registration(
    ws_rx: &mut SplitStream<WebSocket>,
    connection: &Arc<ClientConnection>,
    peer_addr: Option<SocketAddr>,
    ctx: &RelayContext,
) -> Result<RegistrationGuard, Ending> {
    loop {
        let text = match next_inbound(ws_rx, &ctx.shutdown).await {
            Inbound::Text(text) => text,
            Inbound::Skip => continue,
            Inbound::End(reason) => return Err(reason.into()),
        };

        let (raw_id, token_hash) = match ClientMessage::parse(&text) {
            Ok(ClientMessage::Register {
                client_id,
                token_hash,
            }) => (client_id, token_hash),
            Ok(other) => {
                warn!(msg_type = other.kind(), "first envelope is not register, closing");
                return Err(EndReason::ProtocolViolation.into());
            }
            Err(e) => {
                counter!(RELAY_MALFORMED_ENVELOPES_TOTAL).increment(1);
                warn!(error = %e, "malformed envelope before registration, waiting");
                continue;
            }
        };
        let Some(client_id) = raw_id.and_then(ClientId::parse) else {
            warn!("register without client_id, waiting");
            continue;
        };

        let token_fingerprint = token_hash.as_deref().map(fingerprint).unwrap_or_default();
        let record = ConnectionRecord::new(
            client_id.clone(),
            Arc::clone(connection),
            peer_addr,
            token_fingerprint.clone(),
        );

        return match ctx.registry.register(record, ctx.collision_policy) {
            Ok(guard) => {
                counter!(RELAY_REGISTRATIONS_TOTAL).increment(1);
                if let Some(previous) = guard.replaced() {
                    warn!(%client_id, replaced_conn = %previous, "client_id taken over from live session");
                }
                let confirmation = ServerMessage::registered(ctx.server_token.expose(), client_id.as_str());
                if let Err(e) = connection.send_message(&confirmation, SEND_TIMEOUT).await {
                    warn!(%client_id, error = %e, "registered confirmation not delivered, closing");
                    return Err(EndReason::TransportError.into());
                }
                info!(%client_id, token = %token_fingerprint, "client registered");
                Ok(guard)
            }
            Err(RegistryError::Duplicate(id)) => {
                counter!(RELAY_REGISTRATIONS_REJECTED_TOTAL).increment(1);
                warn!(client_id = %id, "client_id already registered, rejecting");
                Err(Ending {
                    reason: EndReason::Rejected,
                    last: Some(ServerMessage::register_rejected(id.as_str())),
                })
            }
        };
    }
}

/// Route frames for a registered session until it ends.
async fn serve(
    ws_rx: &mut SplitStream<WebSocket>,
    connection: &ClientConnection,
    ctx: &RelayContext,
) -> Ending {
    loop {
        let text = match next_inbound(ws_rx, &ctx.shutdown).await {
            Inbound::Text(text) => text,
            Inbound::Skip => continue,
            Inbound::End(reason) => return reason.into(),
        };

        let decision = router::decide(&text, &ctx.registry);
        counter!(RELAY_ENVELOPES_TOTAL, "msg_type" => decision.metric_label()).increment(1);

        if let Some(ending) = apply(decision, connection, SEND_TIMEOUT).await {
            return ending;
        }
    }
}

/// Log and carry out one routing decision.
///
/// Replies and relays wait up to `wait` for queue room. While waiting the
/// session reads nothing more, which paces a sender to its slowest reader.
async fn apply(decision: Decision, connection: &ClientConnection, wait: Duration) -> Option<Ending> {
    match decision {
        Decision::Reply(reply) => {
            debug!(msg_type = "ping", "heartbeat");
            if let Err(e) = connection.send_message(&reply, wait).await {
                warn!(msg_type = reply.kind(), error = %e, "reply not delivered");
                if matches!(e, DeliveryError::Closed) {
                    return Some(EndReason::TransportError.into());
                }
            }
        }
        Decision::Relay {
            kind,
            target,
            source,
            connection: target_conn,
            frame,
        } => {
            let source = source.as_deref().unwrap_or("unknown");
            match target_conn.send(frame, wait).await {
                Ok(()) => {
                    counter!(RELAY_FORWARDS_TOTAL, "kind" => kind.as_str()).increment(1);
                    debug!(msg_type = kind.as_str(), target_id = %target, source, "relayed");
                }
                Err(e) => {
                    counter!(RELAY_FORWARD_DROPS_TOTAL, "kind" => kind.as_str(), "reason" => e.reason())
                        .increment(1);
                    warn!(msg_type = kind.as_str(), target_id = %target, source, error = %e, "relay dropped");
                }
            }
        }
        Decision::Undeliverable { kind, target } => {
            counter!(RELAY_FORWARD_DROPS_TOTAL, "kind" => kind.as_str(), "reason" => "unknown_target")
                .increment(1);
            info!(
                msg_type = kind.as_str(),
                target_id = target.as_deref().unwrap_or(""),
                "unknown target, dropped"
            );
        }
        Decision::Close(ack) => {
            info!(msg_type = "shutdown", "client requested shutdown");
            return Some(Ending {
                reason: EndReason::ShutdownRequested,
                last: Some(ack),
            });
        }
        Decision::Malformed(e) => {
            counter!(RELAY_MALFORMED_ENVELOPES_TOTAL).increment(1);
            warn!(error = %e, "malformed envelope ignored");
        }
        Decision::Ignored { kind } => {
            warn!(msg_type = %kind, "envelope type not handled, ignored");
        }
    }
    None
}

/// Read the next frame, or the reason the session should stop.
async fn next_inbound(ws_rx: &mut SplitStream<WebSocket>, shutdown: &CancellationToken) -> Inbound {
    let frame = tokio::select! {
        () = shutdown.cancelled() => return Inbound::End(EndReason::ServerShutdown),
        frame = ws_rx.next() => frame,
    };

    match frame {
        None => Inbound::End(EndReason::PeerClosed),
        Some(Err(e)) => {
            debug!(error = %e, "transport error");
            Inbound::End(EndReason::TransportError)
        }
        Some(Ok(Message::Text(text))) => Inbound::Text(text.to_string()),
        Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
            Ok(text) => Inbound::Text(text),
            Err(_) => {
                warn!(len = data.len(), "non-UTF-8 binary frame ignored");
                Inbound::Skip
            }
        },
        Some(Ok(Message::Close(_))) => Inbound::End(EndReason::PeerClosed),
        Some(Ok(Message::Ping(_) | Message::Pong(_))) => Inbound::Skip,
    }
}

/// Drain the outbound queue onto the socket until `closing` fires, flush
/// whatever is still queued, then send a Close frame.
async fn write_outbound(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Arc<String>>,
    closing: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            frame = rx.recv() => match frame {
                Some(text) => {
                    if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
                        return;
                    }
                }
                None => break,
            },
            () = closing.cancelled() => break,
        }
    }

    while let Ok(text) = rx.try_recv() {
        if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
            return;
        }
    }
    let _ = ws_tx.send(Message::Close(None)).await;
    let _ = ws_tx.close().await;
}
