//! `RendezvousServer`: relay and status listeners on loopback.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use rendezvous_core::{ConnectionId, PortsReport, ServerToken};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics::STATUS_REQUESTS_TOTAL;
use crate::registry::Registry;
use crate::session::{RelayContext, run_relay_session};
use crate::shutdown::{ListenerTask, ShutdownCoordinator};
use crate::status;

/// Addresses the listeners actually bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenAddrs {
    /// Relay listener.
    pub relay: SocketAddr,
    /// Status listener.
    pub status: SocketAddr,
}

impl ListenAddrs {
    /// Both ports, as reported in status envelopes.
    pub fn ports(&self) -> PortsReport {
        PortsReport {
            main: self.relay.port(),
            status: self.status.port(),
        }
    }
}

#[derive(Clone)]
struct RelayState {
    ctx: Arc<RelayContext>,
    max_message_size: usize,
}

/// Shared state of the status listener.
#[derive(Clone)]
struct StatusState {
    registry: Arc<Registry>,
    server_token: ServerToken,
    ports: PortsReport,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

/// The rendezvous relay server.
pub struct RendezvousServer {
    config: ServerConfig,
    registry: Arc<Registry>,
    shutdown: Arc<ShutdownCoordinator>,
    server_token: ServerToken,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl RendezvousServer {
    /// Create a server with a freshly generated server token.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            server_token: ServerToken::generate(),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `GET /metrics` on the status listener from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Use a fixed server token instead of a generated one.
    #[must_use]
    pub fn with_server_token(mut self, token: ServerToken) -> Self {
        self.server_token = token;
        self
    }

    /// Build the relay router. Every path upgrades to a relay session.
    pub fn relay_router(&self) -> Router {
        let state = RelayState {
            ctx: Arc::new(RelayContext {
                registry: Arc::clone(&self.registry),
                server_token: self.server_token.clone(),
                send_queue_capacity: self.config.send_queue_capacity,
                collision_policy: self.config.collision_policy,
                shutdown: self.shutdown.token(),
            }),
            max_message_size: self.config.max_message_size,
        };
        Router::new().fallback(relay_upgrade).with_state(state)
    }

    /// Build the status router. A WebSocket upgrade on any path, including
    /// `/health` and `/metrics`, gets the one-shot status push; plain GETs
    /// on those two paths get the HTTP views.
    pub fn status_router(&self, ports: PortsReport) -> Router {
        let state = StatusState {
            registry: Arc::clone(&self.registry),
            server_token: self.server_token.clone(),
            ports,
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .fallback(status_upgrade)
            .with_state(state)
    }

    /// Bind both listeners, then start serving them.
    ///
    /// Nothing is served unless both binds succeed. Returns the bound
    /// addresses and the two listener tasks, which end once
    /// [`ShutdownCoordinator::shutdown`] is called.
    pub async fn listen(&self) -> Result<(ListenAddrs, Vec<ListenerTask>), ServerError> {
        let (relay_addr, status_addr) = self.config.socket_addrs()?;

        let relay_listener = bind(relay_addr).await?;
        let status_listener = bind(status_addr).await?;
        let addrs = ListenAddrs {
            relay: relay_listener.local_addr()?,
            status: status_listener.local_addr()?,
        };

        let relay_app = self
            .relay_router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let status_app = self.status_router(addrs.ports());

        let token = self.shutdown.token();
        let relay_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(relay_listener, relay_app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "relay listener failed");
            }
        });

        let token = self.shutdown.token();
        let status_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(status_listener, status_app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "status listener failed");
            }
        });

        info!(
            relay = %addrs.relay,
            status = %addrs.status,
            server_token = %self.server_token.fingerprint(),
            "rendezvous server listening"
        );
        let listeners = vec![
            ListenerTask {
                name: "relay",
                handle: relay_task,
            },
            ListenerTask {
                name: "status",
                handle: status_task,
            },
        ];
        Ok((addrs, listeners))
    }

    /// Get the registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the per-process server token.
    pub fn server_token(&self) -> &ServerToken {
        &self.server_token
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Any path on the relay listener.
async fn relay_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    State(state): State<RelayState>,
) -> Response {
    let conn_id = ConnectionId::new();
    let ctx = Arc::clone(&state.ctx);
    ws.max_message_size(state.max_message_size)
        .max_frame_size(state.max_message_size)
        .on_upgrade(move |socket| run_relay_session(socket, conn_id, Some(peer_addr), ctx))
}

/// Any other path on the status listener.
async fn status_upgrade(ws: WebSocketUpgrade, State(state): State<StatusState>) -> Response {
    push_on_upgrade(ws, state)
}

fn push_on_upgrade(ws: WebSocketUpgrade, state: StatusState) -> Response {
    ws.on_upgrade(move |socket| async move {
        let report = status::build_report(&state.registry, &state.server_token, &state.ports);
        status::push_status(socket, report).await;
    })
}

/// GET /health
async fn health_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<StatusState>,
) -> Response {
    if let Ok(ws) = ws {
        return push_on_upgrade(ws, state);
    }
    counter!(STATUS_REQUESTS_TOTAL, "endpoint" => "health").increment(1);
    Json(health::health_check(state.start_time, state.registry.len())).into_response()
}

/// GET /metrics
async fn metrics_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<StatusState>,
) -> Response {
    if let Ok(ws) = ws {
        return push_on_upgrade(ws, state);
    }
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
