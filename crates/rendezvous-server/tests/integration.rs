//! End-to-end tests against real listeners using a WebSocket client.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rendezvous_server::{ListenAddrs, RendezvousServer, ServerConfig};
use rendezvous_settings::CollisionPolicy;
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Boot a server on ephemeral loopback ports.
async fn boot_server() -> (ListenAddrs, RendezvousServer) {
    boot_with(ServerConfig::ephemeral()).await
}

async fn boot_with(config: ServerConfig) -> (ListenAddrs, RendezvousServer) {
    let server = RendezvousServer::new(config);
    let (addrs, _listeners) = server.listen().await.unwrap();
    (addrs, server)
}

async fn connect(addr: std::net::SocketAddr) -> WsStream {
    let (ws, _) = connect_async(format!("ws://{addr}/")).await.unwrap();
    ws
}

async fn send_text(ws: &mut WsStream, text: &str) {
    ws.send(Message::text(text.to_owned())).await.unwrap();
}

async fn send_json(ws: &mut WsStream, value: &Value) {
    send_text(ws, &value.to_string()).await;
}

/// Read the next text frame.
async fn read_text(ws: &mut WsStream) -> String {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return text.as_str().to_owned();
        }
    }
}

/// Read the next text frame as JSON.
async fn read_json(ws: &mut WsStream) -> Value {
    serde_json::from_str(&read_text(ws).await).unwrap()
}

/// Assert that no text frame arrives for a short while.
async fn expect_silence(ws: &mut WsStream) {
    if let Ok(Some(Ok(Message::Text(text)))) = timeout(QUIET, ws.next()).await {
        panic!("unexpected message: {text}");
    }
}

/// Assert that the server closes the connection without sending text.
async fn expect_closed(ws: &mut WsStream) {
    loop {
        match timeout(TIMEOUT, ws.next()).await.expect("timeout waiting for close") {
            None | Some(Err(_) | Ok(Message::Close(_))) => return,
            Some(Ok(Message::Text(text))) => panic!("unexpected message: {text}"),
            Some(Ok(_)) => {}
        }
    }
}

/// Connect and register `client_id`, returning the socket and the confirmation.
async fn register(addrs: &ListenAddrs, client_id: &str) -> (WsStream, Value) {
    let mut ws = connect(addrs.relay).await;
    send_json(&mut ws, &json!({"type": "register", "client_id": client_id, "token_hash": "0123456789abcdef"})).await;
    let confirmation = read_json(&mut ws).await;
    assert_eq!(confirmation["type"], "registered", "got: {confirmation}");
    (ws, confirmation)
}

/// Query the status listener once.
async fn status(addrs: &ListenAddrs) -> Value {
    let mut ws = connect(addrs.status).await;
    let report = read_json(&mut ws).await;
    assert_eq!(report["type"], "status");
    report
}

fn clients(report: &Value) -> Vec<String> {
    report["clients"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_owned())
        .collect()
}

/// Poll status until `client_id` is gone.
async fn wait_until_absent(addrs: &ListenAddrs, client_id: &str) {
    timeout(TIMEOUT, async {
        loop {
            if !clients(&status(addrs).await).iter().any(|c| c == client_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("client never left the registry");
}

// ─────────────────────────────────────────────────────────────────────────────
// Registration
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_registered_confirmation() {
    let (addrs, server) = boot_server().await;
    let (_ws, confirmation) = register(&addrs, "guardianA").await;

    assert_eq!(confirmation["client_id"], "guardianA");
    assert_eq!(confirmation["server_token"], server.server_token().expose());
    assert_eq!(confirmation["server_token"].as_str().unwrap().len(), 22);
    assert!(confirmation["timestamp"].is_string());
    assert!(confirmation["message"].is_string());
    assert!(server.registry().contains("guardianA"));

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_registered_identifier_is_immediately_a_target() {
    let (addrs, server) = boot_server().await;
    let (mut a, _) = register(&addrs, "guardianA").await;
    let (mut b, _) = register(&addrs, "guardianB").await;

    send_json(&mut a, &json!({"type": "forward", "target": "guardianB", "payload": {"n": 1}})).await;
    assert_eq!(read_json(&mut b).await, json!({"n": 1}));

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_malformed_before_registration_keeps_waiting() {
    let (addrs, server) = boot_server().await;
    let mut ws = connect(addrs.relay).await;

    send_text(&mut ws, "{not json").await;
    send_json(&mut ws, &json!({"client_id": "no-type"})).await;
    send_json(&mut ws, &json!({"type": "register"})).await;
    send_json(&mut ws, &json!({"type": "register", "client_id": ""})).await;
    expect_silence(&mut ws).await;
    assert!(server.registry().is_empty());

    send_json(&mut ws, &json!({"type": "register", "client_id": "late"})).await;
    let confirmation = read_json(&mut ws).await;
    assert_eq!(confirmation["type"], "registered");
    assert_eq!(confirmation["client_id"], "late");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_non_register_first_envelope_closes() {
    let (addrs, server) = boot_server().await;
    let mut ws = connect(addrs.relay).await;

    send_json(&mut ws, &json!({"type": "ping"})).await;
    expect_closed(&mut ws).await;
    assert_eq!(status(&addrs).await["clients_count"], 0);

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_reject_policy_refuses_duplicate() {
    let config = ServerConfig {
        collision_policy: CollisionPolicy::Reject,
        ..ServerConfig::ephemeral()
    };
    let (addrs, server) = boot_with(config).await;
    let (mut first, _) = register(&addrs, "guardianA").await;

    let mut second = connect(addrs.relay).await;
    send_json(&mut second, &json!({"type": "register", "client_id": "guardianA"})).await;
    let rejected = read_json(&mut second).await;
    assert_eq!(rejected["type"], "register_rejected");
    assert_eq!(rejected["client_id"], "guardianA");
    expect_closed(&mut second).await;

    // The original holder is untouched
    send_json(&mut first, &json!({"type": "ping"})).await;
    assert_eq!(read_json(&mut first).await["type"], "pong");
    assert_eq!(clients(&status(&addrs).await), vec!["guardianA"]);

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_replace_policy_takes_over_slot() {
    let (addrs, server) = boot_server().await;
    let (mut sender, _) = register(&addrs, "sender").await;
    let (mut old, _) = register(&addrs, "guardianB").await;
    let (mut new, _) = register(&addrs, "guardianB").await;

    send_json(&mut sender, &json!({"type": "forward", "target": "guardianB", "payload": {"to": "new"}})).await;
    assert_eq!(read_json(&mut new).await, json!({"to": "new"}));
    expect_silence(&mut old).await;

    // The displaced session leaving must not evict the new holder
    send_json(&mut old, &json!({"type": "shutdown"})).await;
    assert_eq!(read_json(&mut old).await["type"], "shutdown_ack");
    assert!(clients(&status(&addrs).await).contains(&"guardianB".to_owned()));

    send_json(&mut sender, &json!({"type": "forward", "target": "guardianB", "payload": {"still": true}})).await;
    assert_eq!(read_json(&mut new).await, json!({"still": true}));

    server.shutdown().shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Routing
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_guardian_handshake_scenario() {
    let (addrs, server) = boot_server().await;
    let (mut a, _) = register(&addrs, "guardianA").await;
    let (mut b, _) = register(&addrs, "guardianB").await;

    let raw = r#"{"type":"handshake","target":"guardianB","source":"guardianA"}"#;
    send_text(&mut a, raw).await;
    assert_eq!(read_text(&mut b).await, raw);

    let report = status(&addrs).await;
    assert_eq!(report["clients_count"], 2);
    assert_eq!(clients(&report), vec!["guardianA", "guardianB"]);

    expect_silence(&mut a).await;
    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_handshake_reaches_only_its_target() {
    let (addrs, server) = boot_server().await;
    let (mut a, _) = register(&addrs, "guardianA").await;
    let (mut b, _) = register(&addrs, "guardianB").await;
    let (mut c, _) = register(&addrs, "guardianC").await;

    // Whitespace and extra fields survive untouched
    let raw = r#"{ "type": "handshake", "target": "guardianB", "source": "guardianA", "sdp": {"v": 0} }"#;
    send_text(&mut a, raw).await;
    assert_eq!(read_text(&mut b).await, raw);
    expect_silence(&mut c).await;
    expect_silence(&mut a).await;

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_forward_delivers_payload_only() {
    let (addrs, server) = boot_server().await;
    let (mut a, _) = register(&addrs, "guardianA").await;
    let (mut b, _) = register(&addrs, "guardianB").await;

    let payload = json!({"type": "offer", "sdp": "v=0", "candidates": [1, 2, 3]});
    send_json(&mut a, &json!({"type": "forward", "target": "guardianB", "payload": payload})).await;
    assert_eq!(read_json(&mut b).await, payload);

    send_json(&mut a, &json!({"type": "forward", "target": "guardianB"})).await;
    assert_eq!(read_json(&mut b).await, json!({}));

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_ghost_forward_is_silent_noop() {
    let (addrs, server) = boot_server().await;
    let (mut a, _) = register(&addrs, "guardianA").await;
    let (mut b, _) = register(&addrs, "guardianB").await;

    send_json(&mut a, &json!({"type": "forward", "target": "ghost", "payload": {"x": 1}})).await;
    send_json(&mut a, &json!({"type": "handshake", "target": "ghost", "source": "guardianA"})).await;
    expect_silence(&mut a).await;
    expect_silence(&mut b).await;

    // Sender's connection is still open and usable
    send_json(&mut a, &json!({"type": "ping"})).await;
    assert_eq!(read_json(&mut a).await["type"], "pong");
    send_json(&mut a, &json!({"type": "forward", "target": "guardianB", "payload": {"after": "ghost"}})).await;
    assert_eq!(read_json(&mut b).await, json!({"after": "ghost"}));

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_ping_yields_one_pong_each() {
    let (addrs, server) = boot_server().await;
    let (mut a, _) = register(&addrs, "guardianA").await;

    for _ in 0..3 {
        send_json(&mut a, &json!({"type": "ping"})).await;
    }
    for _ in 0..3 {
        let pong = read_json(&mut a).await;
        assert_eq!(pong["type"], "pong");
        assert!(pong["timestamp"].is_string());
    }
    expect_silence(&mut a).await;

    let report = status(&addrs).await;
    assert_eq!(report["clients_count"], 1);
    assert_eq!(clients(&report), vec!["guardianA"]);

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_pipelined_pings_each_get_a_pong() {
    let (addrs, server) = boot_server().await;
    let (mut a, _) = register(&addrs, "guardianA").await;

    for _ in 0..300 {
        a.feed(Message::text(r#"{"type":"ping"}"#.to_owned())).await.unwrap();
    }
    a.flush().await.unwrap();

    for _ in 0..300 {
        assert_eq!(read_json(&mut a).await["type"], "pong");
    }
    expect_silence(&mut a).await;

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_pipelined_forwards_all_delivered() {
    let (addrs, server) = boot_server().await;
    let (mut a, _) = register(&addrs, "guardianA").await;
    let (mut b, _) = register(&addrs, "guardianB").await;

    for seq in 0..300 {
        let frame = json!({"type": "forward", "target": "guardianB", "payload": {"seq": seq}});
        a.feed(Message::text(frame.to_string())).await.unwrap();
    }
    a.flush().await.unwrap();

    for seq in 0..300 {
        assert_eq!(read_json(&mut b).await, json!({"seq": seq}));
    }
    expect_silence(&mut b).await;
    expect_silence(&mut a).await;

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_tiny_send_queue_still_delivers_bursts() {
    let config = ServerConfig {
        send_queue_capacity: 2,
        ..ServerConfig::ephemeral()
    };
    let (addrs, server) = boot_with(config).await;
    let (mut a, _) = register(&addrs, "guardianA").await;
    let (mut b, _) = register(&addrs, "guardianB").await;

    for seq in 0..50 {
        a.feed(Message::text(r#"{"type":"ping"}"#.to_owned())).await.unwrap();
        let frame = json!({"type": "handshake", "target": "guardianB", "seq": seq});
        a.feed(Message::text(frame.to_string())).await.unwrap();
    }
    a.flush().await.unwrap();

    for seq in 0..50 {
        assert_eq!(read_json(&mut a).await["type"], "pong");
        assert_eq!(read_json(&mut b).await["seq"], seq);
    }

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_binary_utf8_frame_is_routed() {
    let (addrs, server) = boot_server().await;
    let (mut a, _) = register(&addrs, "guardianA").await;

    a.send(Message::binary(br#"{"type":"ping"}"#.to_vec())).await.unwrap();
    assert_eq!(read_json(&mut a).await["type"], "pong");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_bad_envelopes_after_registration_are_survivable() {
    let (addrs, server) = boot_server().await;
    let (mut a, _) = register(&addrs, "guardianA").await;

    send_text(&mut a, "not json at all").await;
    send_text(&mut a, "[1, 2, 3]").await;
    send_json(&mut a, &json!({"target": "guardianB"})).await;
    send_json(&mut a, &json!({"type": "teleport"})).await;
    send_json(&mut a, &json!({"type": "register", "client_id": "other"})).await;
    expect_silence(&mut a).await;

    send_json(&mut a, &json!({"type": "ping"})).await;
    assert_eq!(read_json(&mut a).await["type"], "pong");
    assert_eq!(clients(&status(&addrs).await), vec!["guardianA"]);

    server.shutdown().shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Cleanup
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_shutdown_acks_and_removes_client() {
    let (addrs, server) = boot_server().await;
    let (mut a, _) = register(&addrs, "guardianA").await;
    let (_b, _) = register(&addrs, "guardianB").await;

    send_json(&mut a, &json!({"type": "shutdown"})).await;
    let ack = read_json(&mut a).await;
    assert_eq!(ack["type"], "shutdown_ack");
    assert!(ack["message"].is_string());
    expect_closed(&mut a).await;

    let report = status(&addrs).await;
    assert_eq!(clients(&report), vec!["guardianB"]);
    assert_eq!(report["clients_count"], 1);

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_remote_close_removes_client() {
    let (addrs, server) = boot_server().await;
    let (mut a, _) = register(&addrs, "guardianA").await;
    a.close(None).await.unwrap();

    wait_until_absent(&addrs, "guardianA").await;
    assert!(server.registry().is_empty());

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_dropped_socket_removes_client() {
    let (addrs, server) = boot_server().await;
    let (a, _) = register(&addrs, "guardianA").await;
    drop(a);

    wait_until_absent(&addrs, "guardianA").await;

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_identifier_reusable_after_cleanup() {
    let (addrs, server) = boot_server().await;
    let (mut a, _) = register(&addrs, "guardianA").await;
    send_json(&mut a, &json!({"type": "shutdown"})).await;
    let _ = read_json(&mut a).await;

    let (mut again, confirmation) = register(&addrs, "guardianA").await;
    assert_eq!(confirmation["client_id"], "guardianA");
    send_json(&mut again, &json!({"type": "ping"})).await;
    assert_eq!(read_json(&mut again).await["type"], "pong");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_server_shutdown_closes_sessions() {
    let (addrs, server) = boot_server().await;
    let (mut a, _) = register(&addrs, "guardianA").await;
    let (mut b, _) = register(&addrs, "guardianB").await;

    server.shutdown().shutdown();
    expect_closed(&mut a).await;
    expect_closed(&mut b).await;

    timeout(TIMEOUT, async {
        while !server.registry().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry not cleared on shutdown");
    assert!(addrs.relay.port() > 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Status endpoint
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_status_report_fields() {
    let (addrs, server) = boot_server().await;
    let report = status(&addrs).await;

    assert_eq!(report["clients_count"], 0);
    assert!(clients(&report).is_empty());
    assert_eq!(report["ports"]["main"], addrs.relay.port());
    assert_eq!(report["ports"]["status"], addrs.status.port());
    assert!(report["server"].is_string());
    assert!(report["version"].is_string());
    assert!(report["timestamp"].is_string());

    let fingerprint = report["server_token"].as_str().unwrap();
    assert_eq!(fingerprint.len(), 8);
    assert!(server.server_token().expose().starts_with(fingerprint));

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_status_is_single_shot_and_read_only() {
    let (addrs, server) = boot_server().await;
    let (mut a, _) = register(&addrs, "guardianA").await;

    let mut probe = connect(addrs.status).await;
    let report = read_json(&mut probe).await;
    assert_eq!(report["clients_count"], 1);
    // Anything sent to the status socket is not answered
    let _ = probe.send(Message::text(r#"{"type":"shutdown"}"#.to_owned())).await;
    expect_closed(&mut probe).await;

    for _ in 0..5 {
        assert_eq!(status(&addrs).await["clients_count"], 1);
    }
    send_json(&mut a, &json!({"type": "ping"})).await;
    assert_eq!(read_json(&mut a).await["type"], "pong");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_health_endpoint_over_http() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let (addrs, server) = boot_server().await;
    let (_a, _) = register(&addrs, "guardianA").await;

    let mut stream = tokio::net::TcpStream::connect(addrs.status).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    let _ = timeout(TIMEOUT, stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let parsed: Value = serde_json::from_str(body).unwrap();
    assert_eq!(parsed["status"], "ok");
    assert_eq!(parsed["clients_count"], 1);

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_status_upgrade_on_http_paths_pushes_report() {
    let (addrs, server) = boot_server().await;
    let (_a, _) = register(&addrs, "guardianA").await;

    for path in ["health", "metrics"] {
        let (mut ws, _) = connect_async(format!("ws://{}/{path}", addrs.status)).await.unwrap();
        let report = read_json(&mut ws).await;
        assert_eq!(report["type"], "status", "path /{path}");
        assert_eq!(clients(&report), vec!["guardianA"]);
        expect_closed(&mut ws).await;
    }

    server.shutdown().shutdown();
}
