//! Outbound half of a relay connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rendezvous_core::{ConnectionId, ServerMessage};
use tokio::sync::mpsc;

use crate::errors::DeliveryError;

/// Handle for queueing frames to one connected WebSocket client.
///
/// The session's writer task owns the receiving end. The session itself
/// and every other session relaying to this client send through this
/// handle. A send waits for queue room, up to the caller's deadline, so a
/// burst is delayed rather than lost; only a writer that makes no progress
/// for the whole wait costs a frame.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When the socket was accepted.
    connected_at: Instant,
    /// Frames that never made it into the queue.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            tx,
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a text frame, waiting up to `wait` for room.
    ///
    /// A closed queue or a wait that runs out counts as a drop.
    pub async fn send(&self, frame: Arc<String>, wait: Duration) -> Result<(), DeliveryError> {
        let failure = match tokio::time::timeout(wait, self.tx.send(frame)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(_)) => DeliveryError::Closed,
            Err(_) => DeliveryError::Stalled(wait),
        };
        let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
        Err(failure)
    }

    /// Serialize an outbound envelope and queue it.
    pub async fn send_message(&self, message: &ServerMessage, wait: Duration) -> Result<(), DeliveryError> {
        let text = message.to_text()?;
        self.send(Arc::new(text), wait).await
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Time since the socket was accepted.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(100);

    fn make_connection(capacity: usize) -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ClientConnection::new(ConnectionId::new(), tx), rx)
    }

    #[tokio::test]
    async fn send_message_success() {
        let (conn, mut rx) = make_connection(4);
        conn.send(Arc::new("hello".into()), WAIT).await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(&*msg, "hello");
        assert_eq!(conn.drop_count(), 0);
    }

    #[tokio::test]
    async fn send_to_closed_channel_counts_drop() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        let err = conn.send(Arc::new("hello".into()), WAIT).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Closed));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn send_to_stalled_channel_times_out() {
        let (conn, _rx) = make_connection(1);
        conn.send(Arc::new("msg1".into()), WAIT).await.unwrap();
        let err = conn.send(Arc::new("msg2".into()), WAIT).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Stalled(d) if d == WAIT));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn full_queue_waits_for_reader() {
        let (conn, mut rx) = make_connection(2);
        let reader = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(frame) = rx.recv().await {
                seen.push(frame.to_string());
            }
            seen
        });
        for i in 0..50 {
            conn.send(Arc::new(format!("msg_{i}")), Duration::from_secs(2))
                .await
                .unwrap();
        }
        drop(conn);
        let seen = reader.await.unwrap();
        assert_eq!(seen.len(), 50);
        assert_eq!(seen[49], "msg_49");
    }

    #[tokio::test]
    async fn send_message_serializes_envelope() {
        let (conn, mut rx) = make_connection(4);
        conn.send_message(&ServerMessage::shutdown_ack(), WAIT).await.unwrap();
        let msg = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["type"], "shutdown_ack");
    }

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let (conn, mut rx) = make_connection(8);
        for i in 0..5 {
            conn.send(Arc::new(format!("msg_{i}")), WAIT).await.unwrap();
        }
        for i in 0..5 {
            assert_eq!(&*rx.recv().await.unwrap(), &format!("msg_{i}"));
        }
    }
}
