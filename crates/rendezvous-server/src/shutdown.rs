//! Server-wide shutdown: one `CancellationToken` observed by both listeners
//! and every relay session.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Default time the listeners get to stop after cancelling.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A spawned listener and the name it is logged under.
pub struct ListenerTask {
    /// `"relay"` or `"status"`.
    pub name: &'static str,
    /// The serving task.
    pub handle: JoinHandle<()>,
}

/// Coordinates shutdown of both listeners and every relay session.
///
/// Listeners stop accepting when the token fires; each session observes
/// the same token, leaves its loop, releases its registry slot, and closes
/// its socket.
#[derive(Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the server-wide token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Fire the token.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether the token has fired.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fire the token, then give `listeners` a shared deadline to finish.
    ///
    /// A listener still serving at the deadline is aborted. Returns the
    /// names of the listeners that had to be aborted.
    pub async fn graceful_shutdown(
        &self,
        listeners: Vec<ListenerTask>,
        timeout: Option<Duration>,
    ) -> Vec<&'static str> {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        let deadline = Instant::now() + timeout;
        self.shutdown();

        let mut aborted = Vec::new();
        for ListenerTask { name, mut handle } in listeners {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => info!(listener = name, "listener stopped"),
                Ok(Err(e)) => error!(listener = name, error = %e, "listener task failed"),
                Err(_) => {
                    warn!(listener = name, ?timeout, "listener still serving at deadline, aborting");
                    handle.abort();
                    aborted.push(name);
                }
            }
        }
        aborted
    }
}
