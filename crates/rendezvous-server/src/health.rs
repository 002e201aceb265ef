//! `/health` endpoint on the status listener.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Number of registered identifiers.
    pub clients_count: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, clients_count: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        clients_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        assert_eq!(health_check(Instant::now(), 0).status, "ok");
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        assert!(health_check(start, 0).uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let json = serde_json::to_value(health_check(Instant::now(), 2)).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["clients_count"], 2);
        assert!(json["uptime_secs"].is_number());
    }
}
