//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render `/metrics`. Fails if a
/// global recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// Relay connections accepted (counter).
pub const RELAY_CONNECTIONS_TOTAL: &str = "relay_connections_total";
/// Successful registrations (counter).
pub const RELAY_REGISTRATIONS_TOTAL: &str = "relay_registrations_total";
/// Registrations refused by the collision policy (counter).
pub const RELAY_REGISTRATIONS_REJECTED_TOTAL: &str = "relay_registrations_rejected_total";
/// Currently registered identifiers (gauge).
pub const RELAY_CLIENTS_REGISTERED: &str = "relay_clients_registered";
/// Envelopes handled after registration (counter, labels: `msg_type`).
pub const RELAY_ENVELOPES_TOTAL: &str = "relay_envelopes_total";
/// Frames relayed to a target (counter, labels: kind).
pub const RELAY_FORWARDS_TOTAL: &str = "relay_forwards_total";
/// Relays not delivered (counter, labels: kind, reason).
pub const RELAY_FORWARD_DROPS_TOTAL: &str = "relay_forward_drops_total";
/// Envelopes that failed to decode (counter).
pub const RELAY_MALFORMED_ENVELOPES_TOTAL: &str = "relay_malformed_envelopes_total";
/// Relay session duration seconds (histogram).
pub const RELAY_SESSION_DURATION_SECONDS: &str = "relay_session_duration_seconds";
/// Status reports served (counter, labels: endpoint).
pub const STATUS_REQUESTS_TOTAL: &str = "status_requests_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            RELAY_CONNECTIONS_TOTAL,
            RELAY_REGISTRATIONS_TOTAL,
            RELAY_REGISTRATIONS_REJECTED_TOTAL,
            RELAY_CLIENTS_REGISTERED,
            RELAY_ENVELOPES_TOTAL,
            RELAY_FORWARDS_TOTAL,
            RELAY_FORWARD_DROPS_TOTAL,
            RELAY_MALFORMED_ENVELOPES_TOTAL,
            RELAY_SESSION_DURATION_SECONDS,
            STATUS_REQUESTS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
