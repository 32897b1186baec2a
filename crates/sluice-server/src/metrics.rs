//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed.
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

/// Connections accepted (counter).
pub const CONNECTIONS_TOTAL: &str = "sluice_connections_total";
/// Connections closed (counter).
pub const DISCONNECTIONS_TOTAL: &str = "sluice_disconnections_total";
/// Connections refused at the connection limit (counter).
pub const CONNECTIONS_REJECTED_TOTAL: &str = "sluice_connections_rejected_total";
/// Live connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "sluice_connections_active";
/// Connection lifetime (histogram).
pub const CONNECTION_DURATION_SECONDS: &str = "sluice_connection_duration_seconds";
/// Connections bound to a subscriber (gauge).
pub const SESSIONS_BOUND: &str = "sluice_sessions_bound";
/// Packets handled (counter, labels: type).
pub const PACKETS_TOTAL: &str = "sluice_packets_total";
/// Packet handling time (histogram, labels: type).
pub const PACKET_DURATION_SECONDS: &str = "sluice_packet_duration_seconds";
/// Error responses sent (counter, labels: code, kind).
pub const ERRORS_TOTAL: &str = "sluice_errors_total";
/// Records handed out by GET (counter).
pub const RECORDS_DELIVERED_TOTAL: &str = "sluice_records_delivered_total";
/// Capture worker starts (counter).
pub const WORKER_STARTS_TOTAL: &str = "sluice_worker_starts_total";
/// Capture worker stops (counter).
pub const WORKER_STOPS_TOTAL: &str = "sluice_worker_stops_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            CONNECTIONS_TOTAL,
            DISCONNECTIONS_TOTAL,
            CONNECTIONS_REJECTED_TOTAL,
            CONNECTIONS_ACTIVE,
            CONNECTION_DURATION_SECONDS,
            SESSIONS_BOUND,
            PACKETS_TOTAL,
            PACKET_DURATION_SECONDS,
            ERRORS_TOTAL,
            RECORDS_DELIVERED_TOTAL,
            WORKER_STARTS_TOTAL,
            WORKER_STOPS_TOTAL,
        ];
        for name in names {
            assert!(
                name.starts_with("sluice_")
                    && name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be prefixed snake_case"
            );
        }
    }
}
