//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connections refused by routing (counter, labels: code).
pub const WS_REJECTIONS_TOTAL: &str = "ws_rejections_total";
/// Sessions whose first trial was presented (counter).
pub const SESSIONS_STARTED_TOTAL: &str = "sessions_started_total";
/// Sessions that reached the last answer (counter).
pub const SESSIONS_COMPLETED_TOTAL: &str = "sessions_completed_total";
/// Sessions aborted (counter).
pub const SESSIONS_ABORTED_TOTAL: &str = "sessions_aborted_total";
/// Accepted trial answers (counter).
pub const TRIAL_ANSWERS_TOTAL: &str = "trial_answers_total";
/// Server-measured response time in milliseconds (histogram).
pub const TRIAL_RESPONSE_MS: &str = "trial_response_ms";
