//! Prometheus recorder and metric names shared across crates.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

#[derive(Debug, thiserror::Error)]
#[error("failed to install metrics recorder: {0}")]
pub struct MetricsError(#[from] BuildError);

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Returns the handle used to render `/metrics`. Fails if another recorder
/// is already installed.
pub fn install_metrics_recorder() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe();
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render the Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

fn describe() {
    use ::metrics::{describe_counter, describe_gauge};

    describe_counter!(names::EVENTS_CONSUMED_TOTAL, "Messages pulled from the bus");
    describe_counter!(names::EVENTS_BROADCAST_TOTAL, "Events handed to the broadcaster");
    describe_counter!(names::EVENTS_UNKNOWN_TOTAL, "Events normalized to the UNKNOWN subject");
    describe_counter!(names::VIEWER_DELIVERIES_TOTAL, "Frames queued to viewers");
    describe_counter!(names::VIEWER_DELIVERY_FAILURES_TOTAL, "Viewers torn down during broadcast");
    describe_counter!(names::VIEWER_OVERFLOW_DROPS_TOTAL, "Frames dropped from saturated viewer queues");
    describe_counter!(names::VIEWER_CONNECTIONS_TOTAL, "Viewer connections accepted");
    describe_counter!(names::BUS_CONNECT_FAILURES_TOTAL, "Failed bus connection attempts");
    describe_counter!(names::BUS_RECONNECTS_TOTAL, "Bus connections lost while consuming");
    describe_counter!(names::BUS_COMMIT_FAILURES_TOTAL, "Offset commits that failed");
    describe_gauge!(names::VIEWER_SESSIONS_REGISTERED, "Currently registered viewer sessions");
}

/// Metric name constants to avoid typos across crates.
pub mod names {
    /// Bus messages consumed (counter).
    pub const EVENTS_CONSUMED_TOTAL: &str = "pulse_events_consumed_total";
    /// Events broadcast (counter).
    pub const EVENTS_BROADCAST_TOTAL: &str = "pulse_events_broadcast_total";
    /// Malformed payloads degraded to the sentinel subject (counter).
    pub const EVENTS_UNKNOWN_TOTAL: &str = "pulse_events_unknown_total";
    /// Successful per-viewer enqueues (counter).
    pub const VIEWER_DELIVERIES_TOTAL: &str = "pulse_viewer_deliveries_total";
    /// Failed per-viewer deliveries (counter, labels: reason).
    pub const VIEWER_DELIVERY_FAILURES_TOTAL: &str = "pulse_viewer_delivery_failures_total";
    /// Frames discarded by drop-oldest (counter).
    pub const VIEWER_OVERFLOW_DROPS_TOTAL: &str = "pulse_viewer_overflow_drops_total";
    /// Viewer connections accepted (counter).
    pub const VIEWER_CONNECTIONS_TOTAL: &str = "pulse_viewer_connections_total";
    /// Registered viewer sessions (gauge).
    pub const VIEWER_SESSIONS_REGISTERED: &str = "pulse_viewer_sessions_registered";
    /// Bus connect failures (counter, labels: kind).
    pub const BUS_CONNECT_FAILURES_TOTAL: &str = "pulse_bus_connect_failures_total";
    /// Connection losses after reaching Consuming (counter).
    pub const BUS_RECONNECTS_TOTAL: &str = "pulse_bus_reconnects_total";
    /// Commit failures (counter).
    pub const BUS_COMMIT_FAILURES_TOTAL: &str = "pulse_bus_commit_failures_total";

    pub const ALL: &[&str] = &[
        EVENTS_CONSUMED_TOTAL,
        EVENTS_BROADCAST_TOTAL,
        EVENTS_UNKNOWN_TOTAL,
        VIEWER_DELIVERIES_TOTAL,
        VIEWER_DELIVERY_FAILURES_TOTAL,
        VIEWER_OVERFLOW_DROPS_TOTAL,
        VIEWER_CONNECTIONS_TOTAL,
        VIEWER_SESSIONS_REGISTERED,
        BUS_CONNECT_FAILURES_TOTAL,
        BUS_RECONNECTS_TOTAL,
        BUS_COMMIT_FAILURES_TOTAL,
    ];
}
