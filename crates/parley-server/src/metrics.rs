//! Metrics export for Parley.
//!
//! The hub records through the `metrics` facade; this module describes those
//! metrics and exports them in Prometheus format.

use metrics::gauge;
use metrics_exporter_prometheus::PrometheusBuilder;
use parley_core::metrics::names as hub;
use std::net::SocketAddr;
use tracing::info;

/// Metric names owned by the server.
pub mod names {
    pub const CONNECTIONS_ACTIVE: &str = "parley_connections_active";
    pub const ROOMS_ACTIVE: &str = "parley_rooms_active";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of attached WebSocket connections"
    );
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of rooms");
    metrics::describe_counter!(hub::ROOMS_CREATED_TOTAL, "Total number of rooms created");
    metrics::describe_counter!(
        hub::CLIENTS_ATTACHED_TOTAL,
        "Total number of clients attached to rooms"
    );
    metrics::describe_counter!(
        hub::MESSAGES_INBOUND_TOTAL,
        "Total number of messages received from clients"
    );
    metrics::describe_histogram!(
        hub::FANOUT_RECIPIENTS,
        "Members reached by a single broadcast"
    );
    metrics::describe_counter!(hub::FRAMES_WRITTEN_TOTAL, "Total number of frames written");
    metrics::describe_counter!(hub::FRAMES_WRITTEN_BYTES, "Total bytes of frames written");
    metrics::describe_counter!(
        hub::SLOW_CONSUMERS_TOTAL,
        "Members disconnected because their mailbox was full"
    );
    metrics::describe_counter!(
        hub::ABNORMAL_CLOSES_TOTAL,
        "Connections that ended with an unexpected close or error"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Update the room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Keeps the active connection gauge raised for its lifetime.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}
