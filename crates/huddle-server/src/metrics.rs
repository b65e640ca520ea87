//! Metrics collection and export for Huddle.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use huddle_core::HubStats;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "huddle_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "huddle_connections_active";
    pub const ADMISSIONS_DENIED: &str = "huddle_admissions_denied_total";
    pub const MEMBERS: &str = "huddle_members";
    pub const BROADCASTS_TOTAL: &str = "huddle_broadcasts_total";
    pub const DELIVERIES_TOTAL: &str = "huddle_deliveries_total";
    pub const DROPPED_TOTAL: &str = "huddle_dropped_total";
    pub const EVICTED_TOTAL: &str = "huddle_evicted_total";
    pub const ERRORS_TOTAL: &str = "huddle_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::ADMISSIONS_DENIED,
        "Upgrade requests refused for a missing or invalid session"
    );
    metrics::describe_gauge!(names::MEMBERS, "Current number of room members");
    metrics::describe_counter!(names::BROADCASTS_TOTAL, "Messages fanned out by the room");
    metrics::describe_counter!(names::DELIVERIES_TOTAL, "Messages enqueued for members");
    metrics::describe_counter!(
        names::DROPPED_TOTAL,
        "Messages skipped for members with a full queue"
    );
    metrics::describe_counter!(names::EVICTED_TOTAL, "Members removed for being too slow");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

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

/// Record a refused upgrade.
pub fn record_admission_denied(reason: &str) {
    counter!(names::ADMISSIONS_DENIED, "reason" => reason.to_string()).increment(1);
}

/// Publish a hub statistics snapshot.
///
/// Hub counters are cumulative, so they are mirrored with `absolute`.
pub fn record_hub_stats(stats: &HubStats) {
    gauge!(names::MEMBERS).set(stats.members as f64);
    counter!(names::BROADCASTS_TOTAL).absolute(stats.broadcasts);
    counter!(names::DELIVERIES_TOTAL).absolute(stats.deliveries);
    counter!(names::DROPPED_TOTAL).absolute(stats.dropped);
    counter!(names::EVICTED_TOTAL).absolute(stats.evicted);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_guard() {
        // No recorder installed; recording must still be a no-op
        let _guard = ConnectionMetricsGuard::new();
        record_admission_denied("missing");
        record_hub_stats(&HubStats::default());
    }
}
