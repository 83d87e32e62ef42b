//! Metrics collection and export for the node.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use udpcast_core::{ChannelError, ErrorSink, ReactorStats, TracingErrorSink};

/// Metric names.
pub mod names {
    pub const DATAGRAMS_TOTAL: &str = "udpcast_datagrams_total";
    pub const BYTES_TOTAL: &str = "udpcast_bytes_total";
    pub const CHANNELS_ACTIVE: &str = "udpcast_channels_active";
    pub const ERRORS_TOTAL: &str = "udpcast_errors_total";
}

/// Direction label for traffic metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Sent => "sent",
            Direction::Received => "received",
        }
    }
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::DATAGRAMS_TOTAL,
        "Total number of datagrams by direction"
    );
    metrics::describe_counter!(names::BYTES_TOTAL, "Total payload bytes by direction");
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Current number of open channels");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of channel errors by kind");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record one datagram.
pub fn record_datagram(direction: Direction, bytes: usize) {
    counter!(names::DATAGRAMS_TOTAL, "direction" => direction.as_str()).increment(1);
    counter!(names::BYTES_TOTAL, "direction" => direction.as_str()).increment(bytes as u64);
}

/// Record an error.
pub fn record_error(kind: &'static str) {
    counter!(names::ERRORS_TOTAL, "kind" => kind).increment(1);
}

/// Publish reactor-wide totals.
///
/// Sent traffic completes asynchronously, so it is taken from the registry
/// rather than counted at the publish call.
pub fn record_reactor_stats(stats: &ReactorStats, last_sent: &mut ReactorStats) {
    gauge!(names::CHANNELS_ACTIVE).set(stats.channel_count as f64);

    let datagrams = stats.datagrams_sent.saturating_sub(last_sent.datagrams_sent);
    let bytes = stats.bytes_sent.saturating_sub(last_sent.bytes_sent);
    counter!(names::DATAGRAMS_TOTAL, "direction" => Direction::Sent.as_str()).increment(datagrams);
    counter!(names::BYTES_TOTAL, "direction" => Direction::Sent.as_str()).increment(bytes);
    *last_sent = *stats;
}

/// Error sink that logs and counts errors by kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsErrorSink {
    inner: TracingErrorSink,
}

impl ErrorSink for MetricsErrorSink {
    fn report(&self, error: &ChannelError) {
        record_error(error.kind());
        self.inner.report(error);
    }
}
