//! Prometheus metrics for ingestion monitoring.
//!
//! This module provides metrics for:
//! - Snapshots persisted and discarded
//! - WebSocket messages, decode errors and reconnects
//! - Store insert latency

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing::{debug, info};

// === Metric Name Constants ===

/// Snapshots written to the store.
pub const METRIC_SNAPSHOTS_PERSISTED: &str = "snapshots_persisted_total";
/// Book messages dropped because one side was empty.
pub const METRIC_SNAPSHOTS_DISCARDED: &str = "snapshots_discarded_total";
/// WebSocket messages received counter metric name.
pub const METRIC_WS_MESSAGES_RECEIVED: &str = "ws_messages_received_total";
/// Messages that could not be decoded.
pub const METRIC_DECODE_ERRORS: &str = "decode_errors_total";
/// WebSocket reconnects counter metric name.
pub const METRIC_WS_RECONNECTS: &str = "ws_reconnects_total";
/// Connection cycles that ended in an error.
pub const METRIC_CYCLE_FAILURES: &str = "collector_cycle_failures_total";
/// Store insert latency metric name.
pub const METRIC_STORE_INSERT_LATENCY: &str = "store_insert_latency_ms";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(
        METRIC_STORE_INSERT_LATENCY,
        "Snapshot insert latency in milliseconds"
    );

    describe_counter!(
        METRIC_SNAPSHOTS_PERSISTED,
        "Total number of snapshots persisted"
    );
    describe_counter!(
        METRIC_SNAPSHOTS_DISCARDED,
        "Total number of book messages discarded for an empty side"
    );
    describe_counter!(
        METRIC_WS_MESSAGES_RECEIVED,
        "Total number of WebSocket messages received"
    );
    describe_counter!(
        METRIC_DECODE_ERRORS,
        "Total number of inbound messages that failed to decode"
    );
    describe_counter!(
        METRIC_WS_RECONNECTS,
        "Total number of WebSocket reconnections"
    );
    describe_counter!(
        METRIC_CYCLE_FAILURES,
        "Total number of collector connection cycles that failed"
    );

    debug!("Metrics initialized");
}

/// Install the Prometheus exporter with an HTTP listener on `port`.
///
/// Must be called from within a tokio runtime.
pub fn install_prometheus(port: u16) -> Result<(), BuildError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

/// Record store insert latency.
pub fn record_store_insert_latency(start: Instant, trading_pair: &str) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_STORE_INSERT_LATENCY, "pair" => trading_pair.to_string()).record(latency_ms);
}

/// Increment snapshots persisted counter.
pub fn inc_snapshots_persisted(trading_pair: &str) {
    counter!(METRIC_SNAPSHOTS_PERSISTED, "pair" => trading_pair.to_string()).increment(1);
}

/// Increment snapshots discarded counter.
pub fn inc_snapshots_discarded(trading_pair: &str) {
    counter!(METRIC_SNAPSHOTS_DISCARDED, "pair" => trading_pair.to_string()).increment(1);
}

/// Increment WebSocket messages received counter.
pub fn inc_ws_messages_received() {
    counter!(METRIC_WS_MESSAGES_RECEIVED).increment(1);
}

/// Increment decode errors counter.
pub fn inc_decode_errors(trading_pair: &str) {
    counter!(METRIC_DECODE_ERRORS, "pair" => trading_pair.to_string()).increment(1);
}

/// Increment WebSocket reconnects counter.
pub fn inc_ws_reconnects(trading_pair: &str) {
    counter!(METRIC_WS_RECONNECTS, "pair" => trading_pair.to_string()).increment(1);
}

/// Increment cycle failures counter.
pub fn inc_cycle_failures(trading_pair: &str) {
    counter!(METRIC_CYCLE_FAILURES, "pair" => trading_pair.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_are_noops_without_recorder() {
        init_metrics();
        inc_snapshots_persisted("BTC-ZAR");
        inc_decode_errors("BTC-ZAR");
        record_store_insert_latency(Instant::now(), "BTC-ZAR");
    }
}
