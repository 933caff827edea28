//! Prometheus metrics endpoint
//!
//! Exposes relay metrics in Prometheus format for monitoring.

use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;

/// Global Prometheus handle for metrics export
static PROMETHEUS_HANDLE: Lazy<PrometheusHandle> = Lazy::new(|| {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
});

/// Initialize metrics (call once at startup)
pub fn init_metrics() {
    // Force initialization of the lazy static
    let _ = &*PROMETHEUS_HANDLE;

    register_metrics();
}

fn register_metrics() {
    metrics::describe_counter!(
        "threatlens_relay_requests_total",
        "Total number of relay requests by outcome"
    );
    metrics::describe_histogram!(
        "threatlens_relay_duration_seconds",
        "Time until the relay answered (stream start or error)"
    );
    metrics::describe_counter!(
        "threatlens_relay_chunks_total",
        "Total upstream body chunks relayed"
    );
    metrics::describe_counter!(
        "threatlens_relay_disconnects_total",
        "Streams abandoned by the consumer before the upstream finished"
    );
}

/// Prometheus metrics endpoint handler
pub async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE.render()
}

/// Record a relay request outcome
///
/// Labels come from a fixed set only; the caller-chosen model name is never
/// used as a label.
pub fn record_relay_request(status: &'static str, duration_secs: f64) {
    metrics::counter!("threatlens_relay_requests_total", "status" => status).increment(1);
    metrics::histogram!("threatlens_relay_duration_seconds", "status" => status)
        .record(duration_secs);
}

/// Record chunks relayed for one stream
pub fn record_stream_chunks(count: u64) {
    metrics::counter!("threatlens_relay_chunks_total").increment(count);
}

/// Record a consumer disconnecting mid-stream
pub fn record_consumer_disconnect() {
    metrics::counter!("threatlens_relay_disconnects_total").increment(1);
}
