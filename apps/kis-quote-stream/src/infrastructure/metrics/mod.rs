//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Stream**: Frames received, records dispatched, decode failures
//! - **Connection**: Streaming connection state and reconnects
//! - **Subscriptions**: Registered symbol count
//! - **Credentials**: Token and approval key issuance
//! - **REST**: Quote inquiry outcomes and latency
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Repeated calls return the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Stream counters
    describe_counter!(
        "kis_stream_frames_received_total",
        "Total frames received from the KIS WebSocket by kind"
    );
    describe_counter!(
        "kis_stream_records_dispatched_total",
        "Total decoded records routed to handlers"
    );
    describe_counter!(
        "kis_stream_decode_errors_total",
        "Total frames that failed to decode"
    );
    describe_counter!(
        "kis_stream_handler_failures_total",
        "Total handler invocations that returned an error or panicked"
    );

    // Connection
    describe_gauge!(
        "kis_stream_connected",
        "1 when the streaming connection is open, 0 otherwise"
    );
    describe_counter!(
        "kis_stream_reconnects_total",
        "Total streaming reconnection attempts"
    );
    describe_counter!(
        "kis_stream_errors_total",
        "Total streaming session errors by type"
    );

    // Subscriptions
    describe_gauge!(
        "kis_stream_subscriptions",
        "Number of symbols in the subscription registry"
    );

    // Credentials
    describe_counter!(
        "kis_auth_credentials_issued_total",
        "Total credentials fetched from the KIS OAuth endpoints"
    );

    // REST
    describe_counter!(
        "kis_rest_requests_total",
        "Total REST quote inquiries by endpoint and outcome"
    );
    describe_histogram!(
        "kis_rest_request_seconds",
        "REST quote inquiry latency"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for inbound frame kinds.
#[derive(Debug, Clone, Copy)]
pub enum FrameKind {
    /// Pipe-delimited data frame.
    Data,
    /// `PINGPONG` keepalive.
    Heartbeat,
    /// JSON control acknowledgment.
    Control,
    /// Frame for an unrecognized transaction id.
    Unknown,
}

impl FrameKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Heartbeat => "heartbeat",
            Self::Control => "control",
            Self::Unknown => "unknown",
        }
    }
}

/// Metric labels for REST endpoints.
#[derive(Debug, Clone, Copy)]
pub enum RestEndpoint {
    /// Current price inquiry.
    CurrentPrice,
    /// Order book inquiry.
    OrderBook,
}

impl RestEndpoint {
    const fn as_str(self) -> &'static str {
        match self {
            Self::CurrentPrice => "current_price",
            Self::OrderBook => "order_book",
        }
    }
}

/// Record a frame received from the stream.
pub fn record_frame_received(kind: FrameKind) {
    counter!(
        "kis_stream_frames_received_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a record routed to handlers.
pub fn record_dispatched(record_kind: &'static str) {
    counter!(
        "kis_stream_records_dispatched_total",
        "record" => record_kind
    )
    .increment(1);
}

/// Record a frame that failed to decode.
pub fn record_decode_error() {
    counter!("kis_stream_decode_errors_total").increment(1);
}

/// Record a failing handler invocation.
pub fn record_handler_failure(record_kind: &'static str) {
    counter!(
        "kis_stream_handler_failures_total",
        "record" => record_kind
    )
    .increment(1);
}

/// Update the connection gauge.
pub fn set_connected(connected: bool) {
    gauge!("kis_stream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record a streaming reconnection attempt.
pub fn record_reconnect() {
    counter!("kis_stream_reconnects_total").increment(1);
}

/// Record a streaming session error.
pub fn record_stream_error(error_type: &str) {
    counter!(
        "kis_stream_errors_total",
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Update the subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("kis_stream_subscriptions").set(count as f64);
}

/// Record a credential fetched from the OAuth endpoints.
pub fn record_credential_issued(credential: &'static str) {
    counter!(
        "kis_auth_credentials_issued_total",
        "credential" => credential
    )
    .increment(1);
}

/// Record a REST inquiry outcome and latency.
pub fn record_rest_request(endpoint: RestEndpoint, outcome: &'static str, duration: Duration) {
    counter!(
        "kis_rest_requests_total",
        "endpoint" => endpoint.as_str(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "kis_rest_request_seconds",
        "endpoint" => endpoint.as_str()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_kind_as_str() {
        assert_eq!(FrameKind::Data.as_str(), "data");
        assert_eq!(FrameKind::Heartbeat.as_str(), "heartbeat");
        assert_eq!(FrameKind::Control.as_str(), "control");
        assert_eq!(FrameKind::Unknown.as_str(), "unknown");
    }

    #[test]
    fn rest_endpoint_as_str() {
        assert_eq!(RestEndpoint::CurrentPrice.as_str(), "current_price");
        assert_eq!(RestEndpoint::OrderBook.as_str(), "order_book");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received(FrameKind::Data);
        record_rest_request(RestEndpoint::OrderBook, "ok", Duration::from_millis(3));
        set_connected(true);
        set_subscriptions(2);
    }
}
