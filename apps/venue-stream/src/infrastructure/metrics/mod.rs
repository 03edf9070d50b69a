//! Prometheus Metrics Module
//!
//! Counters and gauges for the subscription engine, exposed in Prometheus
//! format by the exporter's HTTP listener.
//!
//! # Metrics Categories
//!
//! - **Frames**: inbound frames, decode errors and protocol desyncs per venue
//! - **Symbols**: cache refresh outcomes and heuristic symbol fallbacks
//! - **Requests**: pending correlated requests
//! - **Candles**: synthesized candles by closed or in-progress
//! - **Connections**: open retry attempts
//!
//! Recording functions are no-ops until [`init_metrics`] installs a recorder,
//! so library code and tests call them unconditionally.

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// =============================================================================
// Installation
// =============================================================================

/// Install the Prometheus recorder and serve `/metrics` on `listen`.
///
/// Must run inside a Tokio runtime. Fails if a recorder is already installed
/// or the listener cannot bind.
pub fn init_metrics(listen: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(listen).install()?;
    register_metrics();
    tracing::info!(%listen, "Prometheus exporter listening");
    Ok(())
}

fn register_metrics() {
    describe_counter!(
        "venue_stream_frames_received_total",
        "Inbound frames received from venue streams"
    );
    describe_counter!(
        "venue_stream_decode_errors_total",
        "Inbound frames the venue dialect could not decode"
    );
    describe_counter!(
        "venue_stream_protocol_desyncs_total",
        "Responses carrying an unknown correlation id"
    );

    describe_counter!(
        "venue_stream_symbol_cache_refreshes_total",
        "Symbol cache refreshes by outcome"
    );
    describe_counter!(
        "venue_stream_symbol_fallbacks_total",
        "Native symbols resolved by the length heuristic"
    );

    describe_gauge!(
        "venue_stream_pending_requests",
        "Correlated requests awaiting a response"
    );

    describe_counter!(
        "venue_stream_synthesized_candles_total",
        "Candles built from raw trades"
    );

    describe_counter!(
        "venue_stream_open_retries_total",
        "Stream open attempts that failed and were retried"
    );
}

// =============================================================================
// Recording Functions
// =============================================================================

/// Record an inbound frame.
pub fn record_frame_received(venue: &str) {
    counter!("venue_stream_frames_received_total", "venue" => venue.to_string()).increment(1);
}

/// Record a frame that failed to decode.
pub fn record_decode_error(venue: &str) {
    counter!("venue_stream_decode_errors_total", "venue" => venue.to_string()).increment(1);
}

/// Record a response with an unknown correlation id.
pub fn record_protocol_desync(venue: &str) {
    counter!("venue_stream_protocol_desyncs_total", "venue" => venue.to_string()).increment(1);
}

/// Record a symbol cache refresh.
pub fn record_cache_refresh(venue: &str, success: bool) {
    counter!(
        "venue_stream_symbol_cache_refreshes_total",
        "venue" => venue.to_string(),
        "outcome" => outcome_label(success)
    )
    .increment(1);
}

/// Record a heuristic symbol resolution.
pub fn record_symbol_fallback(venue: &str) {
    counter!("venue_stream_symbol_fallbacks_total", "venue" => venue.to_string()).increment(1);
}

/// Update the pending request gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_pending_requests(count: usize) {
    gauge!("venue_stream_pending_requests").set(count as f64);
}

/// Record a synthesized candle.
pub fn record_synthesized_candle(closed: bool) {
    counter!(
        "venue_stream_synthesized_candles_total",
        "state" => candle_state_label(closed)
    )
    .increment(1);
}

/// Record a failed open attempt that will be retried.
pub fn record_open_retry(venue: &str) {
    counter!("venue_stream_open_retries_total", "venue" => venue.to_string()).increment(1);
}

const fn outcome_label(success: bool) -> &'static str {
    if success { "success" } else { "failure" }
}

const fn candle_state_label(closed: bool) -> &'static str {
    if closed { "closed" } else { "in_progress" }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        assert_eq!(outcome_label(true), "success");
        assert_eq!(outcome_label(false), "failure");
        assert_eq!(candle_state_label(true), "closed");
        assert_eq!(candle_state_label(false), "in_progress");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received("binance");
        record_cache_refresh("binance", false);
        set_pending_requests(3);
        record_synthesized_candle(true);
    }
}
