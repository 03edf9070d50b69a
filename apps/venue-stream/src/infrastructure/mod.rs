//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete transports, venue dialects, the stream engine built on the
//! application ports, and the ambient runtime concerns.

/// Stream connection, heartbeat, retry policy and subscription multiplexer.
pub mod stream;

/// WebSocket and in-process transports.
pub mod transport;

/// Venue dialects and REST adapters.
pub mod venues;

/// Trade-driven candle synthesis.
pub mod candles;

/// Venue client facade.
pub mod client;

/// REST client for venue metadata and history.
pub mod http;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
