#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::similar_names
    )
)]

//! Venue Stream - Exchange Market Data Subscription Engine
//!
//! Uniform real-time market data over heterogeneous exchange venues. One
//! WebSocket per venue carries many logical subscriptions, venue-native
//! symbols resolve to canonical `BASE/QUOTE` pairs through a shared symbol
//! cache, and venues without a candle push get candles synthesized from
//! their trade stream.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and algorithms
//!   - `symbol`: Canonical pairs and native symbol styles
//!   - `streaming`: Trades, intervals and canonical events
//!   - `subscription`: Validated subscriptions and feed reference counts
//!   - `candle`: Trade windows and candle accumulation
//!
//! - **Application**: Ports and services
//!   - `ports`: Transport, venue dialect and REST source interfaces
//!   - `services`: Symbol cache, registry and resolver
//!
//! - **Infrastructure**: Adapters and runtime
//!   - `stream`: Connection state machine, heartbeat, correlation, multiplexer
//!   - `candles`: Candle synthesizer
//!   - `client`: Venue client facade
//!   - `transport`: WebSocket and in-process transports
//!   - `venues`: Binance-style dialect and REST adapters
//!   - `http`, `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! Venue WS ──► StreamConnection ──► SubscriptionMultiplexer ──► events()
//!                   ▲                    │        │
//!              heartbeat           PendingTable   └─► trades ──► CandleSynthesizer
//!                                  (by id)                            │
//!                                                    HistorySource ───┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market data types with no I/O.
pub mod domain;

/// Application layer - Ports and services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{
    CandleEvent, Interval, PriceEvent, StreamEvent, StreamFault, TimestampMs, Trade, TradeBatch,
};
pub use domain::subscription::{Channel, Subscription, SubscriptionError};
pub use domain::symbol::{Pair, SymbolCase, SymbolStyle};

// Services
pub use application::services::{SymbolNamespace, SymbolRegistry, SymbolResolver};

// Client facade
pub use infrastructure::client::{ClientError, UnsubscribeTarget, VenueClient};

// Infrastructure config
pub use infrastructure::config::{ConfigError, StreamConfig, StreamSettings, VenueSettings};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
