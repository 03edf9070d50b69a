//! Domain Layer - Core market data types and algorithms.
//!
//! This layer contains the canonical symbol, event, subscription and candle
//! window types with no I/O. Everything here is pure Rust.

/// Canonical trading pairs and native symbol formatting.
pub mod symbol;

/// Market data event types (trades, prices, candles).
pub mod streaming;

/// Subscription requests and shared-feed reference counting.
pub mod subscription;

/// Trade-to-candle window accumulation.
pub mod candle;
