//! Market Data Streaming Types
//!
//! Core domain types for market data: trades, prices, and candles.
//! These types are venue-agnostic and represent the canonical
//! events every venue adapter produces.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::symbol::Pair;

/// Milliseconds since the Unix epoch.
pub type TimestampMs = i64;

// =============================================================================
// Trades
// =============================================================================

/// A single executed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Execution price.
    pub price: Decimal,
    /// Executed quantity in base units.
    pub size: Decimal,
    /// Execution time.
    pub timestamp: TimestampMs,
}

impl Trade {
    /// Create a trade.
    #[must_use]
    pub const fn new(price: Decimal, size: Decimal, timestamp: TimestampMs) -> Self {
        Self {
            price,
            size,
            timestamp,
        }
    }
}

/// Trades for one symbol delivered in a single push frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeBatch {
    /// Canonical symbol.
    pub symbol: Pair,
    /// Trades in the order the venue sent them.
    pub trades: Vec<Trade>,
}

// =============================================================================
// Interval
// =============================================================================

/// Candle interval such as `1m`, `4h`, `1w` or `1M`.
///
/// `M` is a calendar month. Its [`millis`](Interval::millis) is a nominal
/// 30 days; month windows have no fixed length, so only venues pushing
/// them natively can serve them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Interval {
    label: String,
    millis: i64,
}

/// Error parsing an interval string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid interval {0:?}")]
pub struct IntervalParseError(pub String);

impl Interval {
    /// Interval label as the venue spells it.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.label
    }

    /// Interval length in milliseconds.
    #[must_use]
    pub const fn millis(&self) -> i64 {
        self.millis
    }

    /// Whether the interval counts calendar months rather than a fixed span.
    #[must_use]
    pub fn is_calendar(&self) -> bool {
        self.label.ends_with('M')
    }
}

impl FromStr for Interval {
    type Err = IntervalParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || IntervalParseError(s.to_string());

        let unit = s.chars().last().ok_or_else(err)?;
        let count: i64 = s[..s.len() - unit.len_utf8()].parse().map_err(|_| err())?;
        if count <= 0 {
            return Err(err());
        }

        let unit_millis = match unit {
            's' => 1_000,
            'm' => 60_000,
            'h' => 3_600_000,
            'd' => 86_400_000,
            'w' => 604_800_000,
            'M' => 2_592_000_000,
            _ => return Err(err()),
        };

        Ok(Self {
            label: s.to_string(),
            millis: count.checked_mul(unit_millis).ok_or_else(err)?,
        })
    }
}

impl TryFrom<String> for Interval {
    type Error = IntervalParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(value: Interval) -> Self {
        value.label
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

// =============================================================================
// Canonical Events
// =============================================================================

/// Last traded price update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceEvent {
    /// Canonical symbol.
    pub symbol: Pair,
    /// Last price.
    pub price: Decimal,
    /// Venue event time.
    pub timestamp: TimestampMs,
}

/// OHLC candle update, native or synthesized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandleEvent {
    /// Canonical symbol.
    pub symbol: Pair,
    /// First trade price of the window.
    pub open: Decimal,
    /// Highest trade price.
    pub high: Decimal,
    /// Lowest trade price.
    pub low: Decimal,
    /// Last trade price.
    pub close: Decimal,
    /// Quote volume (sum of price * size).
    pub volume: Decimal,
    /// Window open time.
    pub timestamp: TimestampMs,
    /// Candle interval.
    pub interval: Interval,
    /// Whether the window has closed; `None` when the venue does not say.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_closed: Option<bool>,
    /// Exclusive window close time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_at: Option<TimestampMs>,
}

/// Error payload carried by the `error` event.
///
/// These are failures no single caller owns, so they are published to every
/// event consumer instead of being returned from a method.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamFault {
    /// An inbound correlation id had no pending request.
    #[error("protocol desync: response for unknown request id {id}")]
    ProtocolDesync {
        /// The unmatched id.
        id: u64,
    },

    /// A pushed symbol could not be resolved against the symbol cache.
    #[error("symbol cache desync: {symbol}")]
    CacheDesync {
        /// Native symbol as received.
        symbol: String,
    },

    /// Frame could not be decoded or the socket reported an error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Venue error frame without a correlation id.
    #[error("venue error ({code}): {message}")]
    Venue {
        /// Venue error code.
        code: i64,
        /// Venue error message.
        message: String,
    },

    /// Candle synthesis failed for a registration.
    #[error("candle synthesis error: {0}")]
    Synthesis(String),
}

/// Events published to stream consumers.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// `newPrice`
    NewPrice(PriceEvent),
    /// `candle`
    Candle(CandleEvent),
    /// Raw decoded frame, diagnostic only.
    Payload(serde_json::Value),
    /// `error`
    Error(StreamFault),
}

impl StreamEvent {
    /// Symbol the event refers to, if any.
    #[must_use]
    pub const fn symbol(&self) -> Option<&Pair> {
        match self {
            Self::NewPrice(price) => Some(&price.symbol),
            Self::Candle(candle) => Some(&candle.symbol),
            Self::Payload(_) | Self::Error(_) => None,
        }
    }
}
