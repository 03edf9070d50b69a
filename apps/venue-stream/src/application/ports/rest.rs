//! Venue REST Ports
//!
//! Metadata and history fetchers the engine consumes. Signing and order
//! placement live elsewhere; these are read-only market endpoints.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::domain::streaming::{CandleEvent, Interval, TimestampMs, Trade};
use crate::domain::symbol::Pair;

/// Tickers and native pair strings listed by a venue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarketListing {
    /// Unique asset tickers (`BTC`, `USDT`, ...).
    pub tickers: HashSet<String>,
    /// Native pair strings (`BTCUSDT`, ...).
    pub pairs: HashSet<String>,
}

impl MarketListing {
    /// Build a listing from `(native, base, quote)` rows.
    #[must_use]
    pub fn from_rows<I, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = (S, S, S)>,
        S: Into<String>,
    {
        let mut listing = Self::default();
        for (native, base, quote) in rows {
            listing.pairs.insert(native.into());
            listing.tickers.insert(base.into());
            listing.tickers.insert(quote.into());
        }
        listing
    }
}

/// Typed failure of a venue HTTP call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// Status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// Request could not be sent or the response not read.
    #[error("network error: {0}")]
    Network(String),

    /// Request timed out.
    #[error("request timed out")]
    Timeout,

    /// Response body did not have the expected shape.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Source of venue market metadata.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch the current market listing.
    async fn fetch_markets(&self) -> Result<MarketListing, FetchError>;
}

/// Source of historical candles and trades.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Most recent candle for `(symbol, interval)`.
    async fn latest_candle(
        &self,
        symbol: &Pair,
        interval: &Interval,
    ) -> Result<CandleEvent, FetchError>;

    /// Trades executed at or after `since`, oldest first.
    async fn trades_since(
        &self,
        symbol: &Pair,
        since: TimestampMs,
    ) -> Result<Vec<Trade>, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_from_rows_dedupes_tickers() {
        let listing = MarketListing::from_rows([
            ("BTCUSDT", "BTC", "USDT"),
            ("ETHUSDT", "ETH", "USDT"),
            ("ETHBTC", "ETH", "BTC"),
        ]);
        assert_eq!(listing.pairs.len(), 3);
        assert_eq!(listing.tickers.len(), 3);
        assert!(listing.tickers.contains("USDT"));
    }
}
