//! Binance Wire Messages
//!
//! Serde types for the Binance-style stream protocol and the REST payloads
//! the adapters read.
//!
//! # Control
//!
//! ```json
//! {"method": "SUBSCRIBE", "params": ["btcusdt@trade"], "id": 1}
//! {"result": null, "id": 1}
//! {"error": {"code": 2, "msg": "Invalid request"}, "id": 1}
//! ```
//!
//! # Push
//!
//! Push payloads carry an event type in `e`: `trade`, `aggTrade`, `kline`
//! and `24hrMiniTicker`. Combined streams wrap them as
//! `{"stream": "...", "data": {...}}`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Control Messages
// =============================================================================

/// Outbound control request.
#[derive(Debug, Clone, Serialize)]
pub struct ControlRequest<'a> {
    /// `SUBSCRIBE`, `UNSUBSCRIBE` or `LIST_SUBSCRIPTIONS`.
    pub method: &'static str,
    /// Stream names.
    #[serde(skip_serializing_if = "no_params")]
    pub params: &'a [String],
    /// Correlation id.
    pub id: u64,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn no_params(params: &&[String]) -> bool {
    params.is_empty()
}

/// Error body of a control response.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub msg: String,
}

// =============================================================================
// Push Messages
// =============================================================================

/// `trade` event.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeMessage {
    /// Native symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Price.
    #[serde(rename = "p")]
    pub price: Decimal,
    /// Quantity.
    #[serde(rename = "q")]
    pub quantity: Decimal,
    /// Trade time (ms).
    #[serde(rename = "T")]
    pub trade_time: i64,
}

/// `kline` event.
#[derive(Debug, Clone, Deserialize)]
pub struct KlineMessage {
    /// Native symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Candle body.
    #[serde(rename = "k")]
    pub kline: Kline,
}

/// Candle body of a `kline` event.
#[derive(Debug, Clone, Deserialize)]
pub struct Kline {
    /// Open time (ms).
    #[serde(rename = "t")]
    pub open_time: i64,
    /// Close time (ms, inclusive).
    #[serde(rename = "T")]
    pub close_time: i64,
    /// Interval string.
    #[serde(rename = "i")]
    pub interval: String,
    /// Open.
    #[serde(rename = "o")]
    pub open: Decimal,
    /// High.
    #[serde(rename = "h")]
    pub high: Decimal,
    /// Low.
    #[serde(rename = "l")]
    pub low: Decimal,
    /// Close.
    #[serde(rename = "c")]
    pub close: Decimal,
    /// Quote asset volume.
    #[serde(rename = "q")]
    pub quote_volume: Decimal,
    /// Whether the candle is final.
    #[serde(rename = "x")]
    pub is_closed: bool,
}

/// `24hrMiniTicker` event.
#[derive(Debug, Clone, Deserialize)]
pub struct MiniTickerMessage {
    /// Native symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Last price.
    #[serde(rename = "c")]
    pub close: Decimal,
    /// Event time (ms).
    #[serde(rename = "E")]
    pub event_time: i64,
}

// =============================================================================
// REST Payloads
// =============================================================================

/// `GET /api/v3/exchangeInfo`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    /// Listed symbols.
    pub symbols: Vec<SymbolInfo>,
}

/// One listed symbol.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    /// Native pair.
    pub symbol: String,
    /// Base asset.
    pub base_asset: String,
    /// Quote asset.
    pub quote_asset: String,
}

/// One `GET /api/v3/aggTrades` row.
#[derive(Debug, Clone, Deserialize)]
pub struct AggTrade {
    /// Aggregate trade id, increasing.
    #[serde(rename = "a")]
    pub id: u64,
    /// Price.
    #[serde(rename = "p")]
    pub price: Decimal,
    /// Quantity.
    #[serde(rename = "q")]
    pub quantity: Decimal,
    /// Trade time (ms).
    #[serde(rename = "T")]
    pub trade_time: i64,
}
