//! Venue Dialect Port
//!
//! Everything venue-specific about the stream wire format: channel token
//! naming, control request encoding, inbound frame classification and the
//! keep-alive frame. The multiplexer is written against this trait only.

use rust_decimal::Decimal;

use super::transport::Frame;
use crate::domain::streaming::{CandleEvent, Interval, TimestampMs, Trade};
use crate::domain::symbol::{Pair, SymbolStyle};

/// Control commands sent over the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start streaming the given channel tokens.
    Subscribe,
    /// Stop streaming the given channel tokens.
    Unsubscribe,
    /// Ask the venue for the currently subscribed tokens.
    ListSubscriptions,
}

/// Upstream stream kinds a token can be built for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Last price / ticker stream.
    Price,
    /// Native candle stream.
    Candle(Interval),
    /// Raw trade stream.
    Trades,
}

/// Whether the venue pushes candles itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CandleSupport {
    /// Candle channel exists upstream.
    #[default]
    Native,
    /// Candles must be built from the trade stream.
    Synthesized,
}

/// Error payload returned by the venue for a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("venue error ({code}): {message}")]
pub struct VenueError {
    /// Venue error code.
    pub code: i64,
    /// Venue error message.
    pub message: String,
}

/// Candle fields as pushed by a venue, before symbol resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCandle {
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Quote volume.
    pub volume: Decimal,
    /// Window open time.
    pub timestamp: TimestampMs,
    /// Interval.
    pub interval: Interval,
    /// Closed flag, if the venue sends one.
    pub is_closed: Option<bool>,
    /// Exclusive close time, if the venue sends one.
    pub close_at: Option<TimestampMs>,
}

impl RawCandle {
    /// Attach the resolved canonical symbol.
    #[must_use]
    pub fn into_event(self, symbol: Pair) -> CandleEvent {
        CandleEvent {
            symbol,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            timestamp: self.timestamp,
            interval: self.interval,
            is_closed: self.is_closed,
            close_at: self.close_at,
        }
    }
}

/// Push payloads keyed by the venue's native symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Push {
    /// Price update.
    Price {
        /// Native symbol.
        symbol: String,
        /// Last price.
        price: Decimal,
        /// Event time.
        timestamp: TimestampMs,
    },
    /// Candle update.
    Candle {
        /// Native symbol.
        symbol: String,
        /// Candle fields.
        candle: RawCandle,
    },
    /// Raw trades.
    Trades {
        /// Native symbol.
        symbol: String,
        /// Trades in frame order.
        trades: Vec<Trade>,
    },
}

/// Classification of one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Response to a correlated request.
    Response {
        /// Correlation id.
        id: u64,
        /// Result payload or venue error.
        outcome: Result<serde_json::Value, VenueError>,
    },
    /// Unsolicited market data.
    Push(Push),
    /// Venue error not tied to a request.
    Error(VenueError),
    /// Frame the engine has no use for (server pongs, heartbeats, ...).
    Ignored,
}

/// A decoded frame with its raw JSON kept for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// Raw decoded payload.
    pub raw: serde_json::Value,
    /// Classification.
    pub inbound: Inbound,
}

/// Dialect encode/decode failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unexpected frame type for this venue.
    #[error("unsupported frame: {0}")]
    UnsupportedFrame(String),

    /// Payload is JSON but not in a shape the venue uses.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// Venue-specific stream wire format.
pub trait VenueDialect: Send + Sync {
    /// Venue identifier, also the symbol cache namespace key.
    fn venue_id(&self) -> &str;

    /// How the venue spells pairs in REST metadata and push frames.
    fn symbol_style(&self) -> SymbolStyle;

    /// Symbol as it appears inside channel tokens.
    fn token_symbol(&self, pair: &Pair) -> String {
        self.symbol_style().format(pair)
    }

    /// Channel token for a stream of `token_symbol`.
    fn channel_token(&self, token_symbol: &str, kind: &StreamKind) -> String;

    /// Whether a subscribed token streams `token_symbol`.
    fn token_matches(&self, token: &str, token_symbol: &str) -> bool {
        token.contains(token_symbol)
    }

    /// Encode a correlated control request.
    fn encode_request(
        &self,
        id: u64,
        command: Command,
        tokens: &[String],
    ) -> Result<Frame, CodecError>;

    /// Decode and classify an inbound frame.
    fn decode(&self, frame: &Frame) -> Result<Decoded, CodecError>;

    /// Parse the result of a `ListSubscriptions` request into tokens.
    fn parse_subscription_list(&self, result: &serde_json::Value)
    -> Result<Vec<String>, CodecError>;

    /// Keep-alive frame sent while the connection is open.
    fn ping_frame(&self) -> Frame {
        Frame::Ping
    }

    /// Tokens for a single request removing every channel of a symbol, if the
    /// venue supports it.
    fn bulk_unsubscribe(&self, _token_symbol: &str) -> Option<Vec<String>> {
        None
    }

    /// Native candle availability.
    fn candle_support(&self) -> CandleSupport {
        CandleSupport::Native
    }
}
