//! Binance Stream Dialect
//!
//! Channel tokens are `<symbol>@miniTicker`, `<symbol>@kline_<interval>` and
//! `<symbol>@trade` with a lower-case symbol. Push payloads carry the
//! upper-case native symbol. Keep-alive uses WebSocket ping frames.

use serde_json::Value;

use super::messages::{ControlRequest, ErrorBody, KlineMessage, MiniTickerMessage, TradeMessage};
use crate::application::ports::{
    CandleSupport, CodecError, Command, Decoded, Frame, Inbound, Push, RawCandle, StreamKind,
    VenueDialect, VenueError,
};
use crate::domain::streaming::{Interval, Trade};
use crate::domain::symbol::{Pair, SymbolStyle};

/// Default venue id.
pub const VENUE_ID: &str = "binance";

/// Binance-style JSON stream protocol.
#[derive(Debug, Clone)]
pub struct BinanceDialect {
    venue_id: String,
    candles: CandleSupport,
}

impl Default for BinanceDialect {
    fn default() -> Self {
        Self::new(VENUE_ID, CandleSupport::Native)
    }
}

impl BinanceDialect {
    /// Create a dialect. With [`CandleSupport::Synthesized`] candle
    /// subscriptions are served from the trade stream instead of `@kline`.
    #[must_use]
    pub fn new(venue_id: impl Into<String>, candles: CandleSupport) -> Self {
        Self {
            venue_id: venue_id.into(),
            candles,
        }
    }

    fn classify(raw: &Value) -> Result<Inbound, CodecError> {
        let Some(object) = raw.as_object() else {
            return Ok(Inbound::Ignored);
        };

        if let (Some(_), Some(data)) = (object.get("stream"), object.get("data")) {
            return Self::classify(data);
        }

        let id = object.get("id").and_then(Value::as_u64);

        if let Some(error) = object.get("error") {
            let body: ErrorBody = serde_json::from_value(error.clone())?;
            let error = VenueError {
                code: body.code,
                message: body.msg,
            };
            return Ok(match id {
                Some(id) => Inbound::Response {
                    id,
                    outcome: Err(error),
                },
                None => Inbound::Error(error),
            });
        }

        if let Some(id) = id {
            let result = object.get("result").cloned().unwrap_or(Value::Null);
            return Ok(Inbound::Response {
                id,
                outcome: Ok(result),
            });
        }

        let push = match object.get("e").and_then(Value::as_str) {
            Some("trade" | "aggTrade") => {
                let trade: TradeMessage = serde_json::from_value(raw.clone())?;
                Push::Trades {
                    symbol: trade.symbol,
                    trades: vec![Trade::new(trade.price, trade.quantity, trade.trade_time)],
                }
            }
            Some("kline") => {
                let KlineMessage { symbol, kline } = serde_json::from_value(raw.clone())?;
                let interval: Interval = kline
                    .interval
                    .parse()
                    .map_err(|e: crate::domain::streaming::IntervalParseError| {
                        CodecError::InvalidFormat(e.to_string())
                    })?;
                Push::Candle {
                    symbol,
                    candle: RawCandle {
                        open: kline.open,
                        high: kline.high,
                        low: kline.low,
                        close: kline.close,
                        volume: kline.quote_volume,
                        timestamp: kline.open_time,
                        interval,
                        is_closed: Some(kline.is_closed),
                        // Binance close times are inclusive.
                        close_at: Some(kline.close_time + 1),
                    },
                }
            }
            Some("24hrMiniTicker") => {
                let ticker: MiniTickerMessage = serde_json::from_value(raw.clone())?;
                Push::Price {
                    symbol: ticker.symbol,
                    price: ticker.close,
                    timestamp: ticker.event_time,
                }
            }
            _ => return Ok(Inbound::Ignored),
        };

        Ok(Inbound::Push(push))
    }
}

impl VenueDialect for BinanceDialect {
    fn venue_id(&self) -> &str {
        &self.venue_id
    }

    fn symbol_style(&self) -> SymbolStyle {
        SymbolStyle::concatenated_upper()
    }

    fn token_symbol(&self, pair: &Pair) -> String {
        SymbolStyle::concatenated_lower().format(pair)
    }

    fn channel_token(&self, token_symbol: &str, kind: &StreamKind) -> String {
        match kind {
            StreamKind::Price => format!("{token_symbol}@miniTicker"),
            StreamKind::Candle(interval) => format!("{token_symbol}@kline_{interval}"),
            StreamKind::Trades => format!("{token_symbol}@trade"),
        }
    }

    fn token_matches(&self, token: &str, token_symbol: &str) -> bool {
        token.split('@').next() == Some(token_symbol)
    }

    fn encode_request(
        &self,
        id: u64,
        command: Command,
        tokens: &[String],
    ) -> Result<Frame, CodecError> {
        let method = match command {
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::ListSubscriptions => "LIST_SUBSCRIPTIONS",
        };
        let request = ControlRequest {
            method,
            params: tokens,
            id,
        };
        Ok(Frame::Text(serde_json::to_string(&request)?))
    }

    fn decode(&self, frame: &Frame) -> Result<Decoded, CodecError> {
        let text = match frame {
            Frame::Text(text) => text.as_str(),
            Frame::Binary(bytes) => std::str::from_utf8(bytes)
                .map_err(|e| CodecError::UnsupportedFrame(format!("binary frame: {e}")))?,
            Frame::Ping | Frame::Pong => {
                return Err(CodecError::UnsupportedFrame("control frame".to_string()));
            }
        };

        let raw: Value = serde_json::from_str(text)?;
        let inbound = Self::classify(&raw)?;
        Ok(Decoded { raw, inbound })
    }

    fn parse_subscription_list(&self, result: &Value) -> Result<Vec<String>, CodecError> {
        let items = result
            .as_array()
            .ok_or_else(|| CodecError::InvalidFormat(format!("expected stream list, got {result}")))?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| CodecError::InvalidFormat(format!("stream name {item}")))
            })
            .collect()
    }

    fn candle_support(&self) -> CandleSupport {
        self.candles
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    fn dialect() -> BinanceDialect {
        BinanceDialect::default()
    }

    fn decode(value: &Value) -> Inbound {
        dialect()
            .decode(&Frame::Text(value.to_string()))
            .unwrap()
            .inbound
    }

    #[test_case(StreamKind::Price, "btcusdt@miniTicker" ; "price")]
    #[test_case(StreamKind::Candle("1m".parse().unwrap()), "btcusdt@kline_1m" ; "candle")]
    #[test_case(StreamKind::Candle("1M".parse().unwrap()), "btcusdt@kline_1M" ; "monthly candle")]
    #[test_case(StreamKind::Trades, "btcusdt@trade" ; "trades")]
    fn channel_tokens(kind: StreamKind, expected: &str) {
        let dialect = dialect();
        let symbol = dialect.token_symbol(&Pair::new("BTC", "USDT"));
        assert_eq!(dialect.channel_token(&symbol, &kind), expected);
    }

    #[test_case("btcusdt@trade", "btcusdt", true ; "same symbol")]
    #[test_case("btcusdt@kline_1m", "btcusdt", true ; "candle stream")]
    #[test_case("wbtcusdt@trade", "btcusdt", false ; "longer symbol containing it")]
    #[test_case("btcusdtm@trade", "btcusdt", false ; "symbol prefix")]
    fn token_matching(token: &str, symbol: &str, expected: bool) {
        assert_eq!(dialect().token_matches(token, symbol), expected);
    }

    #[test]
    fn encodes_subscribe() {
        let frame = dialect()
            .encode_request(7, Command::Subscribe, &["btcusdt@trade".to_string()])
            .unwrap();
        let value: Value = serde_json::from_str(frame.as_text().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"method": "SUBSCRIBE", "params": ["btcusdt@trade"], "id": 7})
        );
    }

    #[test]
    fn decodes_success_response() {
        assert_eq!(
            decode(&json!({"result": null, "id": 4})),
            Inbound::Response {
                id: 4,
                outcome: Ok(Value::Null)
            }
        );
    }

    #[test]
    fn decodes_error_response() {
        assert_eq!(
            decode(&json!({"error": {"code": 2, "msg": "Invalid request"}, "id": 5})),
            Inbound::Response {
                id: 5,
                outcome: Err(VenueError {
                    code: 2,
                    message: "Invalid request".to_string()
                })
            }
        );
    }

    #[test]
    fn decodes_error_without_id() {
        assert!(matches!(
            decode(&json!({"error": {"code": -1, "msg": "Too many requests"}})),
            Inbound::Error(VenueError { code: -1, .. })
        ));
    }

    #[test]
    fn decodes_trade_push() {
        let inbound = decode(&json!({
            "e": "trade", "E": 1, "s": "BTCUSDT", "t": 9, "p": "100.5", "q": "0.2", "T": 1500
        }));
        let Inbound::Push(Push::Trades { symbol, trades }) = inbound else {
            panic!("expected trades");
        };
        assert_eq!(symbol, "BTCUSDT");
        assert_eq!(trades, vec![Trade::new(Decimal::new(1005, 1), Decimal::new(2, 1), 1500)]);
    }

    #[test]
    fn decodes_kline_push_with_exclusive_close() {
        let inbound = decode(&json!({
            "e": "kline", "E": 1, "s": "ETHUSDT",
            "k": {"t": 60000, "T": 119_999, "i": "1m", "o": "1", "h": "3", "l": "0.5",
                  "c": "2", "q": "42", "x": true}
        }));
        let Inbound::Push(Push::Candle { symbol, candle }) = inbound else {
            panic!("expected candle");
        };
        assert_eq!(symbol, "ETHUSDT");
        assert_eq!(candle.timestamp, 60_000);
        assert_eq!(candle.close_at, Some(120_000));
        assert_eq!(candle.is_closed, Some(true));
        assert_eq!(candle.volume, Decimal::from(42));
    }

    #[test]
    fn decodes_mini_ticker_and_combined_stream() {
        let inbound = decode(&json!({
            "stream": "btcusdt@miniTicker",
            "data": {"e": "24hrMiniTicker", "E": 77, "s": "BTCUSDT", "c": "65000.1"}
        }));
        assert_eq!(
            inbound,
            Inbound::Push(Push::Price {
                symbol: "BTCUSDT".to_string(),
                price: Decimal::new(650_001, 1),
                timestamp: 77
            })
        );
    }

    #[test]
    fn unknown_events_are_ignored() {
        assert_eq!(decode(&json!({"e": "depthUpdate"})), Inbound::Ignored);
        assert_eq!(decode(&json!([1, 2, 3])), Inbound::Ignored);
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(matches!(
            dialect().decode(&Frame::Text("{not json".into())),
            Err(CodecError::Json(_))
        ));
    }

    #[test]
    fn parses_subscription_list() {
        let tokens = dialect()
            .parse_subscription_list(&json!(["btcusdt@trade", "ethusdt@miniTicker"]))
            .unwrap();
        assert_eq!(tokens, vec!["btcusdt@trade", "ethusdt@miniTicker"]);
        assert!(dialect().parse_subscription_list(&json!(null)).is_err());
    }
}
