//! Binance REST Adapters
//!
//! [`MetadataSource`] from `exchangeInfo` and [`HistorySource`] from `klines`
//! and `aggTrades`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

use super::messages::{AggTrade, ExchangeInfo};
use crate::application::ports::{FetchError, HistorySource, MarketListing, MetadataSource};
use crate::domain::streaming::{CandleEvent, Interval, TimestampMs, Trade};
use crate::domain::symbol::{Pair, SymbolStyle};
use crate::infrastructure::http::RestClient;

const EXCHANGE_INFO: &str = "/api/v3/exchangeInfo";
const KLINES: &str = "/api/v3/klines";
const AGG_TRADES: &str = "/api/v3/aggTrades";

/// Upper bound on trades per history request.
const TRADE_PAGE: usize = 1000;

/// Pages fetched at most when seeding trade history.
const MAX_TRADE_PAGES: usize = 100;

/// Binance public REST endpoints.
#[derive(Debug, Clone)]
pub struct BinanceRest {
    client: RestClient,
    style: SymbolStyle,
}

impl BinanceRest {
    /// Wrap a client rooted at the REST base URL.
    #[must_use]
    pub fn new(client: RestClient) -> Self {
        Self {
            client,
            style: SymbolStyle::concatenated_upper(),
        }
    }
}

#[async_trait]
impl MetadataSource for BinanceRest {
    async fn fetch_markets(&self) -> Result<MarketListing, FetchError> {
        let info: ExchangeInfo = self.client.get_json(EXCHANGE_INFO, &[]).await?;
        Ok(MarketListing::from_rows(
            info.symbols
                .into_iter()
                .map(|s| (s.symbol, s.base_asset, s.quote_asset)),
        ))
    }
}

#[async_trait]
impl HistorySource for BinanceRest {
    async fn latest_candle(
        &self,
        symbol: &Pair,
        interval: &Interval,
    ) -> Result<CandleEvent, FetchError> {
        let query = [
            ("symbol", self.style.format(symbol)),
            ("interval", interval.to_string()),
            ("limit", "2".to_string()),
        ];
        let rows: Vec<Vec<Value>> = self.client.get_json(KLINES, &query).await?;

        // The last row is the window still in progress; the one before it is
        // the most recent closed window.
        let row = match rows.as_slice() {
            [.., closed, _open] => closed,
            [only] => only,
            [] => return Err(FetchError::Decode(format!("no klines for {symbol}"))),
        };
        parse_kline(symbol, interval, row)
    }

    /// Pages forward by aggregate trade id until a short page.
    async fn trades_since(
        &self,
        symbol: &Pair,
        since: TimestampMs,
    ) -> Result<Vec<Trade>, FetchError> {
        let native = self.style.format(symbol);
        let mut cursor = ("startTime", since.to_string());
        let mut trades = Vec::new();

        for page in 1..=MAX_TRADE_PAGES {
            let query = [
                ("symbol", native.clone()),
                (cursor.0, cursor.1.clone()),
                ("limit", TRADE_PAGE.to_string()),
            ];
            let rows: Vec<AggTrade> = self.client.get_json(AGG_TRADES, &query).await?;
            let short = rows.len() < TRADE_PAGE;
            let next_id = rows.last().map(|row| row.id + 1);
            trades.extend(
                rows.into_iter()
                    .map(|t| Trade::new(t.price, t.quantity, t.trade_time)),
            );

            match next_id {
                Some(next_id) if !short => cursor = ("fromId", next_id.to_string()),
                _ => {
                    tracing::debug!(%symbol, pages = page, trades = trades.len(), "Fetched trade history");
                    return Ok(trades);
                }
            }
        }

        tracing::warn!(
            %symbol,
            pages = MAX_TRADE_PAGES,
            trades = trades.len(),
            "Trade history truncated at page limit"
        );
        Ok(trades)
    }
}

/// Parse one kline row: `[openTime, o, h, l, c, volume, closeTime, quoteVolume, ...]`.
fn parse_kline(symbol: &Pair, interval: &Interval, row: &[Value]) -> Result<CandleEvent, FetchError> {
    let int = |index: usize| {
        row.get(index)
            .and_then(Value::as_i64)
            .ok_or_else(|| FetchError::Decode(format!("kline field {index} is not an integer")))
    };
    let decimal = |index: usize| {
        row.get(index)
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<Decimal>().ok())
            .ok_or_else(|| FetchError::Decode(format!("kline field {index} is not a decimal")))
    };

    Ok(CandleEvent {
        symbol: symbol.clone(),
        open: decimal(1)?,
        high: decimal(2)?,
        low: decimal(3)?,
        close: decimal(4)?,
        volume: decimal(7)?,
        timestamp: int(0)?,
        interval: interval.clone(),
        is_closed: Some(true),
        close_at: Some(int(6)? + 1),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn rest(server: &MockServer) -> BinanceRest {
        BinanceRest::new(RestClient::new(server.uri(), Duration::from_secs(5)).unwrap())
    }

    #[tokio::test]
    async fn exchange_info_becomes_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(EXCHANGE_INFO))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "timezone": "UTC",
                "symbols": [
                    {"symbol": "BTCUSDT", "baseAsset": "BTC", "quoteAsset": "USDT", "status": "TRADING"},
                    {"symbol": "ETHBTC", "baseAsset": "ETH", "quoteAsset": "BTC", "status": "TRADING"}
                ]
            })))
            .mount(&server)
            .await;

        let listing = rest(&server).await.fetch_markets().await.unwrap();
        assert!(listing.pairs.contains("ETHBTC"));
        assert_eq!(listing.tickers.len(), 3);
    }

    #[tokio::test]
    async fn latest_candle_picks_last_closed_row() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(KLINES))
            .and(query_param("symbol", "BTCUSDT"))
            .and(query_param("interval", "1m"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                [60000, "1", "3", "0.5", "2", "10", 119_999, "20", 5, "1", "2", "0"],
                [120_000, "2", "2", "2", "2", "1", 179_999, "2", 1, "1", "2", "0"]
            ])))
            .mount(&server)
            .await;

        let candle = rest(&server)
            .await
            .latest_candle(&Pair::new("BTC", "USDT"), &"1m".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(candle.timestamp, 60_000);
        assert_eq!(candle.close_at, Some(120_000));
        assert_eq!(candle.high, Decimal::from(3));
        assert_eq!(candle.volume, Decimal::from(20));
    }

    #[tokio::test]
    async fn empty_klines_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(KLINES))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let err = rest(&server)
            .await
            .latest_candle(&Pair::new("BTC", "USDT"), &"1m".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    fn agg_trades(ids: std::ops::RangeInclusive<u64>) -> Value {
        ids.map(|id| {
            json!({"a": id, "p": "10", "q": "1", "f": id, "l": id, "T": 60_000 + i64::try_from(id).unwrap(), "m": false})
        })
        .collect()
    }

    #[tokio::test]
    async fn trades_since_pages_by_trade_id() {
        let server = MockServer::start().await;
        let full_page = u64::try_from(TRADE_PAGE).unwrap();
        Mock::given(method("GET"))
            .and(path(AGG_TRADES))
            .and(query_param("startTime", "60000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(agg_trades(1..=full_page)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(AGG_TRADES))
            .and(query_param("fromId", (full_page + 1).to_string()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(agg_trades(full_page + 1..=full_page + 2)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let trades = rest(&server)
            .await
            .trades_since(&Pair::new("BTC", "USDT"), 60_000)
            .await
            .unwrap();
        assert_eq!(trades.len(), TRADE_PAGE + 2);
        assert_eq!(trades.first().unwrap().timestamp, 60_001);
        assert_eq!(trades.last().unwrap().timestamp, 61_002);
    }

    #[tokio::test]
    async fn trades_since_uses_start_time() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(AGG_TRADES))
            .and(query_param("startTime", "60000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"a": 1, "p": "10", "q": "0.5", "f": 1, "l": 1, "T": 60500, "m": false},
                {"a": 2, "p": "11", "q": "1", "f": 2, "l": 2, "T": 61000, "m": true}
            ])))
            .mount(&server)
            .await;

        let trades = rest(&server)
            .await
            .trades_since(&Pair::new("BTC", "USDT"), 60_000)
            .await
            .unwrap();
        assert_eq!(
            trades,
            vec![
                Trade::new(Decimal::from(10), Decimal::new(5, 1), 60_500),
                Trade::new(Decimal::from(11), Decimal::ONE, 61_000),
            ]
        );
    }
}
