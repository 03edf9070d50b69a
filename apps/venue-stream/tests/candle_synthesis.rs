//! Candle Synthesis Integration Tests
//!
//! A venue without a native candle push: candles are built from the seeded
//! REST history plus the raw trade stream and published as `candle` events.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;

use common::{ack, next_event, next_request, symbols};
use venue_stream::application::ports::{CandleSupport, FetchError, HistorySource};
use venue_stream::infrastructure::transport::{MemoryTransport, VenueHandle};
use venue_stream::infrastructure::venues::binance::BinanceDialect;
use venue_stream::{
    CandleEvent, Interval, Pair, StreamEvent, StreamSettings, Subscription, TimestampMs, Trade,
    UnsubscribeTarget, VenueClient,
};

/// History with one closed candle per interval and two seeded trades.
struct FixedHistory;

#[async_trait]
impl HistorySource for FixedHistory {
    async fn latest_candle(
        &self,
        symbol: &Pair,
        interval: &Interval,
    ) -> Result<CandleEvent, FetchError> {
        // Align the window to the interval so 1m and 5m both start cleanly.
        let timestamp = 60_000 / interval.millis() * interval.millis();
        Ok(CandleEvent {
            symbol: symbol.clone(),
            open: Decimal::from(90),
            high: Decimal::from(90),
            low: Decimal::from(90),
            close: Decimal::from(90),
            volume: Decimal::ZERO,
            timestamp,
            interval: interval.clone(),
            is_closed: Some(true),
            close_at: Some(timestamp + interval.millis()),
        })
    }

    async fn trades_since(
        &self,
        _symbol: &Pair,
        since: TimestampMs,
    ) -> Result<Vec<Trade>, FetchError> {
        Ok(vec![
            Trade::new(Decimal::from(100), Decimal::ONE, since.max(61_000)),
            Trade::new(Decimal::from(102), Decimal::ONE, since.max(62_000)),
        ])
    }
}

async fn synthesizing_client() -> (VenueClient, VenueHandle) {
    let (transport, venue) = MemoryTransport::pair();
    let client = VenueClient::new(
        Arc::new(transport),
        Arc::new(BinanceDialect::new("binance", CandleSupport::Synthesized)),
        symbols().await,
        Arc::new(FixedHistory),
        &StreamSettings::default(),
    );
    client.open().await.unwrap();
    (client, venue)
}

fn candle(interval: &str) -> Subscription {
    Subscription::candle(Pair::new("BTC", "USDT"), interval.parse().unwrap())
}

async fn push_trade(venue: &VenueHandle, price: &str, size: &str, time: TimestampMs) {
    assert!(
        venue
            .push_json(&json!({
                "e": "trade", "E": time, "s": "BTCUSDT", "t": 1,
                "p": price, "q": size, "T": time
            }))
            .await
    );
}

async fn next_candle(events: &mut tokio::sync::broadcast::Receiver<StreamEvent>) -> CandleEvent {
    loop {
        if let StreamEvent::Candle(candle) = next_event(events).await {
            return candle;
        }
    }
}

#[tokio::test]
async fn trades_build_in_progress_then_closed_candles() {
    let (client, mut venue) = synthesizing_client().await;
    let mut events = client.events();
    let one_minute = candle("1m");

    let (result, request) = tokio::join!(client.subscribe_to(&one_minute), ack(&mut venue));
    result.unwrap();
    assert_eq!(request["method"], "SUBSCRIBE");
    assert_eq!(request["params"], json!(["btcusdt@trade"]));

    // Seeded trades 100 and 102, then 101 x 2 inside [60s, 120s).
    push_trade(&venue, "101", "2", 63_000).await;
    let in_progress = next_candle(&mut events).await;
    assert_eq!(in_progress.is_closed, Some(false));
    assert_eq!(in_progress.timestamp, 60_000);
    assert_eq!(in_progress.close_at, Some(120_000));
    assert_eq!(in_progress.open, Decimal::from(100));
    assert_eq!(in_progress.high, Decimal::from(102));
    assert_eq!(in_progress.low, Decimal::from(100));
    assert_eq!(in_progress.close, Decimal::from(101));
    assert_eq!(in_progress.volume, Decimal::from(404));

    // A trade exactly at close_at belongs to the next window.
    push_trade(&venue, "105", "1", 120_000).await;
    let closed = next_candle(&mut events).await;
    assert_eq!(closed.is_closed, Some(true));
    assert_eq!(closed.timestamp, 60_000);
    assert_eq!(closed.close, Decimal::from(101));
    assert_eq!(closed.volume, Decimal::from(404));

    let rolled = next_candle(&mut events).await;
    assert_eq!(rolled.is_closed, Some(false));
    assert_eq!(rolled.timestamp, 120_000);
    assert_eq!(rolled.close_at, Some(180_000));
    assert_eq!(rolled.open, Decimal::from(105));
    assert_eq!(rolled.volume, Decimal::from(105));

    let synthesizer = client.synthesizer().unwrap();
    let interval = one_minute.interval().unwrap();
    assert_eq!(
        synthesizer.last_closed(one_minute.symbol(), interval),
        Some(closed)
    );
    assert_eq!(
        synthesizer.in_progress(one_minute.symbol(), interval),
        Some(rolled)
    );
}

#[tokio::test]
async fn intervals_share_one_raw_trade_subscription() {
    let (client, mut venue) = synthesizing_client().await;
    let one_minute = candle("1m");
    let five_minutes = candle("5m");

    let (result, _) = tokio::join!(client.subscribe_to(&one_minute), ack(&mut venue));
    result.unwrap();

    // Second interval for the same symbol sends nothing upstream.
    client.subscribe_to(&five_minutes).await.unwrap();
    assert!(matches!(
        client.subscribe_to(&five_minutes).await,
        Err(venue_stream::ClientError::Synthesizer(_))
    ));

    // Releasing one interval keeps the feed.
    client.unsubscribe_from(one_minute.clone()).await.unwrap();

    // Releasing the last one unsubscribes it.
    let (result, request) = tokio::join!(
        client.unsubscribe_from(UnsubscribeTarget::Subscription(five_minutes)),
        ack(&mut venue)
    );
    result.unwrap();
    assert_eq!(request["method"], "UNSUBSCRIBE");
    assert_eq!(request["params"], json!(["btcusdt@trade"]));
}

#[tokio::test]
async fn unsubscribing_symbol_drops_synthesized_registrations() {
    let (client, mut venue) = synthesizing_client().await;
    let one_minute = candle("1m");

    let (result, _) = tokio::join!(client.subscribe_to(&one_minute), ack(&mut venue));
    result.unwrap();

    let venue_side = async {
        let list = next_request(&mut venue).await;
        common::reply(&venue, &list, json!(["btcusdt@trade"])).await;
        ack(&mut venue).await
    };
    let (removed, request) =
        tokio::join!(client.unsubscribe_from(Pair::new("BTC", "USDT")), venue_side);
    assert_eq!(removed.unwrap(), vec!["btcusdt@trade"]);
    assert_eq!(request["params"], json!(["btcusdt@trade"]));

    let synthesizer = client.synthesizer().unwrap();
    assert!(!synthesizer.is_registered(one_minute.symbol(), one_minute.interval().unwrap()));
}
