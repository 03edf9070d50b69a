//! Shared fixtures for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::time::timeout;

use venue_stream::application::ports::{
    FetchError, Frame, MarketListing, MetadataSource, Transport, VenueDialect,
};
use venue_stream::infrastructure::stream::{
    HeartbeatConfig, MultiplexerConfig, StreamConnection, SubscriptionMultiplexer,
};
use venue_stream::infrastructure::transport::{MemoryTransport, VenueHandle};
use venue_stream::infrastructure::venues::binance::BinanceDialect;
use venue_stream::{StreamEvent, StreamFault, SymbolNamespace, SymbolResolver};

/// Upper bound on any single wait in a test.
pub const WAIT: Duration = Duration::from_secs(5);

/// Metadata source with a fixed listing.
pub struct StaticMarkets(pub Vec<(&'static str, &'static str, &'static str)>);

impl StaticMarkets {
    pub fn spot() -> Self {
        Self(vec![
            ("BTCUSDT", "BTC", "USDT"),
            ("ETHUSDT", "ETH", "USDT"),
            ("WBTCUSDT", "WBTC", "USDT"),
            ("ETHBTC", "ETH", "BTC"),
        ])
    }
}

#[async_trait]
impl MetadataSource for StaticMarkets {
    async fn fetch_markets(&self) -> Result<MarketListing, FetchError> {
        Ok(MarketListing::from_rows(self.0.iter().copied()))
    }
}

/// A populated symbol namespace for the Binance listing above.
pub async fn symbols() -> Arc<SymbolNamespace> {
    let symbols = Arc::new(SymbolNamespace::new(
        "binance",
        Arc::new(StaticMarkets::spot()),
        Duration::from_secs(3600),
    ));
    symbols.refresh().await.unwrap();
    symbols
}

/// Multiplexer over any transport, opened.
pub async fn open_multiplexer(
    transport: Arc<dyn Transport>,
    config: MultiplexerConfig,
) -> Arc<SubscriptionMultiplexer> {
    let dialect = Arc::new(BinanceDialect::default());
    let connection = StreamConnection::new(transport, HeartbeatConfig::default(), Frame::Ping);
    let resolver = SymbolResolver::new(symbols().await, dialect.symbol_style());
    let mux = SubscriptionMultiplexer::new(connection, dialect, resolver, config);
    mux.open().await.unwrap();
    mux
}

/// Opened multiplexer over an in-process transport.
pub async fn memory_multiplexer(
    config: MultiplexerConfig,
) -> (Arc<SubscriptionMultiplexer>, VenueHandle) {
    let (transport, venue) = MemoryTransport::pair();
    (open_multiplexer(Arc::new(transport), config).await, venue)
}

/// Next request the client sent.
pub async fn next_request(venue: &mut VenueHandle) -> Value {
    timeout(WAIT, venue.recv_json()).await.unwrap().unwrap()
}

/// Reply to `request` with `result`.
pub async fn reply(venue: &VenueHandle, request: &Value, result: Value) {
    assert!(
        venue
            .push_json(&json!({"result": result, "id": request["id"]}))
            .await
    );
}

/// Read the next request and acknowledge it.
pub async fn ack(venue: &mut VenueHandle) -> Value {
    let request = next_request(venue).await;
    reply(venue, &request, Value::Null).await;
    request
}

/// Next event that is not a diagnostic payload.
pub async fn next_event(events: &mut broadcast::Receiver<StreamEvent>) -> StreamEvent {
    loop {
        match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
            StreamEvent::Payload(_) => {}
            event => return event,
        }
    }
}

/// Next `error` event.
pub async fn next_fault(events: &mut broadcast::Receiver<StreamEvent>) -> StreamFault {
    loop {
        if let StreamEvent::Error(fault) = next_event(events).await {
            return fault;
        }
    }
}
