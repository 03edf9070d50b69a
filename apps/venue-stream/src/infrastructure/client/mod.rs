//! Venue Client
//!
//! Facade over one venue connection. Price subscriptions and native candles go
//! straight to the multiplexer; when the dialect has no candle push, candle
//! subscriptions are served by a [`CandleSynthesizer`] instead.
//!
//! ```text
//! VenueClient
//!   ├── SubscriptionMultiplexer ── StreamConnection ── Transport
//!   └── CandleSynthesizer (optional) ── HistorySource
//! ```

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::application::ports::{
    CandleSupport, FetchError, HistorySource, MetadataSource, Transport, VenueDialect,
};
use crate::application::services::{CacheError, SymbolNamespace, SymbolRegistry, SymbolResolver};
use crate::domain::streaming::StreamEvent;
use crate::domain::subscription::{Channel, Subscription};
use crate::domain::symbol::Pair;
use crate::infrastructure::candles::{CandleSynthesizer, SynthesizerError};
use crate::infrastructure::config::{StreamConfig, StreamSettings};
use crate::infrastructure::http::RestClient;
use crate::infrastructure::metrics;
use crate::infrastructure::stream::{
    ConnectionError, HeartbeatConfig, MultiplexerConfig, ReconnectConfig, ReconnectPolicy,
    RequestError, StreamConnection, SubscriptionMultiplexer,
};
use crate::infrastructure::transport::WebSocketTransport;
use crate::infrastructure::venues::binance::{BinanceDialect, BinanceRest};

// =============================================================================
// Errors
// =============================================================================

/// Facade failures.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Every open attempt failed.
    #[error("failed to open stream after {attempts} attempts: {source}")]
    OpenFailed {
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        #[source]
        source: ConnectionError,
    },

    /// Connection state error.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// A correlated request failed.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Candle synthesis failed.
    #[error(transparent)]
    Synthesizer(#[from] SynthesizerError),

    /// Symbol metadata could not be loaded.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// REST client setup failed.
    #[error(transparent)]
    Http(#[from] FetchError),
}

/// What to remove in [`VenueClient::unsubscribe_from`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsubscribeTarget {
    /// One logical subscription.
    Subscription(Subscription),
    /// Every channel streaming a symbol.
    Symbol(Pair),
}

impl From<Subscription> for UnsubscribeTarget {
    fn from(subscription: Subscription) -> Self {
        Self::Subscription(subscription)
    }
}

impl From<Pair> for UnsubscribeTarget {
    fn from(symbol: Pair) -> Self {
        Self::Symbol(symbol)
    }
}

// =============================================================================
// Client
// =============================================================================

/// Uniform market-data client for one venue.
#[derive(Debug)]
pub struct VenueClient {
    mux: Arc<SubscriptionMultiplexer>,
    symbols: Arc<SymbolNamespace>,
    synthesizer: Option<CandleSynthesizer>,
    reconnect: ReconnectConfig,
}

impl VenueClient {
    /// Assemble a client from its ports.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        dialect: Arc<dyn VenueDialect>,
        symbols: Arc<SymbolNamespace>,
        history: Arc<dyn HistorySource>,
        settings: &StreamSettings,
    ) -> Self {
        let connection = StreamConnection::new(
            transport,
            HeartbeatConfig::from_settings(settings),
            dialect.ping_frame(),
        );
        let resolver = SymbolResolver::new(Arc::clone(&symbols), dialect.symbol_style());
        let synthesized = dialect.candle_support() == CandleSupport::Synthesized;
        let mux = SubscriptionMultiplexer::new(
            connection,
            dialect,
            resolver,
            MultiplexerConfig::from_settings(settings),
        );
        let synthesizer =
            synthesized.then(|| CandleSynthesizer::new(Arc::clone(&mux), history));

        Self {
            mux,
            symbols,
            synthesizer,
            reconnect: ReconnectConfig::from_settings(settings),
        }
    }

    /// Build a client for a Binance-style venue from configuration.
    ///
    /// Clients for the same venue id share the registry's symbol namespace.
    pub fn binance(config: &StreamConfig, registry: &SymbolRegistry) -> Result<Self, ClientError> {
        let rest = Arc::new(BinanceRest::new(RestClient::new(
            config.venue.rest_url.as_str(),
            config.http_timeout,
        )?));
        let candles = if config.venue.native_candles {
            CandleSupport::Native
        } else {
            CandleSupport::Synthesized
        };
        let dialect = Arc::new(BinanceDialect::new(config.venue.id.as_str(), candles));
        let metadata: Arc<dyn MetadataSource> = rest.clone();
        let symbols = registry.namespace(&config.venue.id, metadata);

        Ok(Self::new(
            Arc::new(WebSocketTransport::new(config.venue.ws_url.as_str())),
            dialect,
            symbols,
            rest,
            &config.stream,
        ))
    }

    /// Venue identifier.
    #[must_use]
    pub fn venue_id(&self) -> &str {
        self.mux.dialect().venue_id()
    }

    /// Subscribe to canonical events: prices, candles, payloads and errors.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.mux.events()
    }

    /// Whether the connection is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.mux.connection().is_open()
    }

    /// Underlying multiplexer.
    #[must_use]
    pub const fn multiplexer(&self) -> &Arc<SubscriptionMultiplexer> {
        &self.mux
    }

    /// Candle synthesizer, present when the venue has no native candles.
    #[must_use]
    pub const fn synthesizer(&self) -> Option<&CandleSynthesizer> {
        self.synthesizer.as_ref()
    }

    /// Load symbol metadata and open the stream, retrying the handshake with
    /// exponential backoff.
    ///
    /// A metadata failure is logged and does not prevent opening; inbound
    /// symbols then resolve through the fallback heuristic until a refresh
    /// succeeds.
    pub async fn open(&self) -> Result<(), ClientError> {
        if let Err(e) = self.symbols.ensure_fresh().await {
            tracing::warn!(venue = self.venue_id(), error = %e, "Symbol metadata unavailable");
        }

        let mut policy = ReconnectPolicy::new(self.reconnect.clone());
        loop {
            match self.mux.open().await {
                Ok(()) => {
                    tracing::info!(
                        venue = self.venue_id(),
                        attempts = policy.failures() + 1,
                        "Venue stream open"
                    );
                    return Ok(());
                }
                Err(e @ ConnectionError::AlreadyOpen { .. }) => return Err(e.into()),
                Err(e) => {
                    let Some(delay) = policy.next_delay() else {
                        tracing::error!(venue = self.venue_id(), error = %e, "Giving up on open");
                        return Err(ClientError::OpenFailed {
                            attempts: policy.failures(),
                            source: e,
                        });
                    };
                    metrics::record_open_retry(self.venue_id());
                    tracing::warn!(
                        venue = self.venue_id(),
                        error = %e,
                        attempt = policy.failures(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Open failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Force a symbol metadata refresh, shared with other clients of the venue.
    pub async fn refresh_symbols(&self) -> Result<(), ClientError> {
        let snapshot = self.symbols.refresh().await?;
        tracing::debug!(
            venue = self.venue_id(),
            pairs = snapshot.pairs().len(),
            "Symbol metadata refreshed"
        );
        Ok(())
    }

    /// Close the stream and drop synthesized registrations.
    pub async fn close(&self) {
        if let Some(synthesizer) = &self.synthesizer {
            synthesizer.clear();
        }
        self.mux.close().await;
        tracing::info!(venue = self.venue_id(), "Venue stream closed");
    }

    /// Start streaming a subscription.
    pub async fn subscribe_to(&self, subscription: &Subscription) -> Result<(), ClientError> {
        match self.synthesizer_for(subscription) {
            Some(synthesizer) => synthesizer.register(subscription).await?,
            None => {
                self.mux.subscribe(subscription).await?;
            }
        }
        Ok(())
    }

    /// Stop streaming a subscription or every channel of a symbol.
    ///
    /// For a symbol target returns the venue channel tokens that were
    /// removed; a single subscription returns an empty list.
    pub async fn unsubscribe_from(
        &self,
        target: impl Into<UnsubscribeTarget>,
    ) -> Result<Vec<String>, ClientError> {
        match target.into() {
            UnsubscribeTarget::Subscription(subscription) => {
                match self.synthesizer_for(&subscription) {
                    Some(synthesizer) => synthesizer.unregister(&subscription).await?,
                    None => {
                        self.mux.unsubscribe(&subscription).await?;
                    }
                }
                Ok(Vec::new())
            }
            UnsubscribeTarget::Symbol(symbol) => {
                let removed = self.mux.unsubscribe_all_by_symbol(&symbol).await?;
                // Registrations stay while the venue may still be streaming.
                if let Some(synthesizer) = &self.synthesizer {
                    synthesizer.forget_symbol(&symbol);
                }
                Ok(removed)
            }
        }
    }

    fn synthesizer_for(&self, subscription: &Subscription) -> Option<&CandleSynthesizer> {
        match subscription.channel() {
            Channel::Candle => self.synthesizer.as_ref(),
            Channel::Price => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rust_decimal::Decimal;
    use serde_json::{Value, json};

    use super::*;
    use crate::application::ports::{MarketListing, MockHistorySource, MockMetadataSource};
    use crate::domain::streaming::CandleEvent;
    use crate::infrastructure::transport::{MemoryTransport, VenueHandle};

    fn metadata() -> Arc<dyn MetadataSource> {
        let mut source = MockMetadataSource::new();
        source.expect_fetch_markets().returning(|| {
            Ok(MarketListing::from_rows([("BTCUSDT", "BTC", "USDT")]))
        });
        Arc::new(source)
    }

    fn history() -> Arc<dyn HistorySource> {
        let mut history = MockHistorySource::new();
        history.expect_latest_candle().returning(|symbol, interval| {
            Ok(CandleEvent {
                symbol: symbol.clone(),
                open: Decimal::ONE,
                high: Decimal::ONE,
                low: Decimal::ONE,
                close: Decimal::ONE,
                volume: Decimal::ONE,
                timestamp: 60_000,
                interval: interval.clone(),
                is_closed: Some(true),
                close_at: Some(120_000),
            })
        });
        history.expect_trades_since().returning(|_, _| Ok(Vec::new()));
        Arc::new(history)
    }

    fn client(candles: CandleSupport, settings: &StreamSettings) -> (VenueClient, VenueHandle) {
        let (transport, venue) = MemoryTransport::pair();
        let symbols = Arc::new(SymbolNamespace::new(
            "binance",
            metadata(),
            Duration::from_secs(3600),
        ));
        let client = VenueClient::new(
            Arc::new(transport),
            Arc::new(BinanceDialect::new("binance", candles)),
            symbols,
            history(),
            settings,
        );
        (client, venue)
    }

    /// Acknowledge the next request and return it.
    async fn ack(venue: &mut VenueHandle) -> Value {
        let request = venue.recv_json().await.unwrap();
        let id = request["id"].clone();
        assert!(venue.push_json(&json!({"result": null, "id": id})).await);
        request
    }

    #[tokio::test(start_paused = true)]
    async fn open_retries_refused_handshakes() {
        let (client, venue) = client(CandleSupport::Native, &StreamSettings::default());
        venue.refuse_opens(2);

        client.open().await.unwrap();
        assert!(client.is_open());
        assert_eq!(venue.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn open_gives_up_after_max_attempts() {
        let settings = StreamSettings {
            open_max_attempts: 3,
            ..StreamSettings::default()
        };
        let (client, venue) = client(CandleSupport::Native, &settings);
        venue.refuse_opens(10);

        let err = client.open().await.unwrap_err();
        assert!(matches!(err, ClientError::OpenFailed { attempts: 3, .. }));
        assert!(!client.is_open());
    }

    #[tokio::test]
    async fn native_candles_use_kline_stream() {
        let (client, mut venue) = client(CandleSupport::Native, &StreamSettings::default());
        client.open().await.unwrap();

        let subscription: Subscription = "candle:BTC/USDT:1m".parse().unwrap();
        let (result, request) = tokio::join!(client.subscribe_to(&subscription), ack(&mut venue));
        result.unwrap();
        assert_eq!(request["params"], json!(["btcusdt@kline_1m"]));
        assert!(client.synthesizer().is_none());
    }

    #[tokio::test]
    async fn synthesized_candles_subscribe_raw_trades() {
        let (client, mut venue) = client(CandleSupport::Synthesized, &StreamSettings::default());
        client.open().await.unwrap();

        let subscription: Subscription = "candle:BTC/USDT:1m".parse().unwrap();
        let (result, request) = tokio::join!(client.subscribe_to(&subscription), ack(&mut venue));
        result.unwrap();
        assert_eq!(request["params"], json!(["btcusdt@trade"]));

        let synthesizer = client.synthesizer().unwrap();
        assert!(synthesizer.is_registered(subscription.symbol(), subscription.interval().unwrap()));

        let (result, request) =
            tokio::join!(client.unsubscribe_from(subscription.clone()), ack(&mut venue));
        result.unwrap();
        assert_eq!(request["method"], "UNSUBSCRIBE");
        assert_eq!(request["params"], json!(["btcusdt@trade"]));
    }

    #[tokio::test]
    async fn price_subscriptions_bypass_synthesizer() {
        let (client, mut venue) = client(CandleSupport::Synthesized, &StreamSettings::default());
        client.open().await.unwrap();

        let subscription = Subscription::price(Pair::new("BTC", "USDT"));
        let (result, request) = tokio::join!(client.subscribe_to(&subscription), ack(&mut venue));
        result.unwrap();
        assert_eq!(request["params"], json!(["btcusdt@miniTicker"]));
    }

    #[tokio::test]
    async fn unsubscribe_symbol_lists_then_removes_matches() {
        let (client, mut venue) = client(CandleSupport::Native, &StreamSettings::default());
        client.open().await.unwrap();

        let venue_side = async {
            let list = venue.recv_json().await.unwrap();
            assert_eq!(list["method"], "LIST_SUBSCRIPTIONS");
            venue
                .push_json(&json!({
                    "result": ["btcusdt@miniTicker", "ethusdt@trade", "btcusdt@kline_1m"],
                    "id": list["id"]
                }))
                .await;
            let first = ack(&mut venue).await;
            let second = ack(&mut venue).await;
            (first["params"].clone(), second["params"].clone())
        };

        let (removed, (first, second)) =
            tokio::join!(client.unsubscribe_from(Pair::new("BTC", "USDT")), venue_side);
        assert_eq!(removed.unwrap(), vec!["btcusdt@miniTicker", "btcusdt@kline_1m"]);
        assert_eq!(first, json!(["btcusdt@miniTicker"]));
        assert_eq!(second, json!(["btcusdt@kline_1m"]));
    }

    #[tokio::test]
    async fn failed_symbol_removal_keeps_synthesized_candles() {
        let (client, mut venue) = client(CandleSupport::Synthesized, &StreamSettings::default());
        client.open().await.unwrap();

        let subscription: Subscription = "candle:BTC/USDT:1m".parse().unwrap();
        let (result, _) = tokio::join!(client.subscribe_to(&subscription), ack(&mut venue));
        result.unwrap();

        let venue_side = async {
            let list = venue.recv_json().await.unwrap();
            venue
                .push_json(&json!({"error": {"code": 3, "msg": "busy"}, "id": list["id"]}))
                .await;
        };
        let (result, ()) =
            tokio::join!(client.unsubscribe_from(Pair::new("BTC", "USDT")), venue_side);
        assert!(matches!(result, Err(ClientError::Request(_))));

        let synthesizer = client.synthesizer().unwrap();
        assert!(synthesizer.is_registered(subscription.symbol(), subscription.interval().unwrap()));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (client, _venue) = client(CandleSupport::Synthesized, &StreamSettings::default());
        client.open().await.unwrap();
        client.close().await;
        client.close().await;
        assert!(!client.is_open());
    }
}
