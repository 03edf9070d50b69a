//! Subscription Multiplexer
//!
//! Runs many logical subscriptions over one [`StreamConnection`].
//!
//! Control requests carry a correlation id allocated from the
//! [`PendingTable`]; the caller suspends until the dispatch loop matches the
//! response by id (never by send order), the request timeout fires, or the
//! connection closes. Frames without an id are classified by the venue
//! dialect and fanned out as canonical [`StreamEvent`]s.
//!
//! # Failure semantics
//!
//! - A venue error response fails only the request it answers.
//! - A response whose id was never issued is a protocol desync: it is
//!   published as an error event and, if configured, closes the connection.
//! - When the connection closes every waiting request fails with
//!   [`RequestError::ConnectionClosed`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::connection::{ConnectionError, ConnectionState, StreamConnection};
use super::pending::{Completion, PendingTable};
use crate::application::ports::{
    Command, Decoded, Frame, Inbound, Push, StreamKind, TransportEvent, TransportEvents,
    VenueDialect, VenueError,
};
use crate::application::services::SymbolResolver;
use crate::domain::streaming::{PriceEvent, StreamEvent, StreamFault, TradeBatch};
use crate::domain::subscription::{Channel, Subscription};
use crate::domain::symbol::Pair;
use crate::infrastructure::metrics;

// =============================================================================
// Errors & Configuration
// =============================================================================

/// Failure of one correlated request.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The venue rejected the request.
    #[error(transparent)]
    Venue(#[from] VenueError),

    /// The connection closed before a response arrived.
    #[error("connection closed while request was pending")]
    ConnectionClosed,

    /// No response within the request timeout.
    #[error("no response to request {id} within {timeout:?}")]
    Timeout {
        /// Correlation id.
        id: u64,
        /// Configured timeout.
        timeout: Duration,
    },

    /// The request could not be sent.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The request could not be encoded.
    #[error("failed to encode request: {0}")]
    Encode(String),

    /// The response could not be interpreted.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Fatal inbound conditions raised by the dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MultiplexerError {
    /// A response carried an id with no pending request.
    #[error("protocol desync: no pending request with id {id}")]
    ProtocolDesync {
        /// The unmatched id.
        id: u64,
    },
}

/// Multiplexer tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiplexerConfig {
    /// Upper bound on waiting for a correlated response.
    pub request_timeout: Duration,
    /// Close the connection on a protocol desync.
    pub close_on_desync: bool,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            close_on_desync: false,
            event_capacity: 4096,
        }
    }
}

impl MultiplexerConfig {
    /// Build from stream settings.
    #[must_use]
    pub fn from_settings(settings: &crate::StreamSettings) -> Self {
        Self {
            request_timeout: settings.request_timeout,
            close_on_desync: settings.close_on_desync,
            event_capacity: settings.event_capacity.max(1),
        }
    }
}

// =============================================================================
// Multiplexer
// =============================================================================

/// Logical subscriptions over one connection.
pub struct SubscriptionMultiplexer {
    connection: StreamConnection,
    dialect: Arc<dyn VenueDialect>,
    resolver: SymbolResolver,
    pending: PendingTable,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<StreamEvent>,
    trades: broadcast::Sender<TradeBatch>,
    config: MultiplexerConfig,
}

impl std::fmt::Debug for SubscriptionMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionMultiplexer")
            .field("venue", &self.dialect.venue_id())
            .field("connection", &self.connection)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl SubscriptionMultiplexer {
    /// Create a multiplexer over `connection`.
    #[must_use]
    pub fn new(
        connection: StreamConnection,
        dialect: Arc<dyn VenueDialect>,
        resolver: SymbolResolver,
        config: MultiplexerConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity);
        let (trades, _) = broadcast::channel(config.event_capacity);
        Arc::new(Self {
            connection,
            dialect,
            resolver,
            pending: PendingTable::new(),
            dispatcher: Mutex::new(None),
            events,
            trades,
            config,
        })
    }

    /// Subscribe to canonical events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Sender half of the event channel, for components publishing alongside.
    #[must_use]
    pub fn event_sender(&self) -> broadcast::Sender<StreamEvent> {
        self.events.clone()
    }

    /// Subscribe to resolved raw trade batches.
    #[must_use]
    pub fn trades(&self) -> broadcast::Receiver<TradeBatch> {
        self.trades.subscribe()
    }

    /// Underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &StreamConnection {
        &self.connection
    }

    /// Venue dialect.
    #[must_use]
    pub fn dialect(&self) -> &dyn VenueDialect {
        self.dialect.as_ref()
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Open the connection and start the dispatch loop.
    ///
    /// Waits for the previous session's dispatch loop to drain first, so its
    /// shutdown cannot fail requests issued on the new connection.
    pub async fn open(self: &Arc<Self>) -> Result<(), ConnectionError> {
        let previous = {
            let mut dispatcher = self.dispatcher.lock();
            let state = self.connection.state();
            if state != ConnectionState::Closed {
                return Err(ConnectionError::AlreadyOpen { state });
            }
            dispatcher.take()
        };
        if let Some(previous) = previous {
            if let Err(e) = previous.await {
                tracing::warn!(error = %e, "Previous dispatch loop ended abnormally");
            }
        }

        let inbound = self.connection.open().await?;
        let session = self.pending.begin_session();
        let handle = tokio::spawn(Arc::clone(self).dispatch(inbound, session));
        *self.dispatcher.lock() = Some(handle);
        Ok(())
    }

    /// Close the connection, failing every pending request.
    pub async fn close(&self) {
        self.connection.close().await;
        let failed = self.pending.fail_through(self.pending.session());
        if failed > 0 {
            tracing::debug!(failed, "Failed pending requests on close");
        }
    }

    // -------------------------------------------------------------------------
    // Requests
    // -------------------------------------------------------------------------

    /// Subscribe a logical channel.
    pub async fn subscribe(&self, subscription: &Subscription) -> Result<Value, RequestError> {
        let token = self.token_for(subscription);
        tracing::debug!(%subscription, %token, "Subscribing");
        self.request(Command::Subscribe, vec![token]).await
    }

    /// Unsubscribe a logical channel.
    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<Value, RequestError> {
        let token = self.token_for(subscription);
        tracing::debug!(%subscription, %token, "Unsubscribing");
        self.request(Command::Unsubscribe, vec![token]).await
    }

    /// Subscribe an upstream stream kind directly.
    pub async fn subscribe_stream(
        &self,
        symbol: &Pair,
        kind: &StreamKind,
    ) -> Result<Value, RequestError> {
        let token = self
            .dialect
            .channel_token(&self.dialect.token_symbol(symbol), kind);
        self.request(Command::Subscribe, vec![token]).await
    }

    /// Unsubscribe an upstream stream kind directly.
    pub async fn unsubscribe_stream(
        &self,
        symbol: &Pair,
        kind: &StreamKind,
    ) -> Result<Value, RequestError> {
        let token = self
            .dialect
            .channel_token(&self.dialect.token_symbol(symbol), kind);
        self.request(Command::Unsubscribe, vec![token]).await
    }

    /// Tokens the venue reports as subscribed.
    pub async fn list_subscriptions(&self) -> Result<Vec<String>, RequestError> {
        let result = self.request(Command::ListSubscriptions, Vec::new()).await?;
        self.dialect
            .parse_subscription_list(&result)
            .map_err(|e| RequestError::Decode(e.to_string()))
    }

    /// Remove every channel streaming `symbol`. Returns the removed tokens.
    ///
    /// Uses the venue's bulk unsubscribe when available; otherwise lists the
    /// subscriptions, keeps the tokens matching the symbol and removes them
    /// one by one.
    pub async fn unsubscribe_all_by_symbol(
        &self,
        symbol: &Pair,
    ) -> Result<Vec<String>, RequestError> {
        let token_symbol = self.dialect.token_symbol(symbol);

        if let Some(tokens) = self.dialect.bulk_unsubscribe(&token_symbol) {
            self.request(Command::Unsubscribe, tokens.clone()).await?;
            return Ok(tokens);
        }

        let matching: Vec<String> = self
            .list_subscriptions()
            .await?
            .into_iter()
            .filter(|token| self.dialect.token_matches(token, &token_symbol))
            .collect();

        for token in &matching {
            self.request(Command::Unsubscribe, vec![token.clone()]).await?;
        }

        tracing::info!(%symbol, removed = matching.len(), "Unsubscribed symbol");
        Ok(matching)
    }

    /// Send a correlated request and wait for its response.
    pub async fn request(
        &self,
        command: Command,
        tokens: Vec<String>,
    ) -> Result<Value, RequestError> {
        let (id, response) = self.pending.register();

        let frame = match self.dialect.encode_request(id, command, &tokens) {
            Ok(frame) => frame,
            Err(e) => {
                self.pending.cancel(id);
                return Err(RequestError::Encode(e.to_string()));
            }
        };

        if let Err(e) = self.connection.send(frame) {
            self.pending.cancel(id);
            return Err(e.into());
        }

        tracing::debug!(id, ?command, ?tokens, "Request sent");

        match tokio::time::timeout(self.config.request_timeout, response).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RequestError::ConnectionClosed),
            Err(_) => {
                self.pending.expire(id);
                tracing::warn!(id, ?command, "Request timed out");
                Err(RequestError::Timeout {
                    id,
                    timeout: self.config.request_timeout,
                })
            }
        }
    }

    fn token_for(&self, subscription: &Subscription) -> String {
        let kind = match (subscription.channel(), subscription.interval()) {
            (Channel::Candle, Some(interval)) => StreamKind::Candle(interval.clone()),
            _ => StreamKind::Price,
        };
        self.dialect
            .channel_token(&self.dialect.token_symbol(subscription.symbol()), &kind)
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    async fn dispatch(self: Arc<Self>, mut inbound: TransportEvents, session: u64) {
        while let Some(event) = inbound.recv().await {
            match event {
                TransportEvent::Message(frame) => {
                    if let Err(e) = self.handle_frame(&frame).await {
                        self.publish(StreamEvent::Error(e.into()));
                    }
                }
                TransportEvent::Error(e) => {
                    self.publish(StreamEvent::Error(StreamFault::Transport(e.to_string())));
                }
                TransportEvent::Closed => break,
            }
        }

        let failed = self.pending.fail_through(session);
        tracing::info!(
            venue = self.dialect.venue_id(),
            session,
            failed,
            "Dispatch loop stopped"
        );
    }

    async fn handle_frame(&self, frame: &Frame) -> Result<(), MultiplexerError> {
        let venue = self.dialect.venue_id();
        metrics::record_frame_received(venue);

        let Decoded { raw, inbound } = match self.dialect.decode(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(venue, error = %e, "Undecodable frame");
                metrics::record_decode_error(venue);
                self.publish(StreamEvent::Error(StreamFault::Transport(e.to_string())));
                return Ok(());
            }
        };

        self.publish(StreamEvent::Payload(raw));

        match inbound {
            Inbound::Response { id, outcome } => {
                self.complete(id, outcome.map_err(RequestError::Venue)).await
            }
            Inbound::Push(push) => {
                self.route(push);
                Ok(())
            }
            Inbound::Error(error) => {
                tracing::warn!(venue, code = error.code, message = %error.message, "Venue error");
                self.publish(StreamEvent::Error(StreamFault::Venue {
                    code: error.code,
                    message: error.message,
                }));
                Ok(())
            }
            Inbound::Ignored => Ok(()),
        }
    }

    async fn complete(
        &self,
        id: u64,
        outcome: Result<Value, RequestError>,
    ) -> Result<(), MultiplexerError> {
        match self.pending.fulfill(id, outcome) {
            Completion::Delivered => Ok(()),
            Completion::Expired => {
                tracing::debug!(id, "Dropped late response to timed-out request");
                Ok(())
            }
            Completion::Unknown => {
                tracing::error!(venue = self.dialect.venue_id(), id, "Protocol desync");
                metrics::record_protocol_desync(self.dialect.venue_id());
                if self.config.close_on_desync {
                    self.connection.close().await;
                }
                Err(MultiplexerError::ProtocolDesync { id })
            }
        }
    }

    fn route(&self, push: Push) {
        match push {
            Push::Price {
                symbol,
                price,
                timestamp,
            } => {
                if let Some(pair) = self.resolve(&symbol) {
                    self.publish(StreamEvent::NewPrice(PriceEvent {
                        symbol: pair,
                        price,
                        timestamp,
                    }));
                }
            }
            Push::Candle { symbol, candle } => {
                if let Some(pair) = self.resolve(&symbol) {
                    self.publish(StreamEvent::Candle(candle.into_event(pair)));
                }
            }
            Push::Trades { symbol, trades } => {
                if let Some(pair) = self.resolve(&symbol) {
                    // No receiver means no synthesizer is running.
                    let _ = self.trades.send(TradeBatch {
                        symbol: pair,
                        trades,
                    });
                }
            }
        }
    }

    fn resolve(&self, native: &str) -> Option<Pair> {
        match self.resolver.parse(native) {
            Ok(resolution) => Some(resolution.pair),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping push for unresolvable symbol");
                self.publish(StreamEvent::Error(StreamFault::CacheDesync { symbol: e.symbol }));
                None
            }
        }
    }

    fn publish(&self, event: StreamEvent) {
        // Sending fails only when nobody is listening.
        let _ = self.events.send(event);
    }
}

impl From<MultiplexerError> for StreamFault {
    fn from(error: MultiplexerError) -> Self {
        match error {
            MultiplexerError::ProtocolDesync { id } => Self::ProtocolDesync { id },
        }
    }
}
