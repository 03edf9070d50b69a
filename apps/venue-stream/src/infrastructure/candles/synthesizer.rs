//! Candle Synthesizer
//!
//! Builds candles from the raw trade stream for venues without a native
//! candle channel.
//!
//! # Registration
//!
//! 1. Fetch the latest candle for `(symbol, interval)` to fix the window
//!    `[timestamp, timestamp + interval)`.
//! 2. Fetch trades since `timestamp` and fold them into the window.
//! 3. Subscribe to the raw trade channel, shared by every interval
//!    registered for the same symbol.
//!
//! A single consumer task folds each trade batch from the multiplexer into
//! every active registration for its symbol and publishes the resulting
//! candles on the multiplexer's event channel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{FetchError, HistorySource, StreamKind};
use crate::domain::candle::WindowAccumulator;
use crate::domain::streaming::{CandleEvent, Interval, StreamEvent, StreamFault, TradeBatch};
use crate::domain::subscription::{FeedRefCounts, Subscription};
use crate::domain::symbol::Pair;
use crate::infrastructure::metrics;
use crate::infrastructure::stream::{RequestError, SubscriptionMultiplexer};

/// Registration failures.
#[derive(Debug, thiserror::Error)]
pub enum SynthesizerError {
    /// `(symbol, interval)` is already registered.
    #[error("candles for {symbol} {interval} are already being synthesized")]
    AlreadyRegistered {
        /// Symbol.
        symbol: Pair,
        /// Interval.
        interval: Interval,
    },

    /// `(symbol, interval)` is not registered.
    #[error("candles for {symbol} {interval} are not being synthesized")]
    NotRegistered {
        /// Symbol.
        symbol: Pair,
        /// Interval.
        interval: Interval,
    },

    /// Calendar-month windows have no fixed length to roll by.
    #[error("{0} candles cannot be synthesized from trades")]
    CalendarInterval(Interval),

    /// Only candle subscriptions can be synthesized.
    #[error("{0} is not a candle subscription")]
    NotACandle(Subscription),

    /// Seeding history could not be fetched.
    #[error("failed to seed {symbol} candles: {source}")]
    History {
        /// Symbol.
        symbol: Pair,
        /// Fetch failure.
        #[source]
        source: FetchError,
    },

    /// The raw trade subscription failed.
    #[error("raw trade subscription failed: {0}")]
    Request(#[from] RequestError),
}

type Key = (Pair, Interval);

#[derive(Debug)]
enum Registration {
    /// Seeding in progress; trades are not applied yet.
    Seeding,
    Active(WindowAccumulator),
}

#[derive(Debug, Default)]
struct State {
    registrations: HashMap<Key, Registration>,
    feeds: FeedRefCounts<Pair>,
}

/// Trade-driven candle builder bound to one multiplexer.
pub struct CandleSynthesizer {
    mux: Arc<SubscriptionMultiplexer>,
    history: Arc<dyn HistorySource>,
    state: Arc<Mutex<State>>,
    consumer: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for CandleSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandleSynthesizer")
            .field("registrations", &self.state.lock().registrations.len())
            .finish_non_exhaustive()
    }
}

impl CandleSynthesizer {
    /// Create a synthesizer. The trade consumer starts on first registration.
    #[must_use]
    pub fn new(mux: Arc<SubscriptionMultiplexer>, history: Arc<dyn HistorySource>) -> Self {
        Self {
            mux,
            history,
            state: Arc::new(Mutex::new(State::default())),
            consumer: Mutex::new(None),
        }
    }

    /// Start synthesizing candles for a candle subscription.
    pub async fn register(&self, subscription: &Subscription) -> Result<(), SynthesizerError> {
        let (symbol, interval) = key_of(subscription)?;
        {
            let mut state = self.state.lock();
            if state.registrations.contains_key(&(symbol.clone(), interval.clone())) {
                return Err(SynthesizerError::AlreadyRegistered { symbol, interval });
            }
            state
                .registrations
                .insert((symbol.clone(), interval.clone()), Registration::Seeding);
        }
        self.ensure_consumer();

        let accumulator = match self.seed(&symbol, &interval).await {
            Ok(accumulator) => accumulator,
            Err(e) => {
                self.state
                    .lock()
                    .registrations
                    .remove(&(symbol.clone(), interval.clone()));
                return Err(e);
            }
        };

        let first_for_symbol = {
            let mut state = self.state.lock();
            let key = (symbol.clone(), interval.clone());
            match state.registrations.get_mut(&key) {
                Some(slot) if matches!(slot, Registration::Seeding) => {
                    *slot = Registration::Active(accumulator);
                }
                // Unregistered while seeding.
                _ => return Err(SynthesizerError::NotRegistered { symbol, interval }),
            }
            state.feeds.acquire(&symbol)
        };

        if first_for_symbol {
            if let Err(e) = self.mux.subscribe_stream(&symbol, &StreamKind::Trades).await {
                let mut state = self.state.lock();
                state
                    .registrations
                    .remove(&(symbol.clone(), interval.clone()));
                state.feeds.release(&symbol);
                return Err(e.into());
            }
        }

        tracing::info!(%symbol, %interval, "Candle synthesis registered");
        Ok(())
    }

    /// Stop synthesizing candles for a candle subscription.
    pub async fn unregister(&self, subscription: &Subscription) -> Result<(), SynthesizerError> {
        let (symbol, interval) = key_of(subscription)?;
        let last_for_symbol = {
            let mut state = self.state.lock();
            let key = (symbol.clone(), interval.clone());
            match state.registrations.remove(&key) {
                Some(Registration::Active(_)) => state.feeds.release(&symbol),
                Some(Registration::Seeding) => false,
                None => return Err(SynthesizerError::NotRegistered { symbol, interval }),
            }
        };

        if last_for_symbol {
            self.mux
                .unsubscribe_stream(&symbol, &StreamKind::Trades)
                .await?;
        }

        tracing::info!(%symbol, %interval, "Candle synthesis unregistered");
        Ok(())
    }

    /// Drop every registration for `symbol` without touching the venue.
    ///
    /// Used when the caller removes the symbol's channels in bulk.
    pub fn forget_symbol(&self, symbol: &Pair) -> usize {
        let mut state = self.state.lock();
        let before = state.registrations.len();
        state.registrations.retain(|(s, _), _| s != symbol);
        while state.feeds.count(symbol) > 0 {
            state.feeds.release(symbol);
        }
        before - state.registrations.len()
    }

    /// Drop every registration, e.g. after the connection closed.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.registrations.clear();
        state.feeds = FeedRefCounts::new();
    }

    /// Whether `(symbol, interval)` is registered.
    #[must_use]
    pub fn is_registered(&self, symbol: &Pair, interval: &Interval) -> bool {
        self.state
            .lock()
            .registrations
            .contains_key(&(symbol.clone(), interval.clone()))
    }

    /// Candle for the window currently being built.
    #[must_use]
    pub fn in_progress(&self, symbol: &Pair, interval: &Interval) -> Option<CandleEvent> {
        self.with_accumulator(symbol, interval, WindowAccumulator::in_progress)
    }

    /// Most recently closed synthesized candle.
    #[must_use]
    pub fn last_closed(&self, symbol: &Pair, interval: &Interval) -> Option<CandleEvent> {
        self.with_accumulator(symbol, interval, WindowAccumulator::last_closed)
    }

    /// Stop the trade consumer.
    pub fn shutdown(&self) {
        if let Some(cancel) = self.consumer.lock().take() {
            cancel.cancel();
        }
    }

    fn with_accumulator(
        &self,
        symbol: &Pair,
        interval: &Interval,
        read: impl FnOnce(&WindowAccumulator) -> Option<CandleEvent>,
    ) -> Option<CandleEvent> {
        match self
            .state
            .lock()
            .registrations
            .get(&(symbol.clone(), interval.clone()))
        {
            Some(Registration::Active(accumulator)) => read(accumulator),
            _ => None,
        }
    }

    async fn seed(
        &self,
        symbol: &Pair,
        interval: &Interval,
    ) -> Result<WindowAccumulator, SynthesizerError> {
        let history_error = |source| SynthesizerError::History {
            symbol: symbol.clone(),
            source,
        };

        let latest = self
            .history
            .latest_candle(symbol, interval)
            .await
            .map_err(history_error)?;
        let trades = self
            .history
            .trades_since(symbol, latest.timestamp)
            .await
            .map_err(history_error)?;

        let seeded = trades.len();
        let mut accumulator = WindowAccumulator::new(symbol.clone(), interval.clone(), latest.timestamp);
        // Seeding only positions the window; nothing is published.
        let _ = accumulator.ingest(trades);

        tracing::debug!(
            %symbol,
            %interval,
            window_open = accumulator.current().timestamp(),
            seeded,
            "Seeded candle window"
        );
        Ok(accumulator)
    }

    fn ensure_consumer(&self) {
        let mut consumer = self.consumer.lock();
        if consumer.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let trades = self.mux.trades();
        let events = self.mux.event_sender();
        tokio::spawn(consume(Arc::clone(&self.state), trades, events, cancel.clone()));
        *consumer = Some(cancel);
    }
}

impl Drop for CandleSynthesizer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn key_of(subscription: &Subscription) -> Result<Key, SynthesizerError> {
    let interval = subscription
        .interval()
        .ok_or_else(|| SynthesizerError::NotACandle(subscription.clone()))?;
    if interval.is_calendar() {
        return Err(SynthesizerError::CalendarInterval(interval.clone()));
    }
    Ok((subscription.symbol().clone(), interval.clone()))
}

/// Fold one batch into every active registration for its symbol.
fn apply(state: &Mutex<State>, batch: &TradeBatch) -> Vec<CandleEvent> {
    let mut state = state.lock();
    state
        .registrations
        .iter_mut()
        .filter(|((symbol, _), _)| symbol == &batch.symbol)
        .filter_map(|(_, registration)| match registration {
            Registration::Active(accumulator) => Some(accumulator.ingest(batch.trades.clone())),
            Registration::Seeding => None,
        })
        .flatten()
        .collect()
}

async fn consume(
    state: Arc<Mutex<State>>,
    mut trades: broadcast::Receiver<TradeBatch>,
    events: broadcast::Sender<StreamEvent>,
    cancel: CancellationToken,
) {
    loop {
        let batch = tokio::select! {
            () = cancel.cancelled() => break,
            batch = trades.recv() => batch,
        };

        match batch {
            Ok(batch) => {
                for candle in apply(&state, &batch) {
                    metrics::record_synthesized_candle(candle.is_closed == Some(true));
                    let _ = events.send(StreamEvent::Candle(candle));
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Candle synthesizer lagged behind trade stream");
                let _ = events.send(StreamEvent::Error(StreamFault::Synthesis(format!(
                    "dropped {skipped} trade batches"
                ))));
            }
            Err(RecvError::Closed) => break,
        }
    }
    tracing::debug!("Candle synthesizer stopped");
}
