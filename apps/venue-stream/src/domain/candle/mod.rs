//! Candle Windows
//!
//! Fixed-interval OHLC reconstruction from raw trades, for venues that do
//! not push candles natively.
//!
//! A trade belongs to the current window iff `trade.timestamp < close_at`.
//! That single predicate is used both to select the trades appended to the
//! current window and (negated) to select the trades carried into the next
//! one, so a trade can never land in both or neither.

use rust_decimal::Decimal;

use crate::domain::streaming::{CandleEvent, Interval, TimestampMs, Trade};
use crate::domain::symbol::Pair;

/// Whether a trade falls in the window closing at `close_at`.
#[must_use]
pub const fn belongs_to_window(trade: &Trade, close_at: TimestampMs) -> bool {
    trade.timestamp < close_at
}

/// Split trades into `(current, next)` around `close_at`, preserving order.
#[must_use]
pub fn partition_trades(
    trades: impl IntoIterator<Item = Trade>,
    close_at: TimestampMs,
) -> (Vec<Trade>, Vec<Trade>) {
    trades
        .into_iter()
        .partition(|trade| belongs_to_window(trade, close_at))
}

// =============================================================================
// Candle Window
// =============================================================================

/// Trades collected for one `[timestamp, close_at)` window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandleWindow {
    timestamp: TimestampMs,
    close_at: TimestampMs,
    trades: Vec<Trade>,
}

impl CandleWindow {
    /// Empty window with explicit bounds.
    #[must_use]
    pub const fn new(timestamp: TimestampMs, close_at: TimestampMs) -> Self {
        Self {
            timestamp,
            close_at,
            trades: Vec::new(),
        }
    }

    /// Window open time.
    #[must_use]
    pub const fn timestamp(&self) -> TimestampMs {
        self.timestamp
    }

    /// Exclusive window close time.
    #[must_use]
    pub const fn close_at(&self) -> TimestampMs {
        self.close_at
    }

    /// Buffered trades.
    #[must_use]
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Whether no trade has been buffered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    /// Append trades in arrival order.
    pub fn extend(&mut self, trades: impl IntoIterator<Item = Trade>) {
        self.trades.extend(trades);
    }

    /// The empty window on this window's grid containing `timestamp`, which
    /// must be at or after `close_at`. `None` if its bounds overflow.
    #[must_use]
    pub const fn containing(&self, timestamp: TimestampMs, interval_ms: i64) -> Option<Self> {
        if interval_ms <= 0 || timestamp < self.close_at {
            return None;
        }
        let Some(offset) = timestamp.checked_sub(self.close_at) else {
            return None;
        };
        let Some(skipped) = (offset / interval_ms).checked_mul(interval_ms) else {
            return None;
        };
        let Some(open) = self.close_at.checked_add(skipped) else {
            return None;
        };
        let Some(close) = open.checked_add(interval_ms) else {
            return None;
        };
        Some(Self::new(open, close))
    }

    /// OHLC summary of the buffered trades; `None` for an empty window.
    #[must_use]
    pub fn candle(&self, symbol: &Pair, interval: &Interval, is_closed: bool) -> Option<CandleEvent> {
        let first = self.trades.first()?;
        let last = self.trades.last()?;

        let (high, low, volume) = self.trades.iter().fold(
            (first.price, first.price, Decimal::ZERO),
            |(high, low, volume), trade| {
                (
                    high.max(trade.price),
                    low.min(trade.price),
                    volume + trade.price * trade.size,
                )
            },
        );

        Some(CandleEvent {
            symbol: symbol.clone(),
            open: first.price,
            high,
            low,
            close: last.price,
            volume,
            timestamp: self.timestamp,
            interval: interval.clone(),
            is_closed: Some(is_closed),
            close_at: Some(self.close_at),
        })
    }
}

// =============================================================================
// Window Accumulator
// =============================================================================

/// Active window plus the immediately previous one for a `(symbol, interval)`.
#[derive(Debug, Clone)]
pub struct WindowAccumulator {
    symbol: Pair,
    interval: Interval,
    current: CandleWindow,
    previous: Option<CandleWindow>,
}

impl WindowAccumulator {
    /// Start accumulating at the window `[timestamp, timestamp + interval)`.
    #[must_use]
    pub fn new(symbol: Pair, interval: Interval, timestamp: TimestampMs) -> Self {
        let current = CandleWindow::new(timestamp, timestamp.saturating_add(interval.millis()));
        Self {
            symbol,
            interval,
            current,
            previous: None,
        }
    }

    /// The window being built.
    #[must_use]
    pub const fn current(&self) -> &CandleWindow {
        &self.current
    }

    /// The last window that was rolled over, if any.
    #[must_use]
    pub const fn previous(&self) -> Option<&CandleWindow> {
        self.previous.as_ref()
    }

    /// Candle for the window being built.
    #[must_use]
    pub fn in_progress(&self) -> Option<CandleEvent> {
        self.current.candle(&self.symbol, &self.interval, false)
    }

    /// Closed candle for the previous window.
    #[must_use]
    pub fn last_closed(&self) -> Option<CandleEvent> {
        self.previous
            .as_ref()
            .and_then(|window| window.candle(&self.symbol, &self.interval, true))
    }

    /// Fold a trade batch into the window, returning the candles to publish
    /// in order.
    ///
    /// Each pass appends the trades that belong to the current window and
    /// emits an in-progress candle for them. If trades remain past
    /// `close_at`, the current window is emitted as closed and replaced by
    /// the window holding the earliest remaining trade, and the remainder is
    /// folded again. Windows that saw no trades are skipped without a candle,
    /// so a batch costs at most one pass per window it touches. Trades whose
    /// window bounds would overflow are discarded.
    pub fn ingest(&mut self, trades: Vec<Trade>) -> Vec<CandleEvent> {
        let mut emitted = Vec::new();
        let mut batch = trades;

        loop {
            let (current, next) = partition_trades(batch, self.current.close_at());

            if !current.is_empty() {
                self.current.extend(current);
                emitted.extend(self.in_progress());
            }

            let Some(earliest) = next.iter().map(|trade| trade.timestamp).min() else {
                break;
            };
            let Some(following) = self.current.containing(earliest, self.interval.millis()) else {
                break;
            };

            emitted.extend(self.current.candle(&self.symbol, &self.interval, true));
            let closed = std::mem::replace(&mut self.current, following);
            if !closed.is_empty() {
                self.previous = Some(closed);
            }
            batch = next;
        }

        emitted
    }
}
