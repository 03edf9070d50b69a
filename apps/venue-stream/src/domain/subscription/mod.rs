//! Subscription Types
//!
//! Domain types describing what a consumer wants to stream and the
//! reference counting used when several consumers share one upstream
//! channel.
//!
//! # Design
//!
//! A [`Subscription`] is ephemeral: it only exists as the argument of
//! subscribe/unsubscribe calls. The `interval` field is present if and only
//! if the channel is [`Channel::Candle`], which is enforced at construction
//! so an invalid combination cannot reach the multiplexer.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::streaming::{Interval, IntervalParseError};
use crate::domain::symbol::{Pair, PairParseError};

// =============================================================================
// Channel
// =============================================================================

/// Public market data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Last price updates (`newPrice` events).
    Price,
    /// OHLC candles (`candle` events).
    Candle,
}

impl Channel {
    /// Channel name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Candle => "candle",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "price" => Ok(Self::Price),
            "candle" => Ok(Self::Candle),
            _ => Err(SubscriptionError::UnknownChannel(s.to_string())),
        }
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Errors building a subscription.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// Channel is not one of `price` or `candle`.
    #[error("unknown channel {0:?}")]
    UnknownChannel(String),

    /// Candle subscriptions need an interval.
    #[error("candle subscription for {0} requires an interval")]
    MissingInterval(Pair),

    /// Price subscriptions must not carry an interval.
    #[error("price subscription for {0} does not take an interval")]
    UnexpectedInterval(Pair),

    /// Symbol is not canonical.
    #[error(transparent)]
    Symbol(#[from] PairParseError),

    /// Interval is malformed.
    #[error(transparent)]
    Interval(#[from] IntervalParseError),

    /// Textual subscription is malformed.
    #[error("malformed subscription {0:?}")]
    Malformed(String),
}

/// A request to stream one channel for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    channel: Channel,
    symbol: Pair,
    interval: Option<Interval>,
}

impl Subscription {
    /// Validate and build a subscription.
    pub fn new(
        channel: Channel,
        symbol: Pair,
        interval: Option<Interval>,
    ) -> Result<Self, SubscriptionError> {
        match (channel, &interval) {
            (Channel::Candle, None) => Err(SubscriptionError::MissingInterval(symbol)),
            (Channel::Price, Some(_)) => Err(SubscriptionError::UnexpectedInterval(symbol)),
            _ => Ok(Self {
                channel,
                symbol,
                interval,
            }),
        }
    }

    /// Price subscription.
    #[must_use]
    pub const fn price(symbol: Pair) -> Self {
        Self {
            channel: Channel::Price,
            symbol,
            interval: None,
        }
    }

    /// Candle subscription.
    #[must_use]
    pub const fn candle(symbol: Pair, interval: Interval) -> Self {
        Self {
            channel: Channel::Candle,
            symbol,
            interval: Some(interval),
        }
    }

    /// Channel.
    #[must_use]
    pub const fn channel(&self) -> Channel {
        self.channel
    }

    /// Canonical symbol.
    #[must_use]
    pub const fn symbol(&self) -> &Pair {
        &self.symbol
    }

    /// Candle interval; always `Some` for candle subscriptions.
    #[must_use]
    pub const fn interval(&self) -> Option<&Interval> {
        self.interval.as_ref()
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.interval {
            Some(interval) => write!(f, "{}:{}:{interval}", self.channel, self.symbol),
            None => write!(f, "{}:{}", self.channel, self.symbol),
        }
    }
}

/// Parses `price:BTC/USDT` or `candle:BTC/USDT:1m`.
impl FromStr for Subscription {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(':');
        let channel: Channel = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| SubscriptionError::Malformed(s.to_string()))?
            .parse()?;
        let symbol: Pair = parts
            .next()
            .ok_or_else(|| SubscriptionError::Malformed(s.to_string()))?
            .parse()?;
        let interval = parts.next().map(str::parse::<Interval>).transpose()?;

        if parts.next().is_some() {
            return Err(SubscriptionError::Malformed(s.to_string()));
        }

        Self::new(channel, symbol, interval)
    }
}

// =============================================================================
// Shared Feed Reference Counting
// =============================================================================

/// Reference counts for upstream channels shared by several local users.
///
/// `acquire` reports when a key goes 0→1 (subscribe upstream) and `release`
/// when it goes 1→0 (unsubscribe upstream).
#[derive(Debug)]
pub struct FeedRefCounts<K> {
    counts: HashMap<K, usize>,
}

impl<K> Default for FeedRefCounts<K> {
    fn default() -> Self {
        Self {
            counts: HashMap::new(),
        }
    }
}

impl<K: std::hash::Hash + Eq + Clone> FeedRefCounts<K> {
    /// Create an empty counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reference. Returns `true` on the first reference.
    pub fn acquire(&mut self, key: &K) -> bool {
        let count = self.counts.entry(key.clone()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Drop a reference. Returns `true` when the last reference is gone.
    ///
    /// Releasing an unknown key is a no-op returning `false`.
    pub fn release(&mut self, key: &K) -> bool {
        let Some(count) = self.counts.get_mut(key) else {
            return false;
        };

        *count = count.saturating_sub(1);
        if *count == 0 {
            self.counts.remove(key);
            return true;
        }
        false
    }

    /// Current reference count.
    #[must_use]
    pub fn count(&self, key: &K) -> usize {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Number of keys with at least one reference.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether no key is referenced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
