//! Engine Configuration Settings
//!
//! Configuration types for the venue stream engine, loaded from environment
//! variables. Invalid numeric values fall back to their defaults.

use std::time::Duration;

use crate::application::services::DEFAULT_CACHE_TTL;
use crate::domain::subscription::{Subscription, SubscriptionError};

/// Venue endpoints and protocol options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueSettings {
    /// Venue identifier; keys the symbol registry.
    pub id: String,
    /// WebSocket stream URL.
    pub ws_url: String,
    /// REST base URL.
    pub rest_url: String,
    /// Whether the venue pushes candles natively. When false candles are
    /// synthesized from trades.
    pub native_candles: bool,
}

impl Default for VenueSettings {
    fn default() -> Self {
        Self {
            id: "binance".to_string(),
            ws_url: "wss://stream.binance.com:9443/ws".to_string(),
            rest_url: "https://api.binance.com".to_string(),
            native_candles: true,
        }
    }
}

/// Stream connection and multiplexer settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// Keep-alive ping interval.
    pub heartbeat_interval: Duration,
    /// Silence after which the connection is considered dead.
    pub heartbeat_timeout: Duration,
    /// Upper bound on a correlated request.
    pub request_timeout: Duration,
    /// Attempts for the initial open, including the first.
    pub open_max_attempts: u32,
    /// First retry delay.
    pub reconnect_delay_initial: Duration,
    /// Retry delay cap.
    pub reconnect_delay_max: Duration,
    /// Buffered events per subscriber before lagging.
    pub event_capacity: usize,
    /// Close the connection on an unknown correlation id.
    pub close_on_desync: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            request_timeout: Duration::from_secs(10),
            open_max_attempts: 5,
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            event_capacity: 4096,
            close_on_desync: false,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Venue endpoints.
    pub venue: VenueSettings,
    /// Connection settings.
    pub stream: StreamSettings,
    /// Symbol cache time-to-live.
    pub symbol_cache_ttl: Duration,
    /// Per-request REST timeout.
    pub http_timeout: Duration,
    /// Subscriptions the runner opens at startup.
    pub subscriptions: Vec<Subscription>,
    /// Prometheus exporter port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            venue: VenueSettings::default(),
            stream: StreamSettings::default(),
            symbol_cache_ttl: DEFAULT_CACHE_TTL,
            http_timeout: Duration::from_secs(10),
            subscriptions: Vec::new(),
            metrics_port: 0,
        }
    }
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL is set but empty or a subscription entry
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);
        let defaults = Self::default();

        let venue = VenueSettings {
            id: env.non_empty("VENUE_ID")?.unwrap_or(defaults.venue.id),
            ws_url: env.non_empty("VENUE_WS_URL")?.unwrap_or(defaults.venue.ws_url),
            rest_url: env.non_empty("VENUE_REST_URL")?.unwrap_or(defaults.venue.rest_url),
            native_candles: env.bool("VENUE_NATIVE_CANDLES", defaults.venue.native_candles),
        };

        let d = defaults.stream;
        let stream = StreamSettings {
            heartbeat_interval: env.secs("STREAM_HEARTBEAT_INTERVAL_SECS", d.heartbeat_interval),
            heartbeat_timeout: env.secs("STREAM_HEARTBEAT_TIMEOUT_SECS", d.heartbeat_timeout),
            request_timeout: env.secs("STREAM_REQUEST_TIMEOUT_SECS", d.request_timeout),
            open_max_attempts: env.parsed("STREAM_OPEN_MAX_ATTEMPTS", d.open_max_attempts),
            reconnect_delay_initial: env
                .millis("STREAM_RECONNECT_DELAY_INITIAL_MS", d.reconnect_delay_initial),
            reconnect_delay_max: env.secs("STREAM_RECONNECT_DELAY_MAX_SECS", d.reconnect_delay_max),
            event_capacity: env.parsed("STREAM_EVENT_CAPACITY", d.event_capacity),
            close_on_desync: env.bool("STREAM_CLOSE_ON_DESYNC", d.close_on_desync),
        };

        let subscriptions = lookup("STREAM_SUBSCRIPTIONS")
            .map(|list| parse_subscriptions(&list))
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            venue,
            stream,
            symbol_cache_ttl: env.secs("SYMBOL_CACHE_TTL_SECS", defaults.symbol_cache_ttl),
            http_timeout: env.secs("HTTP_TIMEOUT_SECS", defaults.http_timeout),
            subscriptions,
            metrics_port: env.parsed("STREAM_METRICS_PORT", defaults.metrics_port),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),

    /// A `STREAM_SUBSCRIPTIONS` entry does not parse.
    #[error("invalid subscription {entry:?}: {source}")]
    InvalidSubscription {
        /// Offending entry.
        entry: String,
        /// Parse failure.
        #[source]
        source: SubscriptionError,
    },
}

fn parse_subscriptions(list: &str) -> Result<Vec<Subscription>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse()
                .map_err(|source| ConfigError::InvalidSubscription {
                    entry: entry.to_string(),
                    source,
                })
        })
        .collect()
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn non_empty(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match (self.0)(key) {
            Some(value) if value.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            other => Ok(other),
        }
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        (self.0)(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        (self.0)(key)
            .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            })
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        (self.0)(key)
            .and_then(|v| v.trim().parse().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        (self.0)(key)
            .and_then(|v| v.trim().parse().ok())
            .map_or(default, Duration::from_millis)
    }
}
