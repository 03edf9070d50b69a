//! Symbol Cache
//!
//! Per-venue ticker and pair metadata shared by every client of that venue.
//!
//! A [`SymbolRegistry`] owns one [`SymbolNamespace`] per venue id. Each
//! namespace holds an immutable [`SymbolSnapshot`] that is swapped atomically
//! on a successful refresh, so readers never observe a half-built cache.
//! Refreshes are deduplicated: while one is in flight every caller shares its
//! outcome instead of issuing another metadata fetch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

use crate::application::ports::{FetchError, MarketListing, MetadataSource};
use crate::domain::symbol::Pair;
use crate::infrastructure::metrics;

/// Default time a snapshot stays fresh.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

// =============================================================================
// Error Type
// =============================================================================

/// Errors from refreshing a symbol namespace.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The metadata fetch failed.
    #[error("symbol metadata fetch for {venue} failed: {source}")]
    Fetch {
        /// Venue id.
        venue: String,
        /// Underlying fetch error.
        #[source]
        source: FetchError,
    },

    /// The refresh task died before producing a result.
    #[error("symbol refresh for {venue} aborted: {reason}")]
    Aborted {
        /// Venue id.
        venue: String,
        /// Join error description.
        reason: String,
    },
}

// =============================================================================
// Snapshot
// =============================================================================

/// Immutable view of a venue's symbol metadata.
#[derive(Debug, Clone, Default)]
pub struct SymbolSnapshot {
    refreshed_at: Option<Instant>,
    tickers: HashSet<String>,
    pairs: HashSet<String>,
    parsed: HashMap<String, Pair>,
}

impl SymbolSnapshot {
    /// Snapshot that has never been populated.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from a market listing.
    ///
    /// A native pair `p` decomposes into `(b, p[len(b)..])` when `p` starts
    /// with ticker `b` and the remainder is itself a known ticker. When
    /// several tickers qualify, the longest base wins.
    #[must_use]
    pub fn from_listing(listing: MarketListing, refreshed_at: Instant) -> Self {
        let MarketListing { tickers, pairs } = listing;

        let mut by_length: Vec<&String> = tickers.iter().filter(|t| !t.is_empty()).collect();
        by_length.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let parsed = pairs
            .iter()
            .filter_map(|native| {
                by_length.iter().find_map(|base| {
                    let quote = native.strip_prefix(base.as_str())?;
                    tickers
                        .contains(quote)
                        .then(|| (native.clone(), Pair::new(base.as_str(), quote)))
                })
            })
            .collect();

        Self {
            refreshed_at: Some(refreshed_at),
            tickers,
            pairs,
            parsed,
        }
    }

    /// Decomposition of a native pair, if known.
    #[must_use]
    pub fn parsed(&self, native: &str) -> Option<&Pair> {
        self.parsed.get(native)
    }

    /// All native pairs with a known decomposition.
    #[must_use]
    pub const fn parsed_symbols(&self) -> &HashMap<String, Pair> {
        &self.parsed
    }

    /// Unique tickers.
    #[must_use]
    pub const fn tickers(&self) -> &HashSet<String> {
        &self.tickers
    }

    /// Native pair strings.
    #[must_use]
    pub const fn pairs(&self) -> &HashSet<String> {
        &self.pairs
    }

    /// When the snapshot was built; `None` if never populated.
    #[must_use]
    pub const fn refreshed_at(&self) -> Option<Instant> {
        self.refreshed_at
    }

    /// Whether a refresh has ever succeeded.
    #[must_use]
    pub const fn is_populated(&self) -> bool {
        self.refreshed_at.is_some()
    }

    /// Whether more than `ttl` has passed since the refresh at `now`.
    #[must_use]
    pub fn is_stale(&self, ttl: Duration, now: Instant) -> bool {
        self.refreshed_at
            .is_none_or(|at| now.saturating_duration_since(at) > ttl)
    }
}

// =============================================================================
// Namespace
// =============================================================================

type RefreshFuture = Shared<BoxFuture<'static, Result<Arc<SymbolSnapshot>, CacheError>>>;

/// Symbol cache for a single venue.
pub struct SymbolNamespace {
    venue_id: String,
    source: Arc<dyn MetadataSource>,
    ttl: Duration,
    snapshot: RwLock<Arc<SymbolSnapshot>>,
    in_flight: Mutex<Option<RefreshFuture>>,
}

impl std::fmt::Debug for SymbolNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolNamespace")
            .field("venue_id", &self.venue_id)
            .field("ttl", &self.ttl)
            .field("pairs", &self.snapshot.read().parsed.len())
            .finish_non_exhaustive()
    }
}

impl SymbolNamespace {
    /// Create an unpopulated namespace.
    #[must_use]
    pub fn new(venue_id: impl Into<String>, source: Arc<dyn MetadataSource>, ttl: Duration) -> Self {
        Self {
            venue_id: venue_id.into(),
            source,
            ttl,
            snapshot: RwLock::new(Arc::new(SymbolSnapshot::empty())),
            in_flight: Mutex::new(None),
        }
    }

    /// Venue id.
    #[must_use]
    pub fn venue_id(&self) -> &str {
        &self.venue_id
    }

    /// Freshness window.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current snapshot. Never performs I/O.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SymbolSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Whether a refresh is currently running.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Return a usable snapshot, starting a background refresh if stale.
    ///
    /// A stale but populated snapshot is returned without waiting. Only a
    /// namespace that has never been populated waits for the refresh.
    pub async fn ensure_fresh(self: &Arc<Self>) -> Result<Arc<SymbolSnapshot>, CacheError> {
        let current = self.snapshot();
        if !current.is_stale(self.ttl, Instant::now()) {
            return Ok(current);
        }

        let refresh = self.start_refresh();
        if current.is_populated() {
            tracing::debug!(venue = %self.venue_id, "Serving stale symbol snapshot");
            return Ok(current);
        }

        refresh.await
    }

    /// Refresh now, or join the refresh already in flight.
    pub async fn refresh(self: &Arc<Self>) -> Result<Arc<SymbolSnapshot>, CacheError> {
        self.start_refresh().await
    }

    fn start_refresh(self: &Arc<Self>) -> RefreshFuture {
        let mut in_flight = self.in_flight.lock();
        if let Some(refresh) = in_flight.as_ref() {
            return refresh.clone();
        }

        tracing::debug!(venue = %self.venue_id, "Starting symbol refresh");
        let this = Arc::clone(self);
        let venue = self.venue_id.clone();
        let task = tokio::spawn(async move { this.run_refresh().await });

        let refresh = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(CacheError::Aborted {
                    venue,
                    reason: e.to_string(),
                }),
            }
        }
        .boxed()
        .shared();

        *in_flight = Some(refresh.clone());
        refresh
    }

    async fn run_refresh(&self) -> Result<Arc<SymbolSnapshot>, CacheError> {
        let result = match self.source.fetch_markets().await {
            Ok(listing) => {
                let snapshot = Arc::new(SymbolSnapshot::from_listing(listing, Instant::now()));
                *self.snapshot.write() = Arc::clone(&snapshot);
                tracing::info!(
                    venue = %self.venue_id,
                    tickers = snapshot.tickers.len(),
                    pairs = snapshot.parsed.len(),
                    "Symbol cache refreshed"
                );
                metrics::record_cache_refresh(&self.venue_id, true);
                Ok(snapshot)
            }
            Err(source) => {
                tracing::warn!(venue = %self.venue_id, error = %source, "Symbol refresh failed");
                metrics::record_cache_refresh(&self.venue_id, false);
                Err(CacheError::Fetch {
                    venue: self.venue_id.clone(),
                    source,
                })
            }
        };

        *self.in_flight.lock() = None;
        result
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Process-wide map of venue id to symbol namespace.
///
/// Owned by the runtime and injected into clients; clients for the same venue
/// share one namespace.
#[derive(Debug)]
pub struct SymbolRegistry {
    ttl: Duration,
    namespaces: RwLock<HashMap<String, Arc<SymbolNamespace>>>,
}

impl Default for SymbolRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl SymbolRegistry {
    /// Create an empty registry whose namespaces use `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Namespace for `venue_id`, created on first access.
    ///
    /// `source` is only used when the namespace does not exist yet.
    pub fn namespace(
        &self,
        venue_id: &str,
        source: Arc<dyn MetadataSource>,
    ) -> Arc<SymbolNamespace> {
        if let Some(namespace) = self.namespaces.read().get(venue_id) {
            return Arc::clone(namespace);
        }

        let mut namespaces = self.namespaces.write();
        Arc::clone(namespaces.entry(venue_id.to_string()).or_insert_with(|| {
            tracing::debug!(venue = venue_id, "Creating symbol namespace");
            Arc::new(SymbolNamespace::new(venue_id, source, self.ttl))
        }))
    }

    /// Existing namespace for `venue_id`.
    #[must_use]
    pub fn get(&self, venue_id: &str) -> Option<Arc<SymbolNamespace>> {
        self.namespaces.read().get(venue_id).cloned()
    }

    /// Number of namespaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.namespaces.read().len()
    }

    /// Whether no namespace has been created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.namespaces.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::MockMetadataSource;

    fn listing() -> MarketListing {
        MarketListing::from_rows([
            ("BTCUSDT", "BTC", "USDT"),
            ("ETHUSDT", "ETH", "USDT"),
            ("ETHBTC", "ETH", "BTC"),
        ])
    }

    /// Counts fetches and holds each one open for a moment.
    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MetadataSource for CountingSource {
        async fn fetch_markets(&self) -> Result<MarketListing, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(listing())
        }
    }

    fn counting() -> Arc<CountingSource> {
        Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn decomposes_listing() {
        let snapshot = SymbolSnapshot::from_listing(listing(), Instant::now());
        assert_eq!(snapshot.parsed("BTCUSDT"), Some(&Pair::new("BTC", "USDT")));
        assert_eq!(snapshot.parsed("ETHBTC"), Some(&Pair::new("ETH", "BTC")));
        assert_eq!(snapshot.parsed("XRPUSDT"), None);
        assert_eq!(snapshot.parsed_symbols().len(), 3);
    }

    #[test]
    fn longest_base_wins() {
        let listing = MarketListing {
            tickers: ["AB", "ABC", "CD", "D"].map(String::from).into(),
            pairs: ["ABCD"].map(String::from).into(),
        };
        let snapshot = SymbolSnapshot::from_listing(listing, Instant::now());
        assert_eq!(snapshot.parsed("ABCD"), Some(&Pair::new("ABC", "D")));
    }

    #[test]
    fn pair_without_known_remainder_is_skipped() {
        let listing = MarketListing {
            tickers: ["BTC", "USDT"].map(String::from).into(),
            pairs: ["BTCUSDC"].map(String::from).into(),
        };
        let snapshot = SymbolSnapshot::from_listing(listing, Instant::now());
        assert!(snapshot.parsed_symbols().is_empty());
    }

    #[test]
    fn empty_snapshot_is_stale() {
        let snapshot = SymbolSnapshot::empty();
        assert!(!snapshot.is_populated());
        assert!(snapshot.is_stale(Duration::from_secs(3600), Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_expires_only_after_ttl() {
        let ttl = Duration::from_secs(60);
        let refreshed_at = Instant::now();
        let snapshot = SymbolSnapshot::from_listing(listing(), refreshed_at);

        assert!(!snapshot.is_stale(ttl, refreshed_at + ttl));
        assert!(snapshot.is_stale(ttl, refreshed_at + ttl + Duration::from_millis(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn revalidation_starts_just_past_ttl() {
        let source = counting();
        let ttl = Duration::from_secs(60);
        let namespace = Arc::new(SymbolNamespace::new("binance", source.clone(), ttl));
        namespace.ensure_fresh().await.unwrap();

        tokio::time::advance(ttl).await;
        namespace.ensure_fresh().await.unwrap();
        assert!(!namespace.is_refreshing());

        tokio::time::advance(Duration::from_millis(1)).await;
        namespace.ensure_fresh().await.unwrap();
        assert!(namespace.is_refreshing());

        namespace.refresh().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let source = counting();
        let namespace = Arc::new(SymbolNamespace::new(
            "binance",
            source.clone(),
            DEFAULT_CACHE_TTL,
        ));

        let results =
            futures::future::join_all((0..8).map(|_| namespace.ensure_fresh())).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        for result in results {
            let snapshot = result.unwrap();
            assert_eq!(snapshot.parsed("BTCUSDT"), Some(&Pair::new("BTC", "USDT")));
        }
        assert!(!namespace.is_refreshing());
    }

    #[tokio::test]
    async fn fresh_snapshot_skips_fetch() {
        let source = counting();
        let namespace = Arc::new(SymbolNamespace::new(
            "binance",
            source.clone(),
            DEFAULT_CACHE_TTL,
        ));

        let first = namespace.ensure_fresh().await.unwrap();
        let second = namespace.ensure_fresh().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_snapshot_served_while_revalidating() {
        let source = counting();
        let ttl = Duration::from_secs(60);
        let namespace = Arc::new(SymbolNamespace::new("binance", source.clone(), ttl));

        let first = namespace.ensure_fresh().await.unwrap();
        tokio::time::advance(ttl + Duration::from_secs(1)).await;

        let stale = namespace.ensure_fresh().await.unwrap();
        assert!(Arc::ptr_eq(&first, &stale));
        assert!(namespace.is_refreshing());

        let refreshed = namespace.refresh().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &refreshed));
        assert!(Arc::ptr_eq(&refreshed, &namespace.snapshot()));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_propagates_and_clears_in_flight() {
        let mut source = MockMetadataSource::new();
        source.expect_fetch_markets().times(2).returning(|| {
            Err(FetchError::Status {
                status: 503,
                body: "unavailable".to_string(),
            })
        });

        let namespace = Arc::new(SymbolNamespace::new(
            "binance",
            Arc::new(source),
            DEFAULT_CACHE_TTL,
        ));

        let err = namespace.ensure_fresh().await.unwrap_err();
        assert!(matches!(
            err,
            CacheError::Fetch {
                source: FetchError::Status { status: 503, .. },
                ..
            }
        ));
        assert!(!namespace.is_refreshing());

        // Next call fetches again instead of reusing the failed refresh.
        assert!(namespace.ensure_fresh().await.is_err());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        let mut source = MockMetadataSource::new();
        let mut seq = mockall::Sequence::new();
        source
            .expect_fetch_markets()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(listing()));
        source
            .expect_fetch_markets()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(FetchError::Timeout));

        let namespace = Arc::new(SymbolNamespace::new(
            "binance",
            Arc::new(source),
            DEFAULT_CACHE_TTL,
        ));

        let populated = namespace.refresh().await.unwrap();
        assert!(namespace.refresh().await.is_err());
        assert!(Arc::ptr_eq(&populated, &namespace.snapshot()));
    }

    #[test]
    fn registry_shares_namespaces_per_venue() {
        let registry = SymbolRegistry::default();
        let a = registry.namespace("binance", counting());
        let b = registry.namespace("binance", counting());
        let c = registry.namespace("kraken", counting());

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
        assert!(registry.get("coinbase").is_none());
    }
}
