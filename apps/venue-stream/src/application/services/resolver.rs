//! Symbol Resolver
//!
//! Converts venue-native pair strings to canonical pairs using the symbol
//! cache, and canonical pairs back to native strings using the venue's
//! [`SymbolStyle`].

use std::sync::Arc;

use super::symbols::{SymbolNamespace, SymbolSnapshot};
use crate::domain::symbol::{Pair, SymbolStyle};
use crate::infrastructure::metrics;

/// Native length for which the split-in-half fallback applies.
const HEURISTIC_LENGTH: usize = 6;

/// A native symbol absent from the cache that could not be guessed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("symbol {symbol:?} not found in {venue} symbol cache")]
pub struct ResolveError {
    /// Venue id.
    pub venue: String,
    /// Native symbol as received.
    pub symbol: String,
}

/// Recoverable miss: the pair was guessed by splitting at position 3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDesyncWarning {
    /// Native symbol as received.
    pub native: String,
    /// The guessed pair, possibly wrong.
    pub guess: Pair,
}

/// Outcome of a successful parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Canonical pair.
    pub pair: Pair,
    /// Present when the pair came from the fallback split.
    pub warning: Option<CacheDesyncWarning>,
}

/// Resolve `native` against one snapshot.
pub fn resolve(
    snapshot: &SymbolSnapshot,
    venue: &str,
    native: &str,
) -> Result<Resolution, ResolveError> {
    if let Some(pair) = snapshot.parsed(native) {
        return Ok(Resolution {
            pair: pair.clone(),
            warning: None,
        });
    }

    let chars: Vec<char> = native.chars().collect();
    if chars.len() == HEURISTIC_LENGTH {
        let base: String = chars[..3].iter().collect::<String>().to_uppercase();
        let quote: String = chars[3..].iter().collect::<String>().to_uppercase();
        let guess = Pair::new(base, quote);
        return Ok(Resolution {
            pair: guess.clone(),
            warning: Some(CacheDesyncWarning {
                native: native.to_string(),
                guess,
            }),
        });
    }

    Err(ResolveError {
        venue: venue.to_string(),
        symbol: native.to_string(),
    })
}

/// Resolver bound to a venue namespace and style.
#[derive(Debug, Clone)]
pub struct SymbolResolver {
    namespace: Arc<SymbolNamespace>,
    style: SymbolStyle,
}

impl SymbolResolver {
    /// Create a resolver.
    #[must_use]
    pub const fn new(namespace: Arc<SymbolNamespace>, style: SymbolStyle) -> Self {
        Self { namespace, style }
    }

    /// Parse a native symbol using the current snapshot.
    ///
    /// Heuristic fallbacks are logged and counted here; callers only need the
    /// returned warning if they want to surface it further.
    pub fn parse(&self, native: &str) -> Result<Resolution, ResolveError> {
        let venue = self.namespace.venue_id();
        let resolution = resolve(&self.namespace.snapshot(), venue, native)?;

        if let Some(warning) = &resolution.warning {
            tracing::warn!(
                venue,
                native = %warning.native,
                guess = %warning.guess,
                "Symbol missing from cache, using 3/3 split"
            );
            metrics::record_symbol_fallback(venue);
        }

        Ok(resolution)
    }

    /// Format a canonical pair natively.
    #[must_use]
    pub fn format(&self, pair: &Pair) -> String {
        self.style.format(pair)
    }

    /// Venue style.
    #[must_use]
    pub const fn style(&self) -> &SymbolStyle {
        &self.style
    }

    /// Underlying namespace.
    #[must_use]
    pub const fn namespace(&self) -> &Arc<SymbolNamespace> {
        &self.namespace
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tokio::time::Instant;

    use super::*;
    use crate::application::ports::MarketListing;

    fn snapshot() -> SymbolSnapshot {
        SymbolSnapshot::from_listing(
            MarketListing::from_rows([("BTCUSDT", "BTC", "USDT")]),
            Instant::now(),
        )
    }

    #[test]
    fn parses_cached_symbol() {
        let resolution = resolve(&snapshot(), "binance", "BTCUSDT").unwrap();
        assert_eq!(resolution.pair.to_string(), "BTC/USDT");
        assert!(resolution.warning.is_none());
    }

    #[test]
    fn six_char_miss_falls_back_with_warning() {
        let resolution = resolve(&snapshot(), "binance", "XYZXYZ").unwrap();
        assert_eq!(resolution.pair.to_string(), "XYZ/XYZ");
        let warning = resolution.warning.unwrap();
        assert_eq!(warning.native, "XYZXYZ");
        assert_eq!(warning.guess, Pair::new("XYZ", "XYZ"));
    }

    #[test]
    fn other_lengths_are_desync_errors() {
        let err = resolve(&snapshot(), "binance", "DOGEUSDT").unwrap_err();
        assert_eq!(err.symbol, "DOGEUSDT");
        assert_eq!(err.venue, "binance");
        assert!(resolve(&snapshot(), "binance", "").is_err());
    }

    fn ticker() -> impl Strategy<Value = String> {
        "[A-Z]{2,5}"
    }

    proptest! {
        #[test]
        fn format_inverts_parse(
            tickers in proptest::collection::hash_set(ticker(), 2..8),
            picks in proptest::collection::vec((any::<prop::sample::Index>(), any::<prop::sample::Index>()), 1..16),
        ) {
            let list: Vec<String> = tickers.iter().cloned().collect();
            let rows: Vec<(String, String, String)> = picks
                .iter()
                .map(|(a, b)| {
                    let base = a.get(&list).clone();
                    let quote = b.get(&list).clone();
                    (format!("{base}{quote}"), base, quote)
                })
                .collect();

            let snapshot = SymbolSnapshot::from_listing(MarketListing::from_rows(rows), Instant::now());
            let style = SymbolStyle::concatenated_upper();

            for native in snapshot.parsed_symbols().keys() {
                let resolution = resolve(&snapshot, "test", native).unwrap();
                prop_assert!(resolution.warning.is_none());
                prop_assert_eq!(&style.format(&resolution.pair), native);
            }
        }
    }
}
