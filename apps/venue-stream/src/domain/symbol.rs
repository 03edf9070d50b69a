//! Trading Pair Symbols
//!
//! Canonical `BASE/QUOTE` pairs and the venue-facing formatting rules that
//! turn them into native pair strings such as `BTCUSDT` or `btc-usdt`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Separator used by canonical symbols.
pub const CANONICAL_SEPARATOR: char = '/';

// =============================================================================
// Pair
// =============================================================================

/// A canonical trading pair.
///
/// Displays as `BASE/QUOTE` regardless of venue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pair {
    /// Base asset ticker.
    pub base: String,
    /// Quote asset ticker.
    pub quote: String,
}

impl Pair {
    /// Create a pair from its two tickers.
    #[must_use]
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    /// Canonical `BASE/QUOTE` string.
    #[must_use]
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{CANONICAL_SEPARATOR}{}", self.base, self.quote)
    }
}

/// Error parsing a canonical symbol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid canonical symbol {0:?}: expected BASE/QUOTE")]
pub struct PairParseError(pub String);

impl FromStr for Pair {
    type Err = PairParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once(CANONICAL_SEPARATOR)
            .ok_or_else(|| PairParseError(s.to_string()))?;

        if base.is_empty() || quote.is_empty() || quote.contains(CANONICAL_SEPARATOR) {
            return Err(PairParseError(s.to_string()));
        }

        Ok(Self::new(base, quote))
    }
}

// =============================================================================
// Symbol Style
// =============================================================================

/// Letter case applied to native symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymbolCase {
    /// `BTCUSDT`
    #[default]
    Upper,
    /// `btcusdt`
    Lower,
    /// Tickers are emitted exactly as given.
    Preserve,
}

/// How a venue spells a pair natively.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SymbolStyle {
    /// Text placed between base and quote (empty for concatenated symbols).
    pub separator: String,
    /// Case convention.
    pub case: SymbolCase,
}

impl SymbolStyle {
    /// Concatenated upper-case style (`BTCUSDT`).
    #[must_use]
    pub fn concatenated_upper() -> Self {
        Self {
            separator: String::new(),
            case: SymbolCase::Upper,
        }
    }

    /// Concatenated lower-case style (`btcusdt`), common in stream names.
    #[must_use]
    pub fn concatenated_lower() -> Self {
        Self {
            separator: String::new(),
            case: SymbolCase::Lower,
        }
    }

    /// Style with an explicit separator.
    #[must_use]
    pub fn separated(separator: impl Into<String>, case: SymbolCase) -> Self {
        Self {
            separator: separator.into(),
            case,
        }
    }

    /// Format a canonical pair in this style.
    #[must_use]
    pub fn format(&self, pair: &Pair) -> String {
        let joined = format!("{}{}{}", pair.base, self.separator, pair.quote);
        match self.case {
            SymbolCase::Upper => joined.to_uppercase(),
            SymbolCase::Lower => joined.to_lowercase(),
            SymbolCase::Preserve => joined,
        }
    }
}
