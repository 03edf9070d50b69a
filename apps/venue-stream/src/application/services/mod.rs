//! Application Services
//!
//! Symbol metadata caching and native symbol resolution. Both depend only on
//! the port traits, never on a concrete venue.

pub mod resolver;
pub mod symbols;

pub use resolver::{CacheDesyncWarning, Resolution, ResolveError, SymbolResolver};
pub use symbols::{CacheError, DEFAULT_CACHE_TTL, SymbolNamespace, SymbolRegistry, SymbolSnapshot};
