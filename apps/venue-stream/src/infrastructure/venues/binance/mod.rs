//! Binance-Style Venue
//!
//! Stream dialect plus REST metadata and history adapters for venues speaking
//! the Binance spot protocol.

mod dialect;
mod messages;
mod rest;

pub use dialect::{BinanceDialect, VENUE_ID};
pub use rest::BinanceRest;
