//! Venue Adapters
//!
//! Concrete [`VenueDialect`](crate::application::ports::VenueDialect) and REST
//! source implementations, one module per venue protocol.

pub mod binance;
