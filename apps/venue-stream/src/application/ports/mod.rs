//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Transport`: Full-duplex socket underneath a stream connection
//! - `VenueDialect`: Venue-specific stream wire format
//! - `MetadataSource`: Venue market listing (tickers and pairs)
//! - `HistorySource`: Historical candles and trades

mod dialect;
mod rest;
mod transport;

pub use dialect::{
    CandleSupport, CodecError, Command, Decoded, Inbound, Push, RawCandle, StreamKind,
    VenueDialect, VenueError,
};
pub use rest::{FetchError, HistorySource, MarketListing, MetadataSource};
pub use transport::{Frame, Transport, TransportError, TransportEvent, TransportEvents};

#[cfg(test)]
pub use rest::{MockHistorySource, MockMetadataSource};
