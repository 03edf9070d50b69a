//! Transport Adapters
//!
//! Implementations of the [`Transport`](crate::application::ports::Transport)
//! port: a WebSocket client for real venues and an in-process pair for tests.

mod memory;
mod websocket;

pub use memory::{MemoryTransport, VenueHandle};
pub use websocket::WebSocketTransport;
