//! Stream Engine
//!
//! Connection lifecycle, keep-alive, retry policy, request correlation and
//! the subscription multiplexer built on top of them.

pub mod connection;
pub mod heartbeat;
pub mod multiplexer;
pub mod pending;
pub mod reconnect;

pub use connection::{ConnectionError, ConnectionState, StreamConnection};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use multiplexer::{MultiplexerConfig, MultiplexerError, RequestError, SubscriptionMultiplexer};
pub use pending::{Completion, PendingTable};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
