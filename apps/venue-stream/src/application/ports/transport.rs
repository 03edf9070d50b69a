//! Transport Port
//!
//! Full-duplex message transport underneath a stream connection. Adapters
//! expose exactly open, close and send; inbound messages and errors arrive
//! on the event receiver returned by `open`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// One transport message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Transport-level keep-alive ping (outbound only).
    Ping,
    /// Transport-level keep-alive reply (inbound only).
    Pong,
}

impl Frame {
    /// Text payload, if this is a text frame.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) | Self::Ping | Self::Pong => None,
        }
    }
}

/// Events produced by an open transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Inbound message (`onMessage`).
    Message(Frame),
    /// Socket error (`onError`). See [`TransportError::is_fatal`].
    Error(TransportError),
    /// Remote closed the connection or the stream ended.
    Closed,
}

/// Receiver for transport events.
pub type TransportEvents = mpsc::Receiver<TransportEvent>;

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Handshake failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Socket read or write failed.
    #[error("socket error: {0}")]
    Socket(String),

    /// No open socket to write to.
    #[error("transport is not connected")]
    NotConnected,

    /// Inbound frame could not be decoded.
    #[error("undecodable frame: {0}")]
    Undecodable(String),

    /// No inbound traffic within the liveness window.
    #[error("heartbeat timeout after {0:?}")]
    HeartbeatTimeout(Duration),
}

impl TransportError {
    /// Whether the socket is unusable after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Undecodable(_))
    }
}

/// A full-duplex message transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the handshake and start delivering inbound events.
    async fn open(&self) -> Result<TransportEvents, TransportError>;

    /// Queue a frame for sending. Never blocks.
    fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Close the socket. Safe to call repeatedly.
    async fn close(&self);
}
