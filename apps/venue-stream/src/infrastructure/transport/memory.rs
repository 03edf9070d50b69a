//! In-Process Transport
//!
//! A [`MemoryTransport`] paired with a [`VenueHandle`] that plays the venue:
//! it sees every frame the client sends and injects inbound frames, errors
//! and disconnects. Used by tests and for replaying recorded sessions.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::application::ports::{Frame, Transport, TransportError, TransportEvent, TransportEvents};

const INBOUND_BUFFER: usize = 1024;

#[derive(Debug)]
struct Link {
    outbound: mpsc::UnboundedSender<Frame>,
    inbound: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    refusals: AtomicU32,
    opens: AtomicU32,
}

/// Client side of an in-process transport.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    link: Arc<Link>,
}

/// Venue side of an in-process transport.
#[derive(Debug)]
pub struct VenueHandle {
    link: Arc<Link>,
    sent: mpsc::UnboundedReceiver<Frame>,
}

impl MemoryTransport {
    /// Create a connected client/venue pair.
    #[must_use]
    pub fn pair() -> (Self, VenueHandle) {
        let (outbound, sent) = mpsc::unbounded_channel();
        let link = Arc::new(Link {
            outbound,
            inbound: Mutex::new(None),
            refusals: AtomicU32::new(0),
            opens: AtomicU32::new(0),
        });
        (
            Self {
                link: Arc::clone(&link),
            },
            VenueHandle { link, sent },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self) -> Result<TransportEvents, TransportError> {
        let refused = self
            .link
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        *self.link.inbound.lock() = Some(tx);
        self.link.opens.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }

    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.link.inbound.lock().is_none() {
            return Err(TransportError::NotConnected);
        }
        self.link
            .outbound
            .send(frame)
            .map_err(|_| TransportError::NotConnected)
    }

    async fn close(&self) {
        if let Some(inbound) = self.link.inbound.lock().take() {
            let _ = inbound.try_send(TransportEvent::Closed);
        }
    }
}

impl VenueHandle {
    /// Next frame sent by the client, including keep-alive pings.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.sent.recv().await
    }

    /// Next JSON text frame sent by the client, skipping pings.
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        loop {
            match self.sent.recv().await? {
                Frame::Text(text) => return serde_json::from_str(&text).ok(),
                Frame::Binary(_) | Frame::Ping | Frame::Pong => {}
            }
        }
    }

    /// Deliver a frame to the client. Returns `false` if not connected.
    pub async fn push(&self, frame: Frame) -> bool {
        let inbound = self.link.inbound.lock().clone();
        match inbound {
            Some(tx) => tx.send(TransportEvent::Message(frame)).await.is_ok(),
            None => false,
        }
    }

    /// Deliver a text frame.
    pub async fn push_text(&self, text: &str) -> bool {
        self.push(Frame::Text(text.to_string())).await
    }

    /// Deliver a JSON value as a text frame.
    pub async fn push_json(&self, value: &serde_json::Value) -> bool {
        self.push(Frame::Text(value.to_string())).await
    }

    /// Report a socket error to the client.
    pub async fn fail(&self, error: TransportError) -> bool {
        let inbound = self.link.inbound.lock().clone();
        match inbound {
            Some(tx) => tx.send(TransportEvent::Error(error)).await.is_ok(),
            None => false,
        }
    }

    /// Drop the connection from the venue side.
    pub fn disconnect(&self) {
        if let Some(inbound) = self.link.inbound.lock().take() {
            let _ = inbound.try_send(TransportEvent::Closed);
        }
    }

    /// Refuse the next `count` handshakes.
    pub fn refuse_opens(&self, count: u32) {
        self.link.refusals.store(count, Ordering::SeqCst);
    }

    /// Number of successful handshakes so far.
    #[must_use]
    pub fn opens(&self) -> u32 {
        self.link.opens.load(Ordering::SeqCst)
    }

    /// Whether the client currently holds an open link.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.link.inbound.lock().is_some()
    }
}
