//! Stream Connection
//!
//! Lifecycle of one transport socket: `Closed → Opening → Open → Closing →
//! Closed`. While open, a pump task forwards inbound frames to the consumer,
//! drives the keep-alive and closes the connection on fatal transport errors.
//!
//! # Guarantees
//!
//! - `open` resolves exactly once per call, with the event receiver or an error.
//! - `send` fails synchronously unless the state is [`ConnectionState::Open`].
//! - `close` is idempotent and safe from any state, including while `open` is
//!   still waiting for the handshake.
//! - The event receiver always ends with [`TransportEvent::Closed`].

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use crate::application::ports::{
    Frame, Transport, TransportError, TransportEvent, TransportEvents,
};

/// Capacity of the channel between the pump and the consumer.
const EVENT_BUFFER: usize = 1024;

// =============================================================================
// State & Errors
// =============================================================================

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket.
    Closed,
    /// Handshake in progress.
    Opening,
    /// Socket usable.
    Open,
    /// Tear-down in progress.
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Closing => "closing",
        })
    }
}

/// Connection misuse and handshake failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// Operation needs an open connection.
    #[error("connection is {state}, not open")]
    NotOpen {
        /// State at the time of the call.
        state: ConnectionState,
    },

    /// `open` called while not closed.
    #[error("connection is already {state}")]
    AlreadyOpen {
        /// State at the time of the call.
        state: ConnectionState,
    },

    /// `close` was called before the handshake finished.
    #[error("connection closed during handshake")]
    Closed,

    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug)]
struct Lifecycle {
    state: ConnectionState,
    generation: u64,
    session: Option<CancellationToken>,
}

impl Lifecycle {
    fn close_if_current(&mut self, generation: u64) -> bool {
        if self.generation != generation || self.state == ConnectionState::Closed {
            return false;
        }
        self.state = ConnectionState::Closed;
        self.session = None;
        true
    }
}

// =============================================================================
// Stream Connection
// =============================================================================

/// One managed transport socket.
pub struct StreamConnection {
    transport: Arc<dyn Transport>,
    heartbeat: HeartbeatConfig,
    ping: Frame,
    lifecycle: Arc<Mutex<Lifecycle>>,
}

impl fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConnection")
            .field("state", &self.state())
            .field("heartbeat", &self.heartbeat)
            .finish_non_exhaustive()
    }
}

impl StreamConnection {
    /// Wrap a transport. `ping` is sent every heartbeat interval while open.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, heartbeat: HeartbeatConfig, ping: Frame) -> Self {
        Self {
            transport,
            heartbeat,
            ping,
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                state: ConnectionState::Closed,
                generation: 0,
                session: None,
            })),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.lifecycle.lock().state
    }

    /// Whether the connection is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Perform the handshake.
    ///
    /// On success the returned receiver carries inbound frames and
    /// non-fatal errors, and ends with `Closed`.
    pub async fn open(&self) -> Result<TransportEvents, ConnectionError> {
        let generation = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != ConnectionState::Closed {
                return Err(ConnectionError::AlreadyOpen {
                    state: lifecycle.state,
                });
            }
            lifecycle.state = ConnectionState::Opening;
            lifecycle.generation += 1;
            lifecycle.generation
        };

        tracing::debug!(generation, "Opening stream connection");

        let inbound = match self.transport.open().await {
            Ok(inbound) => inbound,
            Err(e) => {
                self.lifecycle.lock().close_if_current(generation);
                tracing::warn!(error = %e, "Stream handshake failed");
                return Err(e.into());
            }
        };

        let session = CancellationToken::new();
        let promoted = {
            let mut lifecycle = self.lifecycle.lock();
            let current = lifecycle.generation == generation
                && lifecycle.state == ConnectionState::Opening;
            if current {
                lifecycle.state = ConnectionState::Open;
                lifecycle.session = Some(session.clone());
            }
            current
        };

        if !promoted {
            tracing::debug!(generation, "Connection closed during handshake");
            self.transport.close().await;
            return Err(ConnectionError::Closed);
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let pump = Pump {
            transport: Arc::clone(&self.transport),
            ping: self.ping.clone(),
            lifecycle: Arc::clone(&self.lifecycle),
            generation,
            liveness: Arc::new(HeartbeatState::new()),
            events: events_tx,
            cancel: session,
        };
        tokio::spawn(pump.run(inbound, self.heartbeat.clone()));

        tracing::info!(generation, "Stream connection open");
        Ok(events_rx)
    }

    /// Send a frame; fails immediately unless open.
    pub fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        let state = self.state();
        if state != ConnectionState::Open {
            return Err(ConnectionError::NotOpen { state });
        }
        self.transport.send(frame).map_err(ConnectionError::from)
    }

    /// Close the connection and stop the keep-alive.
    pub async fn close(&self) {
        let session = {
            let mut lifecycle = self.lifecycle.lock();
            match lifecycle.state {
                ConnectionState::Closed | ConnectionState::Closing => return,
                ConnectionState::Opening => {
                    // The pending open sees the bumped generation and backs out.
                    lifecycle.generation += 1;
                    lifecycle.state = ConnectionState::Closed;
                    return;
                }
                ConnectionState::Open => {
                    lifecycle.state = ConnectionState::Closing;
                    lifecycle.session.take()
                }
            }
        };

        if let Some(session) = session {
            session.cancel();
        }
        self.transport.close().await;

        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == ConnectionState::Closing {
            lifecycle.state = ConnectionState::Closed;
        }
        tracing::info!("Stream connection closed");
    }
}

// =============================================================================
// Pump
// =============================================================================

struct Pump {
    transport: Arc<dyn Transport>,
    ping: Frame,
    lifecycle: Arc<Mutex<Lifecycle>>,
    generation: u64,
    liveness: Arc<HeartbeatState>,
    events: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
}

impl Pump {
    async fn run(self, mut inbound: TransportEvents, heartbeat: HeartbeatConfig) {
        let (beat_tx, mut beat_rx) = mpsc::channel(8);
        let heartbeat_cancel = self.cancel.child_token();
        tokio::spawn(
            HeartbeatManager::new(
                heartbeat,
                Arc::clone(&self.liveness),
                beat_tx,
                heartbeat_cancel.clone(),
            )
            .run(),
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                Some(beat) = beat_rx.recv() => match beat {
                    HeartbeatEvent::Ping => {
                        self.liveness.record_ping();
                        if let Err(e) = self.transport.send(self.ping.clone()) {
                            tracing::debug!(error = %e, "Failed to queue ping");
                        }
                    }
                    HeartbeatEvent::Expired(silence) => {
                        self.fail(TransportError::HeartbeatTimeout(silence)).await;
                        break;
                    }
                },
                event = inbound.recv() => match event {
                    Some(TransportEvent::Message(frame)) => {
                        self.liveness.record_inbound();
                        if matches!(frame, Frame::Pong | Frame::Ping) {
                            continue;
                        }
                        if self.events.send(TransportEvent::Message(frame)).await.is_err() {
                            tracing::debug!("Connection consumer dropped");
                            break;
                        }
                    }
                    Some(TransportEvent::Error(e)) if e.is_fatal() => {
                        self.fail(e).await;
                        break;
                    }
                    Some(TransportEvent::Error(e)) => {
                        let _ = self.events.send(TransportEvent::Error(e)).await;
                    }
                    Some(TransportEvent::Closed) | None => {
                        tracing::info!("Stream closed by remote");
                        self.lifecycle.lock().close_if_current(self.generation);
                        break;
                    }
                },
            }
        }

        heartbeat_cancel.cancel();
        let _ = self.events.send(TransportEvent::Closed).await;
    }

    async fn fail(&self, error: TransportError) {
        tracing::warn!(error = %error, "Stream transport failed");
        let _ = self.events.send(TransportEvent::Error(error)).await;

        let closed = self.lifecycle.lock().close_if_current(self.generation);
        if closed {
            self.transport.close().await;
        }
    }
}
