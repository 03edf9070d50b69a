//! Keep-Alive
//!
//! Sends a venue ping at a fixed interval while a connection is open and
//! raises a timeout when nothing has been received for too long after a ping.
//! Any inbound frame counts as proof of life, not only pongs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Keep-alive timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between pings.
    pub ping_interval: Duration,
    /// Silence after a ping before the connection is declared dead.
    pub liveness_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            liveness_timeout: Duration::from_secs(90),
        }
    }
}

impl HeartbeatConfig {
    /// Create a configuration.
    #[must_use]
    pub const fn new(ping_interval: Duration, liveness_timeout: Duration) -> Self {
        Self {
            ping_interval,
            liveness_timeout,
        }
    }

    /// Build from stream settings.
    #[must_use]
    pub const fn from_settings(settings: &crate::StreamSettings) -> Self {
        Self::new(settings.heartbeat_interval, settings.heartbeat_timeout)
    }
}

/// What the connection pump should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send the venue ping frame.
    Ping,
    /// Nothing received for the contained duration since the last ping.
    Expired(Duration),
}

/// Liveness bookkeeping shared between the pump and the manager.
#[derive(Debug)]
pub struct HeartbeatState {
    last_inbound: Mutex<Instant>,
    awaiting_reply: AtomicBool,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Fresh state; the connection counts as alive now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_inbound: Mutex::new(Instant::now()),
            awaiting_reply: AtomicBool::new(false),
        }
    }

    /// Record any inbound frame.
    pub fn record_inbound(&self) {
        *self.last_inbound.lock() = Instant::now();
        self.awaiting_reply.store(false, Ordering::SeqCst);
    }

    /// Record that a ping went out.
    pub fn record_ping(&self) {
        self.awaiting_reply.store(true, Ordering::SeqCst);
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub fn awaiting_reply(&self) -> bool {
        self.awaiting_reply.load(Ordering::SeqCst)
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn silence(&self) -> Duration {
        self.last_inbound.lock().elapsed()
    }
}

/// Timer task driving pings and liveness checks for one connection.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    events: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        events: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            events,
            cancel,
        }
    }

    /// Run until cancelled, the event receiver goes away, or liveness expires.
    pub async fn run(self) {
        let start = Instant::now() + self.config.ping_interval;
        let mut ticker = tokio::time::interval_at(start, self.config.ping_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let next = self.tick();
                    if self.events.send(next).await.is_err() {
                        return;
                    }
                    if matches!(next, HeartbeatEvent::Expired(_)) {
                        return;
                    }
                }
            }
        }
    }

    fn tick(&self) -> HeartbeatEvent {
        let silence = self.state.silence();
        if self.state.awaiting_reply() && silence >= self.config.liveness_timeout {
            tracing::warn!(
                silence_secs = silence.as_secs(),
                timeout_secs = self.config.liveness_timeout.as_secs(),
                "Stream liveness timeout"
            );
            return HeartbeatEvent::Expired(silence);
        }
        HeartbeatEvent::Ping
    }
}
