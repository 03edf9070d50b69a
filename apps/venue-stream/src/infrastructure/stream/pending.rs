//! Correlation Table
//!
//! Outstanding control requests keyed by correlation id. Each slot is a
//! oneshot sender, so a request resolves at most once; removing the slot when
//! it is fulfilled, expired or failed makes it resolve exactly once.
//!
//! Slots are tagged with the connection session that issued them. When a
//! session's dispatch loop ends it fails only slots of that session or
//! earlier, never those of a session opened after it.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::RequestError;
use crate::infrastructure::metrics;

/// Result delivered to a waiting request.
pub type Outcome = Result<serde_json::Value, RequestError>;

/// How many of the most recent ids are remembered after timing out.
pub const EXPIRED_RETENTION: u64 = 4096;

/// What happened to an inbound response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// A waiting request received it.
    Delivered,
    /// The request had already timed out; the response is stale.
    Expired,
    /// No request ever used this id.
    Unknown,
}

#[derive(Debug)]
struct Slot {
    session: u64,
    tx: oneshot::Sender<Outcome>,
}

#[derive(Debug, Default)]
struct Slots {
    next_id: u64,
    session: u64,
    waiting: HashMap<u64, Slot>,
    /// Timed-out id → issuing session.
    expired: BTreeMap<u64, u64>,
}

/// Pending correlation slots.
#[derive(Debug, Default)]
pub struct PendingTable {
    slots: Mutex<Slots>,
}

impl PendingTable {
    /// Empty table; the first id handed out is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new session. Slots registered from now on belong to it.
    pub fn begin_session(&self) -> u64 {
        let mut slots = self.slots.lock();
        slots.session += 1;
        slots.session
    }

    /// Session new slots are tagged with.
    #[must_use]
    pub fn session(&self) -> u64 {
        self.slots.lock().session
    }

    /// Allocate the next id and its completion receiver.
    pub fn register(&self) -> (u64, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.slots.lock();
        slots.next_id += 1;
        let id = slots.next_id;
        let session = slots.session;
        slots.waiting.insert(id, Slot { session, tx });
        metrics::set_pending_requests(slots.waiting.len());
        (id, rx)
    }

    /// Drop a slot whose request was never sent.
    pub fn cancel(&self, id: u64) {
        let mut slots = self.slots.lock();
        slots.waiting.remove(&id);
        metrics::set_pending_requests(slots.waiting.len());
    }

    /// Drop a slot whose caller gave up waiting, remembering the id so a late
    /// response is not mistaken for a desync.
    ///
    /// Only the last [`EXPIRED_RETENTION`] ids are remembered.
    pub fn expire(&self, id: u64) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.waiting.remove(&id) {
            slots.expired.insert(id, slot.session);
            let floor = slots.next_id.saturating_sub(EXPIRED_RETENTION);
            if slots.expired.first_key_value().is_some_and(|(oldest, _)| *oldest <= floor) {
                slots.expired = slots.expired.split_off(&(floor + 1));
            }
        }
        metrics::set_pending_requests(slots.waiting.len());
    }

    /// Deliver a response to its slot.
    pub fn fulfill(&self, id: u64, outcome: Outcome) -> Completion {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.waiting.remove(&id) {
            metrics::set_pending_requests(slots.waiting.len());
            drop(slots);
            // The caller may have been dropped; the slot is consumed either way.
            let _ = slot.tx.send(outcome);
            return Completion::Delivered;
        }
        if slots.expired.remove(&id).is_some() {
            return Completion::Expired;
        }
        Completion::Unknown
    }

    /// Fail the waiting requests of `session` and every earlier session with
    /// `ConnectionClosed`, forgetting their expired ids. Returns how many
    /// requests failed.
    pub fn fail_through(&self, session: u64) -> usize {
        let drained: Vec<Slot> = {
            let mut slots = self.slots.lock();
            slots.expired.retain(|_, issued| *issued > session);
            let ids: Vec<u64> = slots
                .waiting
                .iter()
                .filter(|(_, slot)| slot.session <= session)
                .map(|(id, _)| *id)
                .collect();
            let drained = ids
                .into_iter()
                .filter_map(|id| slots.waiting.remove(&id))
                .collect();
            metrics::set_pending_requests(slots.waiting.len());
            drained
        };
        Self::fail(drained)
    }

    fn fail(drained: Vec<Slot>) -> usize {
        let count = drained.len();
        for slot in drained {
            let _ = slot.tx.send(Err(RequestError::ConnectionClosed));
        }
        count
    }

    /// Number of waiting requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().waiting.len()
    }

    /// Whether nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.lock().waiting.is_empty()
    }
}
