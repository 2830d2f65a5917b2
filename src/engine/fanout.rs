//! Session fanout
//!
//! Tracks connected observer sessions and delivers serialized messages to
//! them. Session ids are small integers, reusing the lowest free slot.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Identifier of a connected session
pub type SessionId = usize;

/// Outbound message channel of one session
pub type SessionSender = mpsc::UnboundedSender<Arc<str>>;

#[derive(Debug, Default)]
pub struct Fanout {
    sessions: BTreeMap<SessionId, SessionSender>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under the lowest free id
    pub fn join(&mut self, tx: SessionSender) -> SessionId {
        let mut id = 0;
        while self.sessions.contains_key(&id) {
            id += 1;
        }
        self.sessions.insert(id, tx);
        id
    }

    /// Returns false if the session was not registered
    pub fn leave(&mut self, id: SessionId) -> bool {
        self.sessions.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Deliver to a single session
    pub fn send_to(&self, id: SessionId, payload: Arc<str>) -> bool {
        self.sessions
            .get(&id)
            .is_some_and(|tx| tx.send(payload).is_ok())
    }

    /// Deliver to every session, returning the number of deliveries.
    /// Sessions whose receiver is gone are skipped until they leave.
    pub fn broadcast(&self, payload: &Arc<str>) -> usize {
        let mut delivered = 0;
        for (id, tx) in &self.sessions {
            if tx.send(Arc::clone(payload)).is_ok() {
                delivered += 1;
            } else {
                trace!(session = id, "Skipping closed session");
            }
        }
        delivered
    }
}
