//! Path-keyed request correlation
//!
//! The protocol carries no request identifier, so a `get` is matched to its
//! response by path alone. Waiters for a path queue up in FIFO order and are
//! all resolved by the next response on that path.

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;
use tracing::trace;

/// Completion side of a pending `get`. Dropping it fails the waiting caller.
pub type Waiter = oneshot::Sender<Value>;

/// Outstanding `get` requests keyed by path
#[derive(Debug, Default)]
pub struct Correlator {
    pending: HashMap<String, VecDeque<Waiter>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a waiter for the next response on `path`
    pub fn enqueue(&mut self, path: String, waiter: Waiter) {
        self.pending.entry(path).or_default().push_back(waiter);
    }

    /// Resolve every waiter queued for `path` with `data`, oldest first, and
    /// forget the path. Returns how many waiters were resolved.
    ///
    /// Several `get`s for one path issued before any response all receive the
    /// same (first arriving) response.
    pub fn resolve(&mut self, path: &str, data: &Value) -> usize {
        let Some(waiters) = self.pending.remove(path) else {
            return 0;
        };

        let count = waiters.len();
        for waiter in waiters {
            // The caller may have given up
            let _ = waiter.send(data.clone());
        }
        trace!(path, count, "Resolved pending requests");
        count
    }

    /// Number of paths with outstanding requests
    pub fn pending_paths(&self) -> usize {
        self.pending.len()
    }

    /// Number of waiters queued on `path`
    pub fn waiters(&self, path: &str) -> usize {
        self.pending.get(path).map_or(0, VecDeque::len)
    }
}
