//! Interest Registry: which record keys each connection is viewing.
//!
//! An interest set is replaced wholesale on every declaration, never merged.
//! Sets are stored behind `Arc` so the router can take a cheap snapshot of
//! the latest committed set without holding a map guard across an await.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use types::ids::ConnectionId;
use types::record::RecordKey;

/// A connection's interest set.
pub type InterestSet = HashSet<RecordKey>;

/// Per-connection interest sets.
#[derive(Debug, Default)]
pub struct InterestRegistry {
    interests: DashMap<ConnectionId, Arc<InterestSet>>,
}

impl InterestRegistry {
    pub fn new() -> Self {
        Self {
            interests: DashMap::new(),
        }
    }

    /// Replace the interest set for `connection_id`. Last call wins.
    ///
    /// An empty set is valid and means "interested in nothing".
    pub fn set_interest(&self, connection_id: ConnectionId, keys: InterestSet) {
        let count = keys.len();
        self.interests.insert(connection_id, Arc::new(keys));
        debug!(connection_id = %connection_id, keys = count, "Interest set replaced");
    }

    /// Delete the entry for `connection_id`. No-op if absent.
    pub fn remove(&self, connection_id: &ConnectionId) {
        if self.interests.remove(connection_id).is_some() {
            debug!(connection_id = %connection_id, "Interest set removed");
        }
    }

    /// Current interest set, or empty if none is registered.
    pub fn interested_keys(&self, connection_id: &ConnectionId) -> InterestSet {
        self.snapshot(connection_id)
            .map(|keys| keys.as_ref().clone())
            .unwrap_or_default()
    }

    /// Shared handle to the latest committed set, without copying it.
    pub fn snapshot(&self, connection_id: &ConnectionId) -> Option<Arc<InterestSet>> {
        self.interests
            .get(connection_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Whether `connection_id` currently wants updates for `key`.
    pub fn is_interested(&self, connection_id: &ConnectionId, key: &RecordKey) -> bool {
        self.interests
            .get(connection_id)
            .map(|entry| entry.contains(key))
            .unwrap_or(false)
    }

    /// Number of connections with a registered set.
    pub fn len(&self) -> usize {
        self.interests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interests.is_empty()
    }
}
