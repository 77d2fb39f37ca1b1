//! Store abstraction consumed by the engine
//!
//! The durable store is an external collaborator. The engine needs two
//! things from it: a stream of change notifications and a point lookup
//! by key. `MemoryStore` is an in-process implementation used by the
//! gateway and by tests.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use types::errors::StoreError;
use types::record::{RawRecord, RecordKey};

/// Kind of change reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Created,
    Updated,
    Replaced,
    Deleted,
}

impl ChangeOp {
    /// Whether the engine republishes this kind of change.
    ///
    /// Deletions are not propagated to clients.
    pub fn is_forwarded(&self) -> bool {
        matches!(self, ChangeOp::Created | ChangeOp::Updated | ChangeOp::Replaced)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChangeOp::Created => "created",
            ChangeOp::Updated => "updated",
            ChangeOp::Replaced => "replaced",
            ChangeOp::Deleted => "deleted",
        }
    }
}

/// A notification that a record may have changed.
///
/// Carries no record body; the ingester looks the record up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub op: ChangeOp,
    pub key: RecordKey,
}

impl ChangeEvent {
    pub fn new(op: ChangeOp, key: impl Into<RecordKey>) -> Self {
        Self {
            op,
            key: key.into(),
        }
    }
}

/// Unbounded stream of change notifications. The end of the stream, or any
/// `Err` item other than [`StoreError::Lagged`], means the subscription is
/// gone.
pub type ChangeStream = BoxStream<'static, Result<ChangeEvent, StoreError>>;

/// Read-side primitives of the record store.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Subscribe to change notifications.
    async fn subscribe(&self) -> Result<ChangeStream, StoreError>;

    /// Current document for `key`, or `None` if it does not exist.
    async fn find(&self, key: &RecordKey) -> Result<Option<RawRecord>, StoreError>;
}

/// Default broadcast buffer for change subscribers.
pub const DEFAULT_CHANGE_BUFFER: usize = 4096;

/// In-memory record store with change notifications.
pub struct MemoryStore {
    records: DashMap<RecordKey, RawRecord>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANGE_BUFFER)
    }

    /// Create a store whose subscribers may lag by at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            records: DashMap::new(),
            changes,
        }
    }

    /// Insert or update a record. Emits `Created` or `Updated`.
    pub fn insert(&self, key: impl Into<RecordKey>, record: RawRecord) -> ChangeOp {
        let key = key.into();
        let op = match self.records.insert(key.clone(), record) {
            Some(_) => ChangeOp::Updated,
            None => ChangeOp::Created,
        };
        self.publish(ChangeEvent { op, key });
        op
    }

    /// Replace a record wholesale. Emits `Replaced`.
    pub fn replace(&self, key: impl Into<RecordKey>, record: RawRecord) {
        let key = key.into();
        self.records.insert(key.clone(), record);
        self.publish(ChangeEvent {
            op: ChangeOp::Replaced,
            key,
        });
    }

    /// Remove a record. Emits `Deleted` if it existed.
    pub fn remove(&self, key: impl Into<RecordKey>) -> Option<RawRecord> {
        let key = key.into();
        let removed = self.records.remove(&key).map(|(_, record)| record);
        if removed.is_some() {
            self.publish(ChangeEvent {
                op: ChangeOp::Deleted,
                key,
            });
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn publish(&self, event: ChangeEvent) {
        // No receivers is fine: nobody is subscribed yet.
        if self.changes.send(event.clone()).is_err() {
            debug!(key = %event.key, op = event.op.label(), "No change subscribers");
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn subscribe(&self) -> Result<ChangeStream, StoreError> {
        let rx = self.changes.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(event) => Some((Ok(event), rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Change subscriber lagged");
                    Some((Err(StoreError::Lagged { skipped }), rx))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        Ok(stream.boxed())
    }

    async fn find(&self, key: &RecordKey) -> Result<Option<RawRecord>, StoreError> {
        Ok(self.records.get(key).map(|entry| entry.value().clone()))
    }
}
