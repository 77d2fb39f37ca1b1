//! Change ingestion layer for the fan-out engine
//!
//! Pulls change notifications from the store, resolves each one to the
//! record's current document, normalizes it, and hands it to the
//! coalescing queue.
//!
//! Lookups that fail or find nothing are dropped: a later notification
//! for the same key supersedes them. Deletions are not forwarded. The end
//! of the change stream, or an error on it, is fatal to ingestion and is
//! returned to the caller.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, error, info, warn};
use types::errors::StoreError;

use crate::metrics::FeedMetrics;
use crate::queue::CoalescingQueue;
use crate::store::{ChangeEvent, ChangeStream, RecordStore};

/// Errors that stop ingestion.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IngestionError {
    #[error("change stream ended")]
    StreamEnded,

    #[error("change stream failed: {0}")]
    Stream(#[from] StoreError),
}

/// Result of ingesting a single change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionResult {
    /// Record resolved, normalized and queued.
    Queued,
    /// Operation is not forwarded (deletion).
    Ignored,
    /// Lookup failed or the record no longer exists.
    Dropped,
}

/// Resolves change notifications into normalized records.
pub struct ChangeIngester {
    store: Arc<dyn RecordStore>,
    queue: Arc<CoalescingQueue>,
    metrics: Arc<FeedMetrics>,
}

impl ChangeIngester {
    pub fn new(
        store: Arc<dyn RecordStore>,
        queue: Arc<CoalescingQueue>,
        metrics: Arc<FeedMetrics>,
    ) -> Self {
        Self {
            store,
            queue,
            metrics,
        }
    }

    /// Ingest a single change notification.
    pub async fn ingest(&self, event: ChangeEvent) -> IngestionResult {
        self.metrics.record_event_received();

        if !event.op.is_forwarded() {
            self.metrics.record_event_ignored();
            debug!(key = %event.key, op = event.op.label(), "Ignoring change");
            return IngestionResult::Ignored;
        }

        match self.store.find(&event.key).await {
            Ok(Some(raw)) => {
                let record = raw.normalize(event.key);
                debug!(key = %record.address, op = event.op.label(), "Record queued");
                self.queue.push(record);
                IngestionResult::Queued
            }
            Ok(None) => {
                self.metrics.record_lookup_dropped();
                debug!(
                    key = %event.key,
                    op = event.op.label(),
                    "Record vanished before lookup, dropping"
                );
                IngestionResult::Dropped
            }
            Err(e) => {
                self.metrics.record_lookup_dropped();
                warn!(key = %event.key, error = %e, "Record lookup failed, dropping");
                IngestionResult::Dropped
            }
        }
    }

    /// Consume `changes` until it ends or fails.
    ///
    /// A lagged subscriber is counted and keeps going; any other stream
    /// error is fatal.
    ///
    /// Events are resolved one at a time, so per-key order is preserved.
    /// Always returns an error: the stream is expected to be infinite.
    pub async fn run(&self, mut changes: ChangeStream) -> Result<(), IngestionError> {
        info!("ChangeIngester running");

        while let Some(item) = changes.next().await {
            match item {
                Ok(event) => {
                    self.ingest(event).await;
                }
                Err(StoreError::Lagged { skipped }) => {
                    // Lost keys stay stale until their next write.
                    self.metrics.record_changes_lagged(skipped);
                    warn!(skipped, "Change notifications skipped");
                }
                Err(e) => {
                    error!(error = %e, "Change subscription interrupted");
                    return Err(IngestionError::Stream(e));
                }
            }
        }

        warn!("Change stream ended");
        Err(IngestionError::StreamEnded)
    }
}
