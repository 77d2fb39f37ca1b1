//! Observability counters for the fan-out engine
//!
//! Tracks ingestion outcomes, flush activity, delivery results and
//! connection counts. Everything is a relaxed atomic; the counters are
//! advisory and never gate behavior.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Core metrics for the fan-out engine.
#[derive(Debug, Default)]
pub struct FeedMetrics {
    // Ingestion
    pub events_received: AtomicU64,
    pub events_ignored: AtomicU64,
    pub changes_lagged: AtomicU64,
    pub lookups_dropped: AtomicU64,
    pub records_queued: AtomicU64,

    // Coalescing
    pub flushes: AtomicU64,
    pub records_flushed: AtomicU64,

    // Delivery
    pub deliveries: AtomicU64,
    pub deliveries_skipped: AtomicU64,
    pub heartbeats_sent: AtomicU64,

    // Connections
    pub connected_clients: AtomicU64,
}

impl FeedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change notification pulled from the store.
    pub fn record_event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a change notification that is not forwarded (deletions).
    pub fn record_event_ignored(&self) {
        self.events_ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// Record change notifications lost because ingestion fell behind.
    pub fn record_changes_lagged(&self, skipped: u64) {
        self.changes_lagged.fetch_add(skipped, Ordering::Relaxed);
    }

    /// Record a lookup that failed or found nothing.
    pub fn record_lookup_dropped(&self) {
        self.lookups_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a normalized record pushed into the coalescing queue.
    pub fn record_queued(&self) {
        self.records_queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a released batch.
    pub fn record_flush(&self, records: usize) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.records_flushed
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    /// Record a batch message handed to a connection.
    pub fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a delivery skipped (connection gone or send failed).
    pub fn record_delivery_skipped(&self) {
        self.deliveries_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Update connected client count.
    pub fn set_connected_clients(&self, count: u64) {
        self.connected_clients.store(count, Ordering::Relaxed);
    }

    /// Records that were overwritten inside a debounce window.
    pub fn records_coalesced(&self) -> u64 {
        let queued = self.records_queued.load(Ordering::Relaxed);
        let flushed = self.records_flushed.load(Ordering::Relaxed);
        queued.saturating_sub(flushed)
    }

    /// Export metrics as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("events_received".to_string(), self.events_received.load(Ordering::Relaxed));
        m.insert("events_ignored".to_string(), self.events_ignored.load(Ordering::Relaxed));
        m.insert("changes_lagged".to_string(), self.changes_lagged.load(Ordering::Relaxed));
        m.insert("lookups_dropped".to_string(), self.lookups_dropped.load(Ordering::Relaxed));
        m.insert("records_queued".to_string(), self.records_queued.load(Ordering::Relaxed));
        m.insert("flushes".to_string(), self.flushes.load(Ordering::Relaxed));
        m.insert("records_flushed".to_string(), self.records_flushed.load(Ordering::Relaxed));
        m.insert("deliveries".to_string(), self.deliveries.load(Ordering::Relaxed));
        m.insert("deliveries_skipped".to_string(), self.deliveries_skipped.load(Ordering::Relaxed));
        m.insert("heartbeats_sent".to_string(), self.heartbeats_sent.load(Ordering::Relaxed));
        m.insert("connected_clients".to_string(), self.connected_clients.load(Ordering::Relaxed));
        m
    }
}
