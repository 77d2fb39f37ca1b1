//! End-to-end tests for the fan-out engine
//!
//! Drives a `MemoryStore` through a running `FeedEngine` with tokio's
//! paused clock, so debounce windows and liveness intervals are exact.
//!
//! Tests include:
//! - Debounce coalescing and last-write-wins
//! - Key isolation across connections
//! - Empty-interest silence
//! - Interest replacement racing a pending batch
//! - Disconnect cleanup
//! - A stalled connection alongside a healthy one
//! - Engine shutdown
//! - Subscription failure propagation

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use feed::ingestion::IngestionError;
use feed::store::ChangeStream;
use feed::{Connection, FeedConfig, FeedEngine, FeedError, FeedMessage, MemoryStore, RecordStore};
use futures::StreamExt;
use tokio::time::sleep;
use types::errors::{DeliveryError, StoreError};
use types::record::{RawRecord, Record, RecordKey};

#[derive(Default)]
struct TestConnection {
    closed: AtomicBool,
    sent: Mutex<Vec<FeedMessage>>,
}

impl TestConnection {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn batches(&self) -> Vec<Vec<Record>> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|msg| match msg {
                FeedMessage::Batch { updates } => Some(updates.clone()),
                FeedMessage::Heartbeat { .. } => None,
            })
            .collect()
    }

    fn heartbeats(&self) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.is_heartbeat())
            .count()
    }
}

#[async_trait]
impl Connection for TestConnection {
    fn is_live(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn send(&self, message: FeedMessage) -> Result<(), DeliveryError> {
        if !self.is_live() {
            return Err(DeliveryError::Closed);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

fn config() -> FeedConfig {
    FeedConfig {
        debounce_ms: 100,
        heartbeat_interval_ms: 30_000,
        send_timeout_ms: 50,
    }
}

fn keys(list: &[&str]) -> HashSet<RecordKey> {
    list.iter().map(|k| RecordKey::new(k)).collect()
}

fn priced(price: f64) -> RawRecord {
    RawRecord {
        price: Some(price),
        ..RawRecord::default()
    }
}

async fn start(store: &Arc<MemoryStore>) -> FeedEngine {
    let (engine, _task) = FeedEngine::start(store.clone(), config()).await.unwrap();
    engine
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_partial_record() {
    let store = Arc::new(MemoryStore::new());
    store.insert("0xAAA", RawRecord::default());
    let engine = start(&store).await;

    let conn = TestConnection::new();
    let guard = engine.connect(conn.clone()).unwrap();
    assert!(engine.set_interest(guard.id(), keys(&["0xAAA"])));
    sleep(Duration::from_millis(10)).await;

    // t=0: first update, t=40: second update
    store.insert("0xAAA", priced(1.5));
    sleep(Duration::from_millis(40)).await;
    store.insert("0xAAA", priced(1.7));

    // t=90: window still open
    sleep(Duration::from_millis(50)).await;
    assert!(conn.batches().is_empty());

    // t=110: flushed once
    sleep(Duration::from_millis(20)).await;
    let batches = conn.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);

    let record = &batches[0][0];
    assert_eq!(record.address.as_str(), "0xaaa");
    assert_eq!(record.price, 1.7);
    assert_eq!(record.market_cap, 0.0);
    assert_eq!(record.volume_24h, 0.0);
    assert_eq!(record.volume_1h, 0.0);
    assert_eq!(record.volume_6h, 0.0);
    assert_eq!(record.block_number, 0);

    // Nothing else arrives
    sleep(Duration::from_millis(500)).await;
    assert_eq!(conn.batches().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_debounce_coalesces_burst() {
    let store = Arc::new(MemoryStore::new());
    let engine = start(&store).await;

    let c1 = TestConnection::new();
    let c2 = TestConnection::new();
    let g1 = engine.connect(c1.clone()).unwrap();
    let g2 = engine.connect(c2.clone()).unwrap();
    engine.set_interest(g1.id(), keys(&["0xa"]));
    engine.set_interest(g2.id(), keys(&["0xa"]));

    for i in 1..=20 {
        store.insert("0xa", priced(i as f64));
        sleep(Duration::from_millis(2)).await;
    }
    sleep(Duration::from_millis(200)).await;

    for conn in [&c1, &c2] {
        let batches = conn.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].price, 20.0);
    }

    let metrics = engine.metrics().export();
    assert_eq!(metrics["flushes"], 1);
    assert_eq!(metrics["records_queued"], 20);
    assert_eq!(metrics["records_flushed"], 1);
}

#[tokio::test(start_paused = true)]
async fn test_key_isolation() {
    let store = Arc::new(MemoryStore::new());
    let engine = start(&store).await;

    let c1 = TestConnection::new();
    let c2 = TestConnection::new();
    let g1 = engine.connect(c1.clone()).unwrap();
    let g2 = engine.connect(c2.clone()).unwrap();
    engine.set_interest(g1.id(), keys(&["0xa"]));
    engine.set_interest(g2.id(), keys(&["0xb"]));

    store.insert("0xa", priced(1.0));
    store.insert("0xb", priced(2.0));
    sleep(Duration::from_millis(150)).await;

    let b1 = c1.batches();
    let b2 = c2.batches();
    assert_eq!(b1.len(), 1);
    assert_eq!(b2.len(), 1);
    assert_eq!(b1[0].len(), 1);
    assert_eq!(b1[0][0].address.as_str(), "0xa");
    assert_eq!(b2[0].len(), 1);
    assert_eq!(b2[0][0].address.as_str(), "0xb");
}

#[tokio::test(start_paused = true)]
async fn test_empty_interest_receives_nothing() {
    let store = Arc::new(MemoryStore::new());
    let engine = start(&store).await;

    let conn = TestConnection::new();
    let guard = engine.connect(conn.clone()).unwrap();
    engine.set_interest(guard.id(), HashSet::new());

    for key in ["0xa", "0xb", "0xc"] {
        store.insert(key, priced(1.0));
    }
    sleep(Duration::from_millis(150)).await;

    assert!(conn.batches().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_interest_replacement_applies_to_pending_batch() {
    let store = Arc::new(MemoryStore::new());
    let engine = start(&store).await;

    let conn = TestConnection::new();
    let guard = engine.connect(conn.clone()).unwrap();
    engine.set_interest(guard.id(), keys(&["0xa"]));

    store.insert("0xa", priced(1.0));
    store.insert("0xb", priced(2.0));
    sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.pending_len(), 2);

    // Viewport moves before the window closes
    engine.set_interest(guard.id(), keys(&["0xb"]));
    sleep(Duration::from_millis(150)).await;

    let batches = conn.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    assert_eq!(batches[0][0].address.as_str(), "0xb");
}

#[tokio::test(start_paused = true)]
async fn test_keys_match_case_insensitively() {
    let store = Arc::new(MemoryStore::new());
    let engine = start(&store).await;

    let conn = TestConnection::new();
    let guard = engine.connect(conn.clone()).unwrap();
    engine.set_interest(guard.id(), keys(&["0xABCDEF"]));

    store.insert("0xabcdef", priced(3.0));
    sleep(Duration::from_millis(150)).await;

    assert_eq!(conn.batches().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cleans_up() {
    let store = Arc::new(MemoryStore::new());
    let engine = start(&store).await;

    let conn = TestConnection::new();
    let guard = engine.connect(conn.clone()).unwrap();
    let id = guard.id();
    engine.set_interest(id, keys(&["0xa"]));

    sleep(Duration::from_secs(31)).await;
    assert_eq!(conn.heartbeats(), 1);

    guard.disconnect();
    assert!(engine.interested_keys(&id).is_empty());
    assert_eq!(engine.connection_count(), 0);
    assert!(!engine.set_interest(id, keys(&["0xa"])));

    store.insert("0xa", priced(1.0));
    sleep(Duration::from_secs(120)).await;

    assert_eq!(conn.heartbeats(), 1);
    assert!(conn.batches().is_empty());
    assert_eq!(engine.metrics().export()["connected_clients"], 0);
}

#[tokio::test(start_paused = true)]
async fn test_closed_connection_misses_flush() {
    let store = Arc::new(MemoryStore::new());
    let engine = start(&store).await;

    let conn = TestConnection::new();
    let guard = engine.connect(conn.clone()).unwrap();
    engine.set_interest(guard.id(), keys(&["0xa"]));
    conn.closed.store(true, Ordering::SeqCst);

    store.insert("0xa", priced(1.0));
    sleep(Duration::from_millis(150)).await;

    assert!(conn.batches().is_empty());
    assert_eq!(engine.metrics().export()["deliveries_skipped"], 1);
}

#[tokio::test(start_paused = true)]
async fn test_deletion_not_propagated() {
    let store = Arc::new(MemoryStore::new());
    store.insert("0xa", priced(1.0));
    let engine = start(&store).await;

    let conn = TestConnection::new();
    let guard = engine.connect(conn.clone()).unwrap();
    engine.set_interest(guard.id(), keys(&["0xa"]));

    store.remove("0xa");
    sleep(Duration::from_millis(150)).await;

    assert!(conn.batches().is_empty());
    assert_eq!(engine.metrics().export()["events_ignored"], 1);
}

/// Connection whose batch sends never complete.
struct StalledConnection;

#[async_trait]
impl Connection for StalledConnection {
    fn is_live(&self) -> bool {
        true
    }

    async fn send(&self, _message: FeedMessage) -> Result<(), DeliveryError> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_stalled_connection_does_not_delay_others() {
    let store = Arc::new(MemoryStore::new());
    let engine = start(&store).await;

    let stalled = engine.connect(Arc::new(StalledConnection)).unwrap();
    let healthy = TestConnection::new();
    let guard = engine.connect(healthy.clone()).unwrap();
    engine.set_interest(stalled.id(), keys(&["0xa"]));
    engine.set_interest(guard.id(), keys(&["0xa"]));

    for i in 1..=5 {
        store.insert("0xa", priced(i as f64));
        sleep(Duration::from_millis(200)).await;
    }

    let batches = healthy.batches();
    assert_eq!(batches.len(), 5);
    assert_eq!(batches[4][0].price, 5.0);

    let metrics = engine.metrics().export();
    assert_eq!(metrics["flushes"], 5);
    assert_eq!(metrics["deliveries"], 5);
    assert_eq!(metrics["deliveries_skipped"], 5);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_engine() {
    let store = Arc::new(MemoryStore::new());
    let (engine, task) = FeedEngine::start(store.clone(), config()).await.unwrap();

    let conn = TestConnection::new();
    let guard = engine.connect(conn.clone()).unwrap();
    let id = guard.id();
    engine.set_interest(id, keys(&["0xa"]));

    store.insert("0xa", priced(1.0));
    sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.pending_len(), 1);

    engine.shutdown();
    assert!(engine.is_shut_down());
    assert_eq!(engine.connection_count(), 0);
    assert_eq!(engine.pending_len(), 0);

    // Nothing new is accepted
    assert!(!engine.set_interest(id, keys(&["0xa"])));
    let late = TestConnection::new();
    assert!(matches!(
        engine.connect(late.clone()),
        Err(FeedError::ShutDown)
    ));
    assert_eq!(engine.connection_count(), 0);

    store.insert("0xa", priced(2.0));
    sleep(Duration::from_secs(60)).await;

    assert!(task.is_finished());
    assert_eq!(task.wait().await, Ok(()));
    assert!(conn.batches().is_empty());
    assert_eq!(late.heartbeats(), 0);
    assert_eq!(engine.metrics().export()["flushes"], 0);

    // Second call is a no-op
    engine.shutdown();
    drop(guard);
}

struct EndingStore;

#[async_trait]
impl RecordStore for EndingStore {
    async fn subscribe(&self) -> Result<ChangeStream, StoreError> {
        Ok(futures::stream::empty().boxed())
    }

    async fn find(&self, _key: &RecordKey) -> Result<Option<RawRecord>, StoreError> {
        Ok(None)
    }
}

struct OfflineStore;

#[async_trait]
impl RecordStore for OfflineStore {
    async fn subscribe(&self) -> Result<ChangeStream, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn find(&self, _key: &RecordKey) -> Result<Option<RawRecord>, StoreError> {
        Ok(None)
    }
}

#[tokio::test]
async fn test_subscription_end_is_surfaced() {
    let (_engine, task) = FeedEngine::start(Arc::new(EndingStore), config())
        .await
        .unwrap();

    assert_eq!(
        task.wait().await,
        Err(FeedError::SubscriptionInterrupted(IngestionError::StreamEnded))
    );
}

#[tokio::test]
async fn test_subscribe_failure_is_returned() {
    let result = FeedEngine::start(Arc::new(OfflineStore), config()).await;
    assert!(matches!(result, Err(FeedError::Subscribe(_))));
}
