//! Coalescing Queue: debounces record updates into batches
//!
//! Two phases:
//!
//! ```text
//!            push (first in window)
//!   ┌──────┐ ───────────────────────▶ ┌───────┐
//!   │ Idle │                          │ Armed │ ◀── push (overwrite only)
//!   └──────┘ ◀─────────────────────── └───────┘
//!              timer fires: snapshot + clear, release batch
//! ```
//!
//! The first push after a flush arms a one-shot timer; later pushes in the
//! same window only overwrite entries. The flush time is therefore fixed by
//! the first event of the window, which bounds staleness to one debounce
//! interval no matter how fast the store writes.
//!
//! All mutations happen under a synchronous lock that is never held across
//! an await, so "snapshot and clear" is atomic with respect to `push`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use types::record::{Record, RecordKey};

use crate::metrics::FeedMetrics;

/// One released window: at most one record per key, ordered by key.
pub type Batch = BTreeMap<RecordKey, Record>;

/// Queue phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePhase {
    /// No timer armed, batch empty.
    #[default]
    Idle,
    /// Timer running, batch non-empty.
    Armed,
}

/// Pending batch plus its phase. Pure state, no timers.
#[derive(Debug, Default)]
pub struct PendingBatch {
    entries: Batch,
    phase: QueuePhase,
}

impl PendingBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite by key (last write wins).
    ///
    /// Returns `true` if this insert moved the batch from Idle to Armed,
    /// i.e. the caller must start the debounce timer.
    pub fn insert(&mut self, record: Record) -> bool {
        self.entries.insert(record.address.clone(), record);
        match self.phase {
            QueuePhase::Idle => {
                self.phase = QueuePhase::Armed;
                true
            }
            QueuePhase::Armed => false,
        }
    }

    /// Snapshot and clear, returning to Idle.
    ///
    /// Returns `None` when there is nothing to release.
    pub fn release(&mut self) -> Option<Batch> {
        self.phase = QueuePhase::Idle;
        if self.entries.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.entries))
        }
    }

    pub fn phase(&self) -> QueuePhase {
        self.phase
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: PendingBatch,
    timer: Option<JoinHandle<()>>,
}

/// Debouncing queue feeding the fan-out router.
///
/// Released batches go out on the channel returned by [`CoalescingQueue::new`],
/// in release order.
pub struct CoalescingQueue {
    state: Arc<Mutex<QueueState>>,
    debounce: Duration,
    flush_tx: mpsc::UnboundedSender<Batch>,
    metrics: Arc<FeedMetrics>,
}

impl CoalescingQueue {
    /// Create a queue and the receiving end for its released batches.
    pub fn new(
        debounce: Duration,
        metrics: Arc<FeedMetrics>,
    ) -> (Self, mpsc::UnboundedReceiver<Batch>) {
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let queue = Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            debounce,
            flush_tx,
            metrics,
        };
        (queue, flush_rx)
    }

    /// Add a record to the current window.
    ///
    /// Arms the debounce timer if the queue was Idle. Must be called from
    /// within a tokio runtime.
    pub fn push(&self, record: Record) {
        let mut state = lock(&self.state);
        let key = record.address.clone();
        if state.pending.insert(record) {
            debug!(
                key = %key,
                debounce_ms = self.debounce.as_millis() as u64,
                "Debounce window armed"
            );
            state.timer = Some(tokio::spawn(flush_after(
                Arc::clone(&self.state),
                self.debounce,
                self.flush_tx.clone(),
                Arc::clone(&self.metrics),
            )));
        }
        self.metrics.record_queued();
    }

    pub fn phase(&self) -> QueuePhase {
        lock(&self.state).pending.phase()
    }

    /// Distinct keys waiting in the current window.
    pub fn pending_len(&self) -> usize {
        lock(&self.state).pending.len()
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Cancel the armed flush and discard its records, returning how many
    /// keys were pending.
    pub fn clear(&self) -> usize {
        let mut state = lock(&self.state);
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.pending.release().map_or(0, |batch| batch.len())
    }
}

impl Drop for CoalescingQueue {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.state).timer.take() {
            timer.abort();
        }
    }
}

fn lock(state: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    // No code path panics while holding the lock; recover the data if it ever does.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn flush_after(
    state: Arc<Mutex<QueueState>>,
    debounce: Duration,
    flush_tx: mpsc::UnboundedSender<Batch>,
    metrics: Arc<FeedMetrics>,
) {
    tokio::time::sleep(debounce).await;

    let released = {
        let mut state = lock(&state);
        state.timer = None;
        state.pending.release()
    };

    match released {
        Some(batch) => {
            metrics.record_flush(batch.len());
            debug!(records = batch.len(), "Flushing batch");
            if flush_tx.send(batch).is_err() {
                debug!("Router gone, batch discarded");
            }
        }
        None => debug!("Timer fired on empty batch"),
    }
}
