//! Engine facade: wires the store, queue, router and connections together.
//!
//! Every component is an explicitly owned object handed around as an
//! `Arc`; there is no global state. `FeedEngine::start` spawns two tasks:
//!
//! - ingestion: store changes → lookups → coalescing queue
//! - routing: released batches → interested connections
//!
//! Transports call `connect`, `set_interest` and hold the returned
//! [`ConnectionGuard`] for the life of the session. `shutdown` stops both
//! tasks and refuses further connections.

use std::sync::Arc;

use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use types::ids::ConnectionId;

use crate::config::FeedConfig;
use crate::connections::{Connection, ConnectionGuard, ConnectionManager};
use crate::error::FeedError;
use crate::ingestion::{ChangeIngester, IngestionError};
use crate::metrics::FeedMetrics;
use crate::queue::CoalescingQueue;
use crate::registry::{InterestRegistry, InterestSet};
use crate::router::FanOutRouter;
use crate::store::RecordStore;

/// Running fan-out engine.
pub struct FeedEngine {
    registry: Arc<InterestRegistry>,
    connections: Arc<ConnectionManager>,
    queue: Arc<CoalescingQueue>,
    metrics: Arc<FeedMetrics>,
    router_task: JoinHandle<()>,
    ingest_task: AbortHandle,
    stopped: CancellationToken,
}

/// Handle on the ingestion task.
///
/// Ingestion stops when the store subscription is interrupted, and the
/// hosting process decides whether to restart, or when the engine is shut
/// down.
pub struct FeedTask {
    ingest: JoinHandle<Result<(), IngestionError>>,
}

impl FeedTask {
    /// Wait for ingestion to stop.
    pub async fn wait(self) -> Result<(), FeedError> {
        match self.ingest.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(FeedError::SubscriptionInterrupted(e)),
            Err(join) if join.is_cancelled() => Ok(()),
            Err(join) => Err(FeedError::Task(join.to_string())),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.ingest.is_finished()
    }
}

impl FeedEngine {
    /// Subscribe to `store` and start the ingestion and routing tasks.
    pub async fn start(
        store: Arc<dyn RecordStore>,
        config: FeedConfig,
    ) -> Result<(Self, FeedTask), FeedError> {
        let changes = store.subscribe().await?;

        let metrics = Arc::new(FeedMetrics::new());
        let registry = Arc::new(InterestRegistry::new());
        let connections = Arc::new(ConnectionManager::new(
            Arc::clone(&registry),
            Arc::clone(&metrics),
            config.heartbeat_interval(),
        ));

        let (queue, batches) = CoalescingQueue::new(config.debounce(), Arc::clone(&metrics));
        let queue = Arc::new(queue);

        let router = FanOutRouter::new(
            Arc::clone(&registry),
            Arc::clone(&connections),
            Arc::clone(&metrics),
            config.send_timeout(),
        );
        let router_task = tokio::spawn(router.run(batches));

        let ingester = ChangeIngester::new(store, Arc::clone(&queue), Arc::clone(&metrics));
        let ingest = tokio::spawn(async move { ingester.run(changes).await });
        let ingest_task = ingest.abort_handle();

        info!(
            debounce_ms = config.debounce().as_millis() as u64,
            heartbeat_interval_ms = config.heartbeat_interval().as_millis() as u64,
            "FeedEngine started"
        );

        let engine = Self {
            registry,
            connections,
            queue,
            metrics,
            router_task,
            ingest_task,
            stopped: CancellationToken::new(),
        };
        Ok((engine, FeedTask { ingest }))
    }

    /// Register a transport connection and start its liveness probes.
    ///
    /// Fails with [`FeedError::ShutDown`] once `shutdown` has been called.
    pub fn connect(
        &self,
        connection: Arc<dyn Connection>,
    ) -> Result<ConnectionGuard, FeedError> {
        if self.stopped.is_cancelled() {
            return Err(FeedError::ShutDown);
        }
        let id = self.connections.connect(connection);
        let guard = ConnectionGuard::new(id, Arc::clone(&self.connections));

        // Lost a race with shutdown: the guard drop unregisters it.
        if self.stopped.is_cancelled() {
            return Err(FeedError::ShutDown);
        }
        Ok(guard)
    }

    /// Replace a connection's interest set.
    ///
    /// Returns `false` (and stores nothing) if the connection is unknown or
    /// the engine is shut down.
    pub fn set_interest(&self, id: ConnectionId, keys: InterestSet) -> bool {
        if self.stopped.is_cancelled() {
            return false;
        }
        if !self.connections.contains(&id) {
            warn!(connection_id = %id, "Interest declared for unknown connection");
            return false;
        }
        self.registry.set_interest(id, keys);

        // Lost a race with disconnect: do not leave an orphaned entry.
        if !self.connections.contains(&id) {
            self.registry.remove(&id);
            return false;
        }
        true
    }

    pub fn interested_keys(&self, id: &ConnectionId) -> InterestSet {
        self.registry.interested_keys(id)
    }

    /// Disconnect by id. Prefer dropping the [`ConnectionGuard`].
    pub fn disconnect(&self, id: &ConnectionId) -> bool {
        self.connections.disconnect(id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn metrics(&self) -> Arc<FeedMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Distinct keys waiting in the current debounce window.
    pub fn pending_len(&self) -> usize {
        self.queue.pending_len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// Stop ingestion and routing, discard the pending window and drop
    /// every connection. Idempotent.
    pub fn shutdown(&self) {
        if self.stopped.is_cancelled() {
            return;
        }
        self.stopped.cancel();
        self.ingest_task.abort();
        self.router_task.abort();
        let discarded = self.queue.clear();
        self.connections.disconnect_all();
        info!(discarded, "FeedEngine stopped");
    }
}

impl Drop for FeedEngine {
    fn drop(&mut self) {
        self.ingest_task.abort();
        self.router_task.abort();
    }
}
