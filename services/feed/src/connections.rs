//! Connection Lifecycle Manager
//!
//! Tracks live connections, runs one liveness-probe loop per connection,
//! and tears both the loop and the interest set down on disconnect.
//!
//! Flow: connect → probe every interval → disconnect (explicit, or via
//! [`ConnectionGuard`] drop on any other exit path).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use types::errors::DeliveryError;
use types::ids::ConnectionId;

use crate::metrics::FeedMetrics;
use crate::protocol::FeedMessage;
use crate::registry::InterestRegistry;

/// Transport-side handle to a client connection.
///
/// The engine never owns the underlying socket; it only needs to send and
/// to ask whether the connection is still usable.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Whether the connection is still usable.
    fn is_live(&self) -> bool;

    /// Deliver one message.
    async fn send(&self, message: FeedMessage) -> Result<(), DeliveryError>;
}

struct ConnectionEntry {
    connection: Arc<dyn Connection>,
    heartbeat_cancel: CancellationToken,
    heartbeat_task: JoinHandle<()>,
}

/// Registry of live connections and their liveness loops.
pub struct ConnectionManager {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    registry: Arc<InterestRegistry>,
    metrics: Arc<FeedMetrics>,
    heartbeat_interval: Duration,
}

impl ConnectionManager {
    pub fn new(
        registry: Arc<InterestRegistry>,
        metrics: Arc<FeedMetrics>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            connections: DashMap::new(),
            registry,
            metrics,
            heartbeat_interval,
        }
    }

    /// Register a connection and start its liveness loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self, connection: Arc<dyn Connection>) -> ConnectionId {
        let id = ConnectionId::new();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(heartbeat_loop(
            id,
            Arc::clone(&connection),
            cancel.clone(),
            self.heartbeat_interval,
            Arc::clone(&self.metrics),
        ));

        self.connections.insert(
            id,
            ConnectionEntry {
                connection,
                heartbeat_cancel: cancel,
                heartbeat_task: task,
            },
        );
        self.metrics
            .set_connected_clients(self.connections.len() as u64);
        info!(connection_id = %id, "Connection registered");
        id
    }

    /// Cancel the liveness loop and drop the interest set.
    ///
    /// Returns `false` if the connection was already gone.
    pub fn disconnect(&self, id: &ConnectionId) -> bool {
        let removed = self.connections.remove(id);
        if let Some((_, entry)) = &removed {
            entry.heartbeat_cancel.cancel();
            // A probe stuck in `send` never observes the token.
            entry.heartbeat_task.abort();
        }
        // Interest is dropped even if the entry was already removed.
        self.registry.remove(id);

        match removed {
            Some(_) => {
                self.metrics
                    .set_connected_clients(self.connections.len() as u64);
                info!(connection_id = %id, "Connection removed");
                true
            }
            None => false,
        }
    }

    /// Disconnect every connection.
    pub fn disconnect_all(&self) {
        let ids: Vec<ConnectionId> = self.connection_ids();
        for id in ids {
            self.disconnect(&id);
        }
    }

    /// Snapshot of current connections for one routing pass.
    pub fn snapshot(&self) -> Vec<(ConnectionId, Arc<dyn Connection>)> {
        self.connections
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(&entry.value().connection)))
            .collect()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Whether the liveness loop for `id` is still running.
    pub fn heartbeat_running(&self, id: &ConnectionId) -> bool {
        self.connections
            .get(id)
            .map(|entry| !entry.heartbeat_task.is_finished())
            .unwrap_or(false)
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of connected clients.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        for entry in self.connections.iter() {
            entry.heartbeat_cancel.cancel();
            entry.heartbeat_task.abort();
        }
    }
}

/// Disconnects its connection when dropped.
///
/// Transports hold one of these for the lifetime of a session, so normal
/// close, socket errors, task abort and panics all clean up the same way.
pub struct ConnectionGuard {
    id: ConnectionId,
    manager: Arc<ConnectionManager>,
}

impl ConnectionGuard {
    pub fn new(id: ConnectionId, manager: Arc<ConnectionManager>) -> Self {
        Self { id, manager }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Disconnect now instead of at drop.
    pub fn disconnect(self) {
        // Drop does the work.
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager.disconnect(&self.id);
    }
}

async fn heartbeat_loop(
    id: ConnectionId,
    connection: Arc<dyn Connection>,
    cancel: CancellationToken,
    period: Duration,
    metrics: Arc<FeedMetrics>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = ticker.tick() => {
                if cancel.is_cancelled() || !connection.is_live() {
                    break;
                }
                match connection.send(FeedMessage::heartbeat_now()).await {
                    Ok(()) => metrics.record_heartbeat(),
                    Err(DeliveryError::Closed) => break,
                    // Transient; the next tick tries again.
                    Err(e) => debug!(connection_id = %id, error = %e, "Liveness probe skipped"),
                }
            }
        }
    }

    debug!(connection_id = %id, "Liveness loop stopped");
}
