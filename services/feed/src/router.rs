//! Fan-Out Router: delivers each released batch to interested connections.
//!
//! For every connection, the router intersects the batch with the
//! connection's latest committed interest set and sends the matching
//! records as one message. Connections with no match get nothing.
//! Delivery is best-effort: dead connections, failed sends and sends that
//! outlast the send timeout are skipped for this flush and never retried.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info};
use types::errors::DeliveryError;
use types::record::Record;

use crate::connections::ConnectionManager;
use crate::metrics::FeedMetrics;
use crate::protocol::FeedMessage;
use crate::queue::Batch;
use crate::registry::{InterestRegistry, InterestSet};

/// Outcome of routing one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteSummary {
    /// Connections that received a message.
    pub delivered: usize,
    /// Connections with matching records that could not be reached.
    pub skipped: usize,
    /// Connections with nothing relevant in this batch.
    pub silent: usize,
}

/// Records in `batch` whose key is in `interest`, each at most once, in key order.
pub fn select_relevant(interest: &InterestSet, batch: &Batch) -> Vec<Record> {
    if interest.len() < batch.len() {
        let mut relevant: Vec<Record> = interest
            .iter()
            .filter_map(|key| batch.get(key))
            .cloned()
            .collect();
        relevant.sort_by(|a, b| a.address.cmp(&b.address));
        relevant
    } else {
        batch
            .values()
            .filter(|record| interest.contains(&record.address))
            .cloned()
            .collect()
    }
}

pub struct FanOutRouter {
    registry: Arc<InterestRegistry>,
    connections: Arc<ConnectionManager>,
    metrics: Arc<FeedMetrics>,
    send_timeout: Duration,
}

impl FanOutRouter {
    pub fn new(
        registry: Arc<InterestRegistry>,
        connections: Arc<ConnectionManager>,
        metrics: Arc<FeedMetrics>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            connections,
            metrics,
            send_timeout,
        }
    }

    /// Route one batch to every current connection.
    ///
    /// Interest is read at evaluation time, so a `set_interest` that lands
    /// before this call is honored even for records queued earlier.
    ///
    /// Takes at most one send timeout regardless of how connections behave.
    pub async fn route(&self, batch: &Batch) -> RouteSummary {
        let mut summary = RouteSummary::default();
        let mut sends = Vec::new();

        for (id, connection) in self.connections.snapshot() {
            let relevant = match self.registry.snapshot(&id) {
                Some(interest) => select_relevant(&interest, batch),
                None => Vec::new(),
            };

            if relevant.is_empty() {
                summary.silent += 1;
                continue;
            }

            if !connection.is_live() {
                debug!(connection_id = %id, "Skipping dead connection");
                summary.skipped += 1;
                self.metrics.record_delivery_skipped();
                continue;
            }

            let send_timeout = self.send_timeout;
            sends.push(async move {
                let count = relevant.len();
                let send = connection.send(FeedMessage::Batch { updates: relevant });
                let result = match timeout(send_timeout, send).await {
                    Ok(result) => result,
                    Err(_) => Err(DeliveryError::Timeout),
                };
                (id, count, result)
            });
        }

        for (id, count, result) in join_all(sends).await {
            match result {
                Ok(()) => {
                    summary.delivered += 1;
                    self.metrics.record_delivery();
                    debug!(connection_id = %id, records = count, "Batch delivered");
                }
                Err(e) => {
                    summary.skipped += 1;
                    self.metrics.record_delivery_skipped();
                    debug!(connection_id = %id, error = %e, "Batch delivery failed");
                }
            }
        }

        summary
    }

    /// Route batches until the queue side of the channel is gone.
    pub async fn run(self, mut batches: mpsc::UnboundedReceiver<Batch>) {
        info!("FanOutRouter running");

        while let Some(batch) = batches.recv().await {
            let summary = self.route(&batch).await;
            debug!(
                records = batch.len(),
                delivered = summary.delivered,
                skipped = summary.skipped,
                silent = summary.silent,
                "Batch routed"
            );
        }

        info!("FanOutRouter stopped");
    }
}
