//! Engine-level errors.

use thiserror::Error;
use types::errors::StoreError;

use crate::ingestion::IngestionError;

/// Errors surfaced by [`crate::engine::FeedEngine`] to the hosting process.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeedError {
    #[error("Store subscription failed: {0}")]
    Subscribe(#[from] StoreError),

    #[error("Store subscription interrupted: {0}")]
    SubscriptionInterrupted(#[from] IngestionError),

    #[error("Ingestion task failed: {0}")]
    Task(String),

    #[error("Feed engine is shut down")]
    ShutDown,
}
