//! Error types shared by the feed engine and its collaborators
//!
//! Comprehensive error taxonomy using thiserror

use thiserror::Error;

/// Errors raised by a record store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Lookup failed for {key}: {reason}")]
    Lookup { key: String, reason: String },

    #[error("Subscription failed: {reason}")]
    Subscription { reason: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The subscriber fell behind and `skipped` notifications were lost.
    /// The subscription itself is still usable.
    #[error("Subscriber lagged, {skipped} change notifications skipped")]
    Lagged { skipped: u64 },
}

/// Errors raised while delivering a message to a connection
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("Connection closed")]
    Closed,

    #[error("Outbound buffer full")]
    BufferFull,

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Send timed out")]
    Timeout,
}
