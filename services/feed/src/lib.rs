//! Live Feed Service
//!
//! Pushes record changes (instrument price, market cap, volume) to many
//! connected clients, each of which only sees the records in its current
//! viewport:
//! - Change ingestion with lookup and field normalization
//! - Debounced coalescing of bursts into batches
//! - Per-connection fan-out filtered by interest set
//! - Connection lifecycle with periodic liveness probes
//!
//! # Architecture
//!
//! ```text
//!   Store changes
//!        │
//!    ┌───▼───┐
//!    │Ingest │  ← lookup by key, normalize
//!    └───┬───┘
//!        │
//!   ┌────▼─────┐
//!   │Coalesce  │  ← last write wins per key, one flush per window
//!   └────┬─────┘
//!        │ batch
//!   ┌────▼─────┐      ┌──────────┐
//!   │ Fan-out  │ ◀─── │ Interest │ ◀── set_interest
//!   └────┬─────┘      └──────────┘
//!        │
//! ┌──────▼───────────────────┐
//! │ Connections (+ probes)   │
//! └──────────────────────────┘
//! ```

pub mod config;
pub mod connections;
pub mod engine;
pub mod error;
pub mod ingestion;
pub mod metrics;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod router;
pub mod store;

pub use config::FeedConfig;
pub use connections::{Connection, ConnectionGuard};
pub use engine::{FeedEngine, FeedTask};
pub use error::FeedError;
pub use protocol::{FeedMessage, InterestRequest};
pub use store::{ChangeEvent, ChangeOp, MemoryStore, RecordStore};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
