//! Types library for the live instrument feed
//!
//! This library provides the core type definitions shared by the fan-out
//! engine and its transports, so every component agrees on what a record
//! looks like once it leaves the store.
//!
//! # Modules
//! - `ids`: Unique identifiers (ConnectionId)
//! - `record`: Record keys, raw store documents and normalized records
//! - `errors`: Error taxonomy for store access and delivery

// Public modules
pub mod ids;
pub mod record;
pub mod errors;
