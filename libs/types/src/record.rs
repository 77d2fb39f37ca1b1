//! Instrument records as seen by the feed
//!
//! The store holds partial documents (`RawRecord`): any field may be
//! missing. Everything handed to a consumer is a `Record`, where every
//! numeric field is present and finite. `RawRecord::normalize` is the
//! single place that conversion happens.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Record key: the instrument's contract address.
///
/// Addresses compare case-insensitively, so the key is stored trimmed
/// and ASCII-lowercased. `"0xAbC"` and `"0xabc"` are the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String")]
pub struct RecordKey(String);

impl RecordKey {
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().trim().to_ascii_lowercase())
    }

    /// Get the canonical (lowercase) address
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for RecordKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for RecordKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Borrow<str> for RecordKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record document exactly as the store returned it.
///
/// Every field is optional; documents written by older indexers may
/// lack volumes or market cap entirely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawRecord {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub price: Option<f64>,
    pub market_cap: Option<f64>,
    pub volume_24h: Option<f64>,
    pub volume_1h: Option<f64>,
    pub volume_6h: Option<f64>,
    pub block_number: Option<u64>,
    pub metadata: Option<serde_json::Value>,
}

impl RawRecord {
    /// Fill in defaults and attach the key.
    ///
    /// Absent numeric fields become 0. Non-finite floats also become 0,
    /// since they cannot be represented in the outbound JSON.
    pub fn normalize(self, address: RecordKey) -> Record {
        Record {
            address,
            name: self.name,
            symbol: self.symbol,
            price: finite_or_zero(self.price),
            market_cap: finite_or_zero(self.market_cap),
            volume_24h: finite_or_zero(self.volume_24h),
            volume_1h: finite_or_zero(self.volume_1h),
            volume_6h: finite_or_zero(self.volume_6h),
            block_number: self.block_number.unwrap_or(0),
            metadata: self.metadata.unwrap_or(serde_json::Value::Null),
        }
    }
}

fn finite_or_zero(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

/// A normalized record, ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub address: RecordKey,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub price: f64,
    pub market_cap: f64,
    pub volume_24h: f64,
    pub volume_1h: f64,
    pub volume_6h: f64,
    /// Block the record was last indexed at
    pub block_number: u64,
    pub metadata: serde_json::Value,
}

impl From<Record> for RawRecord {
    fn from(record: Record) -> Self {
        let metadata = match record.metadata {
            serde_json::Value::Null => None,
            other => Some(other),
        };
        Self {
            name: record.name,
            symbol: record.symbol,
            price: Some(record.price),
            market_cap: Some(record.market_cap),
            volume_24h: Some(record.volume_24h),
            volume_1h: Some(record.volume_1h),
            volume_6h: Some(record.volume_6h),
            block_number: Some(record.block_number),
            metadata,
        }
    }
}
