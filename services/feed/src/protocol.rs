//! Message payloads exchanged with clients
//!
//! Outbound: batched record updates and liveness probes.
//! Inbound: interest declarations (the client's viewport).
//!
//! Framing and transport bytes belong to the transport; this module only
//! fixes the JSON payload shapes.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use types::record::{Record, RecordKey};

/// Server → client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeedMessage {
    /// `{"updates": [...]}`: the records of one flush relevant to this client.
    Batch { updates: Vec<Record> },
    /// `{"timestamp": <unix millis>}`: periodic liveness probe.
    Heartbeat { timestamp: i64 },
}

impl FeedMessage {
    /// Liveness probe stamped with the current wall-clock time.
    pub fn heartbeat_now() -> Self {
        FeedMessage::Heartbeat {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, FeedMessage::Heartbeat { .. })
    }
}

/// Client → server interest declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestRequest {
    /// Record keys the client is currently viewing
    pub keys: Vec<String>,
}

impl InterestRequest {
    /// Canonical, deduplicated key set.
    pub fn into_key_set(self) -> HashSet<RecordKey> {
        self.keys.into_iter().map(RecordKey::from).collect()
    }
}

/// Parse a raw JSON message into an InterestRequest.
///
/// Anything other than `{"keys": [string, ...]}` is rejected.
pub fn parse_interest_request(json: &str) -> Result<InterestRequest, serde_json::Error> {
    serde_json::from_str(json)
}
