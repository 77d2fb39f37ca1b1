//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing knobs for the fan-out engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Debounce window in milliseconds (default: 100ms).
    pub debounce_ms: u64,
    /// Liveness probe interval in milliseconds (default: 30s).
    pub heartbeat_interval_ms: u64,
    /// Longest a single batch send may take before the connection is
    /// skipped for that flush (default: 100ms).
    pub send_timeout_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            heartbeat_interval_ms: 30_000,
            send_timeout_ms: 100,
        }
    }
}

impl FeedConfig {
    /// Debounce window. Never zero.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms.max(1))
    }

    /// Liveness probe period. Never zero; tokio rejects zero-period intervals.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    /// Per-connection send bound. Never zero.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms.max(1))
    }
}
