//! Heartbeat record kept by the worker's liveness loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of the worker's pings against its controller.
///
/// Only the heartbeat loop mutates this; everyone else reads snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatRecord {
    /// Time of the most recent successful ping.
    pub last_success: Option<DateTime<Utc>>,
    /// Failed pings since the last success.
    pub consecutive_failures: u32,
}

impl HeartbeatRecord {
    /// Record a successful ping.
    pub fn record_success(&mut self) {
        self.last_success = Some(Utc::now());
        self.consecutive_failures = 0;
    }

    /// Record a failed ping and return the new failure count.
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }
}
