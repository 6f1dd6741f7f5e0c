//! Fork session lifecycle state.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a controller handle.
///
/// ```text
/// created → spawning → awaiting_handshake → ready ⇄ executing
///                                             ↓
///                                 closing → closed
/// (any step before ready) → failed
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Identity generated, nothing registered yet.
    Created,
    /// Client name bound; worker process being started.
    Spawning,
    /// Worker started; waiting for its readiness notification.
    AwaitingHandshake,
    /// Worker connected and idle.
    Ready,
    /// A job is in flight.
    Executing,
    /// Teardown in progress.
    Closing,
    /// Names released; no further calls accepted.
    Closed,
    /// Launch or registration failed.
    Failed,
}

impl SessionState {
    /// Whether a worker endpoint is known and calls can be forwarded.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Ready | Self::Executing)
    }

    /// Whether the session has reached a terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Whether a readiness notification may be accepted in this state.
    #[must_use]
    pub fn accepts_handshake(self) -> bool {
        matches!(self, Self::Spawning | Self::AwaitingHandshake)
    }
}
