//! Error types shared across the controller and worker sides.

use std::fmt::{Display, Formatter};

/// Shared fork-session result type.
pub type Result<T> = std::result::Result<T, ForkError>;

/// Error enumeration covering every fork-session failure mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForkError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The worker process could not be started or its command line built.
    Launch(String),
    /// The worker never announced readiness within the handshake window.
    HandshakeTimeout(String),
    /// The handshake failed outright (worker exited, lookup failed, ...).
    Handshake(String),
    /// A session identity token was missing or malformed.
    InvalidIdentity(String),
    /// The session is not in a state that allows the requested call.
    InvalidState(String),
    /// The caller's wait budget elapsed before the job finished.
    ExecutionTimeout(String),
    /// The submitted job raised; carries the original cause.
    ExecutionFailed(String),
    /// The caller cancelled its own wait for a job result.
    Cancelled(String),
    /// The peer process could not be reached or stopped answering.
    ConnectivityLost(String),
    /// A naming-directory name is already bound.
    NameConflict(String),
    /// A naming-directory name is not bound.
    NotFound(String),
    /// Naming-directory storage failure other than conflict / absence.
    Directory(String),
    /// Malformed frame, envelope version mismatch, or unexpected call.
    Protocol(String),
    /// The peer reported a failure with no more specific category.
    Remote(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for ForkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::HandshakeTimeout(msg) => write!(f, "handshake timeout: {msg}"),
            Self::Handshake(msg) => write!(f, "handshake: {msg}"),
            Self::InvalidIdentity(msg) => write!(f, "invalid identity: {msg}"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::ExecutionTimeout(msg) => write!(f, "execution timeout: {msg}"),
            Self::ExecutionFailed(msg) => write!(f, "execution failed: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::ConnectivityLost(msg) => write!(f, "connectivity lost: {msg}"),
            Self::NameConflict(msg) => write!(f, "name conflict: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Directory(msg) => write!(f, "directory: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Remote(msg) => write!(f, "remote: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for ForkError {}

impl From<std::io::Error> for ForkError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<toml::de::Error> for ForkError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for ForkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("json: {err}"))
    }
}
