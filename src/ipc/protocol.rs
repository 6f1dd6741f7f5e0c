//! Request/response envelope for the control channel.
//!
//! ## Wire format
//!
//! One JSON object per line. Request:
//! ```json
//! {"version": 1, "id": "…", "call": {"method": "execute", "job": {"tag": "echo", "payload": {…}}, "timeout_ms": 5000}}
//! ```
//!
//! Response:
//! ```json
//! {"version": 1, "id": "…", "outcome": {"status": "ok", "data": 42}}
//! {"version": 1, "id": "…", "outcome": {"status": "err", "error": {"kind": "execution_timeout", "message": "…"}}}
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::JobPayload;
use crate::{ForkError, Result};

/// Envelope version; both sides must agree.
pub const PROTOCOL_VERSION: u32 = 1;

/// Calls either side may receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Call {
    /// Worker → controller: the worker is bound under `server_name`.
    NotifyReady {
        /// Directory name the worker registered.
        server_name: String,
    },
    /// Liveness probe.
    Ping,
    /// Run a job within `timeout_ms`.
    Execute {
        /// Job to run.
        job: JobPayload,
        /// Caller's wait budget.
        timeout_ms: u64,
    },
    /// Run a job and discard its result.
    Submit {
        /// Job to run.
        job: JobPayload,
    },
    /// Extend the worker's job search path.
    AddSearchPath {
        /// Directory to add.
        path: String,
    },
    /// Worker resident memory, bytes.
    TotalMemory,
    /// Worker memory limit, bytes.
    MaxMemory,
    /// Headroom below the limit, bytes.
    FreeMemory,
    /// Explicit liveness query.
    Alive,
    /// Graceful shutdown request.
    Close,
}

impl Call {
    /// Method name as it appears on the wire.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::NotifyReady { .. } => "notify_ready",
            Self::Ping => "ping",
            Self::Execute { .. } => "execute",
            Self::Submit { .. } => "submit",
            Self::AddSearchPath { .. } => "add_search_path",
            Self::TotalMemory => "total_memory",
            Self::MaxMemory => "max_memory",
            Self::FreeMemory => "free_memory",
            Self::Alive => "alive",
            Self::Close => "close",
        }
    }
}

/// Outbound call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Envelope version.
    pub version: u32,
    /// Correlation id echoed in the response.
    pub id: String,
    /// The call itself.
    pub call: Call,
}

impl Request {
    /// Wrap `call` with the current version and a fresh id.
    #[must_use]
    pub fn new(call: Call) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            id: Uuid::new_v4().to_string(),
            call,
        }
    }
}

/// Failure category carried across the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// The job exceeded its budget.
    ExecutionTimeout,
    /// The job raised.
    ExecutionFailed,
    /// The receiver's state forbids the call.
    InvalidState,
    /// A directory lookup failed.
    NotFound,
    /// A directory bind conflicted.
    NameConflict,
    /// The request was malformed or unsupported.
    Protocol,
    /// Anything else.
    Internal,
}

/// Serialisable failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Category used to rebuild the matching `ForkError`.
    pub kind: RemoteErrorKind,
    /// Human-readable cause.
    pub message: String,
}

impl From<&ForkError> for RemoteError {
    fn from(err: &ForkError) -> Self {
        let (kind, message) = match err {
            ForkError::ExecutionTimeout(msg) => (RemoteErrorKind::ExecutionTimeout, msg.clone()),
            ForkError::ExecutionFailed(msg) => (RemoteErrorKind::ExecutionFailed, msg.clone()),
            ForkError::InvalidState(msg) => (RemoteErrorKind::InvalidState, msg.clone()),
            ForkError::NotFound(msg) => (RemoteErrorKind::NotFound, msg.clone()),
            ForkError::NameConflict(msg) => (RemoteErrorKind::NameConflict, msg.clone()),
            ForkError::Protocol(msg) => (RemoteErrorKind::Protocol, msg.clone()),
            other => (RemoteErrorKind::Internal, other.to_string()),
        };
        Self { kind, message }
    }
}

impl From<RemoteError> for ForkError {
    fn from(err: RemoteError) -> Self {
        match err.kind {
            RemoteErrorKind::ExecutionTimeout => Self::ExecutionTimeout(err.message),
            RemoteErrorKind::ExecutionFailed => Self::ExecutionFailed(err.message),
            RemoteErrorKind::InvalidState => Self::InvalidState(err.message),
            RemoteErrorKind::NotFound => Self::NotFound(err.message),
            RemoteErrorKind::NameConflict => Self::NameConflict(err.message),
            RemoteErrorKind::Protocol => Self::Protocol(err.message),
            RemoteErrorKind::Internal => Self::Remote(err.message),
        }
    }
}

/// Result half of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The call succeeded.
    Ok {
        /// Call-specific result.
        data: serde_json::Value,
    },
    /// The call failed.
    Err {
        /// What went wrong.
        error: RemoteError,
    },
}

/// Inbound reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Envelope version.
    pub version: u32,
    /// Id of the request being answered.
    pub id: String,
    /// Result.
    pub outcome: Outcome,
}

impl Response {
    /// Build the reply to request `id` from a handler result.
    #[must_use]
    pub fn from_result(id: String, result: Result<serde_json::Value>) -> Self {
        let outcome = match result {
            Ok(data) => Outcome::Ok { data },
            Err(err) => Outcome::Err {
                error: RemoteError::from(&err),
            },
        };
        Self {
            version: PROTOCOL_VERSION,
            id,
            outcome,
        }
    }

    /// Unwrap into the call result, checking the version and correlation id.
    ///
    /// # Errors
    ///
    /// - `ForkError::Protocol` on a version or id mismatch.
    /// - The rebuilt remote error when the peer reported a failure.
    pub fn into_result(self, expected_id: &str) -> Result<serde_json::Value> {
        if self.version != PROTOCOL_VERSION {
            return Err(ForkError::Protocol(format!(
                "unsupported envelope version {} (expected {PROTOCOL_VERSION})",
                self.version
            )));
        }
        if self.id != expected_id {
            return Err(ForkError::Protocol(format!(
                "reply id '{}' does not match request '{expected_id}'",
                self.id
            )));
        }

        match self.outcome {
            Outcome::Ok { data } => Ok(data),
            Outcome::Err { error } => Err(error.into()),
        }
    }
}

/// Decode a request line, enforcing the envelope version.
///
/// # Errors
///
/// Returns `ForkError::Protocol` if the line is not a valid request or the
/// version is unsupported.
pub fn parse_request(line: &str) -> Result<Request> {
    let request: Request = serde_json::from_str(line)
        .map_err(|err| ForkError::Protocol(format!("malformed request: {err}")))?;
    if request.version != PROTOCOL_VERSION {
        return Err(ForkError::Protocol(format!(
            "unsupported envelope version {} (expected {PROTOCOL_VERSION})",
            request.version
        )));
    }
    Ok(request)
}
