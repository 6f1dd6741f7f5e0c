//! Job payloads carried across the process boundary.
//!
//! A job is a type tag plus a JSON payload. The worker looks the tag up in
//! its registry and decodes the payload into the matching
//! [`RemoteOperation`]. Operations must be self-contained: everything they
//! need travels in the payload.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{ForkError, Result};

/// Outcome of a job body. The error is the cause reported back to the caller.
pub type JobResult<T> = std::result::Result<T, String>;

/// Tagged, transportable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Registry key of the operation.
    pub tag: String,
    /// Encoded operation.
    pub payload: serde_json::Value,
}

impl JobPayload {
    /// Encode a typed operation.
    ///
    /// # Errors
    ///
    /// Returns `ForkError::Protocol` if `op` cannot be serialised.
    pub fn encode<Op: RemoteOperation>(op: Op) -> Result<Self> {
        let payload = serde_json::to_value(op)
            .map_err(|err| ForkError::Protocol(format!("failed to encode job {}: {err}", Op::TAG)))?;
        Ok(Self {
            tag: Op::TAG.to_owned(),
            payload,
        })
    }
}

/// Worker-side environment visible to a running job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobContext {
    search_paths: Vec<PathBuf>,
}

impl JobContext {
    /// Context with the given search paths, most recently added first.
    #[must_use]
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// Directories added through `add_search_path`.
    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// First existing file called `name` in the search paths.
    #[must_use]
    pub fn resolve(&self, name: impl AsRef<Path>) -> Option<PathBuf> {
        let name = name.as_ref();
        self.search_paths
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
    }
}

/// A unit of work the controller can run inside the worker.
///
/// Both sides link the same type: the controller encodes it, the worker
/// registers it and runs [`call`](Self::call) on a dedicated thread.
pub trait RemoteOperation: Serialize + DeserializeOwned + Send + 'static {
    /// Registry key; must be unique per worker.
    const TAG: &'static str;

    /// Value returned to the controller.
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Run the job. May block.
    ///
    /// # Errors
    ///
    /// Returns a human-readable cause, surfaced to the caller as
    /// `ForkError::ExecutionFailed`.
    fn call(self, ctx: &JobContext) -> JobResult<Self::Output>;
}
