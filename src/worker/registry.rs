//! Tag → handler table used by the worker to dispatch jobs.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::models::job::{JobContext, JobResult, RemoteOperation};
use crate::worker::builtins::{Echo, Fail, ResolvePath, Sleep};
use crate::{ForkError, Result};

/// Type-erased job body: decode the payload, run, encode the output.
pub type JobHandler =
    Arc<dyn Fn(serde_json::Value, &JobContext) -> JobResult<serde_json::Value> + Send + Sync>;

/// Jobs a worker knows how to run.
#[derive(Clone, Default)]
pub struct JobRegistry {
    handlers: HashMap<&'static str, JobHandler>,
}

impl JobRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in jobs (`echo`, `sleep`, `fail`,
    /// `resolve_path`).
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register::<Echo>()
            .register::<Sleep>()
            .register::<Fail>()
            .register::<ResolvePath>();
        registry
    }

    /// Register `Op` under its tag, replacing any previous handler.
    pub fn register<Op: RemoteOperation>(&mut self) -> &mut Self {
        let handler: JobHandler = Arc::new(|payload: serde_json::Value, ctx: &JobContext| {
            let op: Op = serde_json::from_value(payload)
                .map_err(|err| format!("invalid payload for '{}': {err}", Op::TAG))?;
            let output = op.call(ctx)?;
            serde_json::to_value(output)
                .map_err(|err| format!("failed to encode output of '{}': {err}", Op::TAG))
        });
        self.handlers.insert(Op::TAG, handler);
        self
    }

    /// Handler for `tag`.
    ///
    /// # Errors
    ///
    /// Returns `ForkError::ExecutionFailed` if no job is registered under `tag`.
    pub fn resolve(&self, tag: &str) -> Result<JobHandler> {
        self.handlers
            .get(tag)
            .cloned()
            .ok_or_else(|| ForkError::ExecutionFailed(format!("unknown job '{tag}'")))
    }

    /// Registered tags, sorted.
    #[must_use]
    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.handlers.keys().copied().collect();
        tags.sort_unstable();
        tags
    }
}

impl Debug for JobRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}
