//! Bounded-time job execution inside the worker.
//!
//! Each call gets its own blocking thread; the caller waits on it for at
//! most the budget. A job that overruns keeps running in the background
//! after `ExecutionTimeout` is returned. Only closing the worker reclaims
//! it.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, warn};

use crate::models::job::{JobContext, JobPayload};
use crate::worker::registry::JobRegistry;
use crate::{ForkError, Result};

/// Runs registered jobs with a wall-clock budget.
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    registry: Arc<JobRegistry>,
    search_paths: Arc<RwLock<Vec<PathBuf>>>,
}

impl ExecutionEngine {
    /// Engine dispatching through `registry`.
    #[must_use]
    pub fn new(registry: JobRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            search_paths: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Run `job` and wait at most `budget` for its result.
    ///
    /// # Errors
    ///
    /// - `ForkError::ExecutionTimeout` if the budget elapses first; the job
    ///   is left running.
    /// - `ForkError::ExecutionFailed` if the tag is unknown, the job raises,
    ///   or it panics.
    pub async fn execute(&self, job: JobPayload, budget: Duration) -> Result<serde_json::Value> {
        let handler = self.registry.resolve(&job.tag)?;
        let ctx = self.context();
        let tag = job.tag;

        let task = tokio::task::spawn_blocking(move || handler(job.payload, &ctx));

        match tokio::time::timeout(budget, task).await {
            Err(_elapsed) => {
                // Dropping the join handle detaches the job; it is not cancelled.
                warn!(tag = %tag, ?budget, "job exceeded its budget and is left running");
                Err(ForkError::ExecutionTimeout(format!(
                    "job '{tag}' took longer than {budget:?} to complete"
                )))
            }
            Ok(Err(join_err)) => Err(ForkError::ExecutionFailed(format!(
                "job '{tag}' panicked: {join_err}"
            ))),
            Ok(Ok(Err(cause))) => Err(ForkError::ExecutionFailed(cause)),
            Ok(Ok(Ok(value))) => {
                debug!(tag = %tag, "job completed");
                Ok(value)
            }
        }
    }

    /// Run `job` to completion and discard its result.
    ///
    /// No budget applies.
    ///
    /// # Errors
    ///
    /// Returns `ForkError::ExecutionFailed` if the tag is unknown, the job
    /// raises, or it panics.
    pub async fn submit(&self, job: JobPayload) -> Result<()> {
        let handler = self.registry.resolve(&job.tag)?;
        let ctx = self.context();
        let tag = job.tag;

        match tokio::task::spawn_blocking(move || handler(job.payload, &ctx)).await {
            Ok(Ok(_discarded)) => {
                debug!(tag = %tag, "submitted job completed");
                Ok(())
            }
            Ok(Err(cause)) => Err(ForkError::ExecutionFailed(cause)),
            Err(join_err) => Err(ForkError::ExecutionFailed(format!(
                "job '{tag}' panicked: {join_err}"
            ))),
        }
    }

    /// Make `path` visible to subsequent jobs; newest paths are searched first.
    ///
    /// # Errors
    ///
    /// Returns `ForkError::NotFound` if `path` is not an existing directory.
    pub fn add_search_path(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        if !path.is_dir() {
            return Err(ForkError::NotFound(format!(
                "search path {} is not a directory",
                path.display()
            )));
        }

        let mut paths = self
            .search_paths
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !paths.contains(&path) {
            paths.insert(0, path);
        }
        Ok(())
    }

    /// Snapshot handed to each job.
    #[must_use]
    pub fn context(&self) -> JobContext {
        let paths = self
            .search_paths
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        JobContext::new(paths.clone())
    }
}
