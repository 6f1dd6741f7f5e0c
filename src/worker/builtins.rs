//! Jobs every `fork-worker` understands.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::job::{JobContext, JobResult, RemoteOperation};

/// Return `value` unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Echo {
    /// Value to return.
    pub value: serde_json::Value,
}

impl RemoteOperation for Echo {
    const TAG: &'static str = "echo";
    type Output = serde_json::Value;

    fn call(self, _ctx: &JobContext) -> JobResult<Self::Output> {
        Ok(self.value)
    }
}

/// Block the job thread for `millis`, then return `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sleep {
    /// How long to block.
    pub millis: u64,
    /// Value to return afterwards.
    pub value: serde_json::Value,
}

impl RemoteOperation for Sleep {
    const TAG: &'static str = "sleep";
    type Output = serde_json::Value;

    fn call(self, _ctx: &JobContext) -> JobResult<Self::Output> {
        std::thread::sleep(Duration::from_millis(self.millis));
        Ok(self.value)
    }
}

/// Raise with `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fail {
    /// Cause reported to the caller.
    pub message: String,
}

impl RemoteOperation for Fail {
    const TAG: &'static str = "fail";
    type Output = ();

    fn call(self, _ctx: &JobContext) -> JobResult<Self::Output> {
        Err(self.message)
    }
}

/// Find `name` in the worker's search paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvePath {
    /// File name to look for.
    pub name: String,
}

impl RemoteOperation for ResolvePath {
    const TAG: &'static str = "resolve_path";
    type Output = Option<PathBuf>;

    fn call(self, ctx: &JobContext) -> JobResult<Self::Output> {
        Ok(ctx.resolve(&self.name))
    }
}
