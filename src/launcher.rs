//! Worker launch packaging and output draining.
//!
//! The controller does not care how the worker command line is assembled,
//! only that a [`Launcher`] turns a session identity into something it can
//! exec. [`LaunchConfig`] is the stock launcher: a program, prefix
//! arguments, a memory limit and environment overrides, with the identity
//! appended as the last argument.
//!
//! The controller forwards its own settings to the worker through the
//! `FORK_*` environment variables declared here.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::identity::SessionId;
use crate::{ForkError, Result};

/// Root of the naming directory.
pub const ENV_DIRECTORY: &str = "FORK_DIRECTORY";
/// Heartbeat interval in milliseconds.
pub const ENV_HEARTBEAT_INTERVAL_MS: &str = "FORK_HEARTBEAT_INTERVAL_MS";
/// Consecutive missed pings tolerated by the worker.
pub const ENV_HEARTBEAT_MAX_MISSED: &str = "FORK_HEARTBEAT_MAX_MISSED";
/// Reply bound for the worker's readiness notification, in milliseconds.
pub const ENV_HANDSHAKE_TIMEOUT_MS: &str = "FORK_HANDSHAKE_TIMEOUT_MS";
/// Memory limit reported by the worker, in MiB.
pub const ENV_MAX_MEMORY_MB: &str = "FORK_MAX_MEMORY_MB";

/// A fully resolved command line ready to exec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    /// Executable to start.
    pub program: PathBuf,
    /// Arguments, ending with the session identity.
    pub args: Vec<String>,
    /// Variables set on top of the inherited environment.
    pub env: HashMap<String, String>,
}

/// Produces the command line that starts a worker for a session.
pub trait Launcher: Send + Sync {
    /// Build the command for `identity`.
    ///
    /// # Errors
    ///
    /// Returns `ForkError::Launch` if the command cannot be assembled.
    fn build(&self, identity: &SessionId) -> Result<LaunchCommand>;
}

/// Stock launcher: `<program> <args...> <identity>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Worker executable, or a wrapper that execs it.
    pub program: PathBuf,
    /// Arguments placed before the identity.
    pub args: Vec<String>,
    /// Memory limit forwarded through [`ENV_MAX_MEMORY_MB`].
    pub max_memory_mb: Option<u64>,
    /// Environment overrides.
    pub env: HashMap<String, String>,
}

impl LaunchConfig {
    /// Launch `program` with no extra arguments, limit or overrides.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            max_memory_mb: None,
            env: HashMap::new(),
        }
    }

    /// Set the reported memory limit.
    #[must_use]
    pub fn with_max_memory_mb(mut self, max_memory_mb: u64) -> Self {
        self.max_memory_mb = Some(max_memory_mb);
        self
    }

    /// Append a prefix argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl Launcher for LaunchConfig {
    fn build(&self, identity: &SessionId) -> Result<LaunchCommand> {
        if self.program.as_os_str().is_empty() {
            return Err(ForkError::Launch("worker program is not set".into()));
        }

        let mut args = self.args.clone();
        args.push(identity.to_string());

        let mut env = self.env.clone();
        if let Some(limit) = self.max_memory_mb {
            env.insert(ENV_MAX_MEMORY_MB.to_owned(), limit.to_string());
        }

        Ok(LaunchCommand {
            program: self.program.clone(),
            args,
            env,
        })
    }
}

/// Forward each line of a worker output stream into the tracing pipeline.
///
/// The task ends at EOF, which happens when the worker exits.
pub fn drain_output<R>(session: SessionId, stream: &'static str, reader: R) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    info!(target: "fork_worker", session = %session, stream, "{line}");
                }
                Ok(None) => {
                    debug!(session = %session, stream, "worker stream closed");
                    break;
                }
                Err(err) => {
                    warn!(session = %session, stream, %err, "worker stream read failed");
                    break;
                }
            }
        }
    })
}
