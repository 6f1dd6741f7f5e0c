//! Configuration parsing and validation.
//!
//! A `fork.toml` describes how to launch the worker and the timing policy
//! for the session:
//!
//! ```toml
//! directory_root = "/run/fork"      # optional
//!
//! [worker]
//! program = "/usr/local/bin/fork-worker"
//! args = []
//! max_memory_mb = 128
//!
//! [timeouts]
//! handshake_seconds = 30
//! execution_seconds = 600
//!
//! [heartbeat]
//! interval_ms = 10000
//! max_missed = 1
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::launcher::LaunchConfig;
use crate::{ForkError, Result};

/// How the worker process is launched.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Worker executable (or a wrapper such as `nice`).
    pub program: PathBuf,
    /// Arguments placed before the session identity.
    #[serde(default)]
    pub args: Vec<String>,
    /// Memory limit reported by the worker, in MiB.
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
    /// Environment overrides on top of the controller's environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_max_memory_mb() -> u64 {
    128
}

/// Handshake and execution time budgets.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Maximum wait for the worker's readiness notification.
    #[serde(default = "default_handshake_seconds")]
    pub handshake_seconds: u64,
    /// Execution budget used when a caller does not supply one.
    #[serde(default = "default_execution_seconds")]
    pub execution_seconds: u64,
    /// Extra wait for a reply on top of the execution budget.
    #[serde(default = "default_reply_grace_ms")]
    pub reply_grace_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_seconds: default_handshake_seconds(),
            execution_seconds: default_execution_seconds(),
            reply_grace_ms: default_reply_grace_ms(),
        }
    }
}

fn default_handshake_seconds() -> u64 {
    30
}

fn default_execution_seconds() -> u64 {
    600
}

fn default_reply_grace_ms() -> u64 {
    5_000
}

/// Worker-to-controller liveness probing.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HeartbeatConfig {
    /// Delay between pings.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Consecutive failed pings before the worker gives up.
    #[serde(default = "default_max_missed")]
    pub max_missed: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_missed: default_max_missed(),
        }
    }
}

fn default_interval_ms() -> u64 {
    10_000
}

fn default_max_missed() -> u32 {
    1
}

/// Top-level configuration parsed from `fork.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ForkConfig {
    /// Where the naming directory lives; a private temp dir when absent.
    #[serde(default)]
    pub directory_root: Option<PathBuf>,
    /// Worker launch settings.
    pub worker: WorkerConfig,
    /// Time budgets.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Heartbeat policy.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

impl ForkConfig {
    /// Configuration with defaults for everything but the worker program.
    #[must_use]
    pub fn for_program(program: impl Into<PathBuf>) -> Self {
        Self {
            directory_root: None,
            worker: WorkerConfig {
                program: program.into(),
                args: Vec::new(),
                max_memory_mb: default_max_memory_mb(),
                env: HashMap::new(),
            },
            timeouts: TimeoutConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `ForkError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| ForkError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `ForkError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns `ForkError::Config` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.worker.program.as_os_str().is_empty() {
            return Err(ForkError::Config("worker.program must not be empty".into()));
        }

        if self.worker.max_memory_mb == 0 {
            return Err(ForkError::Config(
                "worker.max_memory_mb must be greater than zero".into(),
            ));
        }

        if self.timeouts.handshake_seconds == 0 {
            return Err(ForkError::Config(
                "timeouts.handshake_seconds must be greater than zero".into(),
            ));
        }

        if self.timeouts.execution_seconds == 0 {
            return Err(ForkError::Config(
                "timeouts.execution_seconds must be greater than zero".into(),
            ));
        }

        if self.heartbeat.interval_ms == 0 {
            return Err(ForkError::Config(
                "heartbeat.interval_ms must be greater than zero".into(),
            ));
        }

        if self.heartbeat.max_missed == 0 {
            return Err(ForkError::Config(
                "heartbeat.max_missed must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    /// Launch description for the configured worker.
    #[must_use]
    pub fn launch_config(&self) -> LaunchConfig {
        LaunchConfig {
            program: self.worker.program.clone(),
            args: self.worker.args.clone(),
            max_memory_mb: Some(self.worker.max_memory_mb),
            env: self.worker.env.clone(),
        }
    }

    /// Timing policy for sessions opened with this configuration.
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            handshake_timeout: Duration::from_secs(self.timeouts.handshake_seconds),
            default_execution_timeout: Duration::from_secs(self.timeouts.execution_seconds),
            reply_grace: Duration::from_millis(self.timeouts.reply_grace_ms),
            heartbeat: HeartbeatSettings {
                interval: Duration::from_millis(self.heartbeat.interval_ms),
                max_missed: self.heartbeat.max_missed,
            },
        }
    }
}

/// Heartbeat policy shared by the controller (which forwards it) and the
/// worker (which applies it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSettings {
    /// Delay between pings; also the reply bound for each ping.
    pub interval: Duration,
    /// Consecutive failures tolerated before self-termination.
    pub max_missed: u32,
}

impl HeartbeatSettings {
    /// How long a closing worker waits before exiting.
    #[must_use]
    pub fn close_grace(&self) -> Duration {
        self.interval * 2
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(default_interval_ms()),
            max_missed: default_max_missed(),
        }
    }
}

/// Resolved timing policy for one controller handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Maximum wait for the worker's readiness notification.
    pub handshake_timeout: Duration,
    /// Budget used by `Controller::run_default`.
    pub default_execution_timeout: Duration,
    /// Extra wait for replies beyond their nominal budget.
    pub reply_grace: Duration,
    /// Forwarded to the worker at launch.
    pub heartbeat: HeartbeatSettings,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(default_handshake_seconds()),
            default_execution_timeout: Duration::from_secs(default_execution_seconds()),
            reply_grace: Duration::from_millis(default_reply_grace_ms()),
            heartbeat: HeartbeatSettings::default(),
        }
    }
}
