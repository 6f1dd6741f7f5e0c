//! Unit tests for assembling worker options from the launch environment.
//!
//! These mutate process environment variables, so they run serially.

use std::time::Duration;

use serial_test::serial;

use fork_session::identity::SessionId;
use fork_session::launcher::{
    ENV_DIRECTORY, ENV_HANDSHAKE_TIMEOUT_MS, ENV_HEARTBEAT_INTERVAL_MS, ENV_HEARTBEAT_MAX_MISSED,
    ENV_MAX_MEMORY_MB,
};
use fork_session::worker::registry::JobRegistry;
use fork_session::worker::WorkerOptions;
use fork_session::ForkError;

const VARS: [&str; 5] = [
    ENV_DIRECTORY,
    ENV_HEARTBEAT_INTERVAL_MS,
    ENV_HEARTBEAT_MAX_MISSED,
    ENV_HANDSHAKE_TIMEOUT_MS,
    ENV_MAX_MEMORY_MB,
];

/// Clears every `FORK_*` variable on creation and again on drop.
struct CleanEnv;

impl CleanEnv {
    fn new() -> Self {
        for var in VARS {
            std::env::remove_var(var);
        }
        Self
    }
}

impl Drop for CleanEnv {
    fn drop(&mut self) {
        for var in VARS {
            std::env::remove_var(var);
        }
    }
}

fn options(identity: Option<&str>) -> fork_session::Result<WorkerOptions> {
    WorkerOptions::from_env(identity, JobRegistry::with_builtins())
}

// ── identity ────────────────────────────────────────────────────────────────

/// A worker started without an identity refuses to start.
#[test]
#[serial]
fn missing_identity_is_rejected() {
    let _env = CleanEnv::new();
    let err = options(None).expect_err("identity is required");
    assert!(matches!(err, ForkError::InvalidIdentity(_)), "got {err:?}");
}

/// A malformed identity is rejected before anything else is read.
#[test]
#[serial]
fn malformed_identity_is_rejected() {
    let _env = CleanEnv::new();
    let err = options(Some("not-a-session")).expect_err("identity must parse");
    assert!(matches!(err, ForkError::InvalidIdentity(_)), "got {err:?}");
}

// ── environment ─────────────────────────────────────────────────────────────

/// The naming directory location is mandatory.
#[test]
#[serial]
fn missing_directory_is_config_error() {
    let _env = CleanEnv::new();
    let id = SessionId::generate().to_string();
    let err = options(Some(&id)).expect_err("directory is required");
    assert!(matches!(err, ForkError::Config(msg) if msg.contains(ENV_DIRECTORY)));
}

/// A directory that does not exist cannot be attached to.
#[test]
#[serial]
fn nonexistent_directory_is_rejected() {
    let _env = CleanEnv::new();
    let dir = tempfile::tempdir().expect("tempdir");
    std::env::set_var(ENV_DIRECTORY, dir.path().join("gone"));

    let id = SessionId::generate().to_string();
    let err = options(Some(&id)).expect_err("directory must exist");
    assert!(matches!(err, ForkError::Directory(_)), "got {err:?}");
}

/// Only the directory is needed; liveness settings fall back to defaults.
#[test]
#[serial]
fn defaults_apply_when_unset() {
    let _env = CleanEnv::new();
    let dir = tempfile::tempdir().expect("tempdir");
    std::env::set_var(ENV_DIRECTORY, dir.path());

    let id = SessionId::generate();
    let opts = options(Some(&id.to_string())).expect("options");
    assert_eq!(opts.identity, id);
    assert_eq!(opts.directory.root(), dir.path());
    assert_eq!(opts.heartbeat.interval, Duration::from_secs(10));
    assert_eq!(opts.heartbeat.max_missed, 1);
    assert_eq!(opts.handshake_timeout, Duration::from_secs(30));
    assert_eq!(opts.max_memory_mb, None);
}

/// Every variable set by the controller is honoured.
#[test]
#[serial]
fn variables_are_parsed() {
    let _env = CleanEnv::new();
    let dir = tempfile::tempdir().expect("tempdir");
    std::env::set_var(ENV_DIRECTORY, dir.path());
    std::env::set_var(ENV_HEARTBEAT_INTERVAL_MS, "250");
    std::env::set_var(ENV_HEARTBEAT_MAX_MISSED, "4");
    std::env::set_var(ENV_HANDSHAKE_TIMEOUT_MS, "1500");
    std::env::set_var(ENV_MAX_MEMORY_MB, " 512 ");

    let opts = options(Some(&SessionId::generate().to_string())).expect("options");
    assert_eq!(opts.heartbeat.interval, Duration::from_millis(250));
    assert_eq!(opts.heartbeat.max_missed, 4);
    assert_eq!(opts.handshake_timeout, Duration::from_millis(1_500));
    assert_eq!(opts.max_memory_mb, Some(512));
}

/// A zero interval would spin; it is refused.
#[test]
#[serial]
fn zero_interval_is_rejected() {
    let _env = CleanEnv::new();
    let dir = tempfile::tempdir().expect("tempdir");
    std::env::set_var(ENV_DIRECTORY, dir.path());
    std::env::set_var(ENV_HEARTBEAT_INTERVAL_MS, "0");

    let err = options(Some(&SessionId::generate().to_string())).expect_err("zero interval");
    assert!(matches!(err, ForkError::Config(msg) if msg.contains(ENV_HEARTBEAT_INTERVAL_MS)));
}

/// A zero handshake timeout could never be met; it is refused.
#[test]
#[serial]
fn zero_handshake_timeout_is_rejected() {
    let _env = CleanEnv::new();
    let dir = tempfile::tempdir().expect("tempdir");
    std::env::set_var(ENV_DIRECTORY, dir.path());
    std::env::set_var(ENV_HANDSHAKE_TIMEOUT_MS, "0");

    let err = options(Some(&SessionId::generate().to_string())).expect_err("zero timeout");
    assert!(matches!(err, ForkError::Config(msg) if msg.contains(ENV_HANDSHAKE_TIMEOUT_MS)));
}

/// `max_missed = 0` is raised to one.
#[test]
#[serial]
fn max_missed_is_at_least_one() {
    let _env = CleanEnv::new();
    let dir = tempfile::tempdir().expect("tempdir");
    std::env::set_var(ENV_DIRECTORY, dir.path());
    std::env::set_var(ENV_HEARTBEAT_MAX_MISSED, "0");

    let opts = options(Some(&SessionId::generate().to_string())).expect("options");
    assert_eq!(opts.heartbeat.max_missed, 1);
}

/// Non-numeric values are config errors naming the variable.
#[test]
#[serial]
fn non_numeric_values_are_rejected() {
    let _env = CleanEnv::new();
    let dir = tempfile::tempdir().expect("tempdir");
    std::env::set_var(ENV_DIRECTORY, dir.path());
    std::env::set_var(ENV_MAX_MEMORY_MB, "lots");

    let err = options(Some(&SessionId::generate().to_string())).expect_err("not a number");
    assert!(matches!(err, ForkError::Config(msg) if msg.contains(ENV_MAX_MEMORY_MB)));
}
