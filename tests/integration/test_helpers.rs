//! Shared fixtures for integration tests that run the real worker binary.

use std::time::Duration;

use fork_session::config::{ForkConfig, HeartbeatSettings};
use fork_session::{Controller, Coordinator};

/// Heartbeat interval used by spawned workers.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(250);

/// Path of the `fork-worker` binary built alongside these tests.
pub fn worker_program() -> &'static str {
    env!("CARGO_BIN_EXE_fork-worker")
}

/// Configuration pointing at the freshly built worker, with timings short
/// enough for tests but generous enough for a loaded CI host.
pub fn worker_config() -> ForkConfig {
    let mut config = ForkConfig::for_program(worker_program());
    config.timeouts.handshake_seconds = 20;
    config.timeouts.execution_seconds = 30;
    config.timeouts.reply_grace_ms = 2_000;
    config.heartbeat.interval_ms = u64::try_from(HEARTBEAT_INTERVAL.as_millis()).unwrap();
    config.heartbeat.max_missed = 2;
    config
}

/// Heartbeat policy matching [`worker_config`], for in-process workers.
pub fn heartbeat_settings() -> HeartbeatSettings {
    HeartbeatSettings {
        interval: HEARTBEAT_INTERVAL,
        max_missed: 1,
    }
}

/// Open a session against the real worker binary.
pub async fn open_session() -> (Coordinator, Controller) {
    let coordinator = Coordinator::new(worker_config()).expect("valid config");
    let controller = coordinator
        .open_default()
        .await
        .expect("session should open");
    (coordinator, controller)
}
