//! Unit tests for session state predicates and heartbeat records.

use fork_session::models::heartbeat::HeartbeatRecord;
use fork_session::models::session::SessionState;

const ALL: [SessionState; 8] = [
    SessionState::Created,
    SessionState::Spawning,
    SessionState::AwaitingHandshake,
    SessionState::Ready,
    SessionState::Executing,
    SessionState::Closing,
    SessionState::Closed,
    SessionState::Failed,
];

// ── session state ───────────────────────────────────────────────────────────

/// Only closed and failed sessions are terminal.
#[test]
fn terminal_states() {
    let terminal: Vec<_> = ALL.into_iter().filter(|s| s.is_terminal()).collect();
    assert_eq!(terminal, vec![SessionState::Closed, SessionState::Failed]);
}

/// The handshake is only accepted while the worker is being started.
#[test]
fn handshake_states() {
    let accepting: Vec<_> = ALL.into_iter().filter(|s| s.accepts_handshake()).collect();
    assert_eq!(
        accepting,
        vec![SessionState::Spawning, SessionState::AwaitingHandshake]
    );
}

/// States round-trip through their snake_case names.
#[test]
fn states_use_snake_case_names() {
    for (state, name) in ALL.into_iter().zip([
        "created",
        "spawning",
        "awaiting_handshake",
        "ready",
        "executing",
        "closing",
        "closed",
        "failed",
    ]) {
        let value = serde_json::to_value(state).expect("serialise");
        assert_eq!(value, serde_json::Value::String(name.into()));
        let back: SessionState = serde_json::from_value(value).expect("deserialise");
        assert_eq!(back, state);
    }
}

// ── heartbeat record ────────────────────────────────────────────────────────

/// Failures accumulate until a success resets them.
#[test]
fn success_resets_failures() {
    let mut record = HeartbeatRecord::default();
    assert_eq!(record.record_failure(), 1);
    assert_eq!(record.record_failure(), 2);

    record.record_success();
    assert_eq!(record.consecutive_failures, 0);
    assert!(record.last_success.is_some());
}

/// The failure count saturates instead of wrapping.
#[test]
fn failure_count_saturates() {
    let mut record = HeartbeatRecord {
        last_success: None,
        consecutive_failures: u32::MAX,
    };
    assert_eq!(record.record_failure(), u32::MAX);
}
