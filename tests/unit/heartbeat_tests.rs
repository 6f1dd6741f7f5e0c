//! Unit tests for the worker heartbeat loop against scripted pingers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fork_session::config::HeartbeatSettings;
use fork_session::models::heartbeat::HeartbeatRecord;
use fork_session::worker::heartbeat::{Heartbeat, Pinger};
use fork_session::worker::ExitReason;
use fork_session::{ForkError, Result};

const INTERVAL: Duration = Duration::from_millis(50);

/// How a scripted ping behaves.
#[derive(Debug, Clone, Copy)]
enum Reply {
    Answer,
    Refuse,
    Hang,
}

/// Pinger that plays back a script, then repeats its last step forever.
#[derive(Clone)]
struct ScriptedPinger {
    script: Arc<Mutex<VecDeque<Reply>>>,
    pings: Arc<Mutex<u32>>,
}

impl ScriptedPinger {
    fn new(script: &[Reply]) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.iter().copied().collect())),
            pings: Arc::new(Mutex::new(0)),
        }
    }

    fn next_reply(&self) -> Reply {
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            *script.front().unwrap()
        }
    }

    fn pings(&self) -> u32 {
        *self.pings.lock().unwrap()
    }
}

impl Pinger for ScriptedPinger {
    async fn ping(&self, wait: Duration) -> Result<()> {
        *self.pings.lock().unwrap() += 1;
        match self.next_reply() {
            Reply::Answer => Ok(()),
            Reply::Refuse => Err(ForkError::ConnectivityLost("refused".into())),
            Reply::Hang => {
                tokio::time::sleep(wait).await;
                Err(ForkError::ConnectivityLost("no reply".into()))
            }
        }
    }
}

fn settings(max_missed: u32) -> HeartbeatSettings {
    HeartbeatSettings {
        interval: INTERVAL,
        max_missed,
    }
}

// ── controller loss ─────────────────────────────────────────────────────────

/// An unreachable controller is reported within two intervals.
#[tokio::test]
async fn unreachable_controller_is_reported_within_two_intervals() {
    let (exit_tx, mut exit_rx) = mpsc::channel(1);
    let pinger = ScriptedPinger::new(&[Reply::Refuse]);
    let started = Instant::now();

    let handle = Heartbeat::new(pinger, settings(1), exit_tx, CancellationToken::new()).spawn();

    let reason = tokio::time::timeout(INTERVAL * 2, exit_rx.recv())
        .await
        .expect("loss must be reported within two intervals")
        .expect("channel open");
    assert_eq!(reason, ExitReason::ControllerLost);
    assert!(started.elapsed() <= INTERVAL * 2);
    assert_eq!(handle.record().consecutive_failures, 1);
}

/// A controller that accepts the connection but never answers also counts
/// as lost, because each ping is bounded by one interval.
#[tokio::test]
async fn hung_controller_is_reported_within_two_intervals() {
    let (exit_tx, mut exit_rx) = mpsc::channel(1);
    let pinger = ScriptedPinger::new(&[Reply::Hang]);

    let _handle = Heartbeat::new(pinger, settings(1), exit_tx, CancellationToken::new()).spawn();

    let reason = tokio::time::timeout(INTERVAL * 2 + Duration::from_millis(40), exit_rx.recv())
        .await
        .expect("loss must be reported promptly")
        .expect("channel open");
    assert_eq!(reason, ExitReason::ControllerLost);
}

/// A controller that dies after answering for a while is still noticed.
#[tokio::test]
async fn controller_dying_later_is_reported() {
    let (exit_tx, mut exit_rx) = mpsc::channel(1);
    let pinger = ScriptedPinger::new(&[Reply::Answer, Reply::Answer, Reply::Refuse]);

    let handle =
        Heartbeat::new(pinger.clone(), settings(1), exit_tx, CancellationToken::new()).spawn();

    let reason = tokio::time::timeout(INTERVAL * 10, exit_rx.recv())
        .await
        .expect("loss must be reported")
        .expect("channel open");
    assert_eq!(reason, ExitReason::ControllerLost);
    assert_eq!(pinger.pings(), 3);
    assert!(handle.record().last_success.is_some());
}

// ── tolerance ───────────────────────────────────────────────────────────────

/// A healthy controller keeps the loop going with no failures recorded.
#[tokio::test]
async fn healthy_controller_keeps_worker_alive() {
    let (exit_tx, mut exit_rx) = mpsc::channel(1);
    let pinger = ScriptedPinger::new(&[Reply::Answer]);

    let handle =
        Heartbeat::new(pinger.clone(), settings(1), exit_tx, CancellationToken::new()).spawn();

    let outcome = tokio::time::timeout(INTERVAL * 5, exit_rx.recv()).await;
    assert!(outcome.is_err(), "no exit reason expected while healthy");

    let record = handle.record();
    assert_eq!(record.consecutive_failures, 0);
    assert!(record.last_success.is_some());
    assert!(pinger.pings() >= 3, "expected periodic pings, got {}", pinger.pings());
}

/// With `max_missed = 3`, two misses followed by an answer are forgiven.
#[tokio::test]
async fn transient_misses_below_threshold_are_tolerated() {
    let (exit_tx, mut exit_rx) = mpsc::channel(1);
    let pinger = ScriptedPinger::new(&[Reply::Refuse, Reply::Refuse, Reply::Answer]);

    let handle = Heartbeat::new(pinger, settings(3), exit_tx, CancellationToken::new()).spawn();
    let mut records = handle.subscribe();

    let outcome = tokio::time::timeout(INTERVAL * 6, exit_rx.recv()).await;
    assert!(outcome.is_err(), "transient misses must not stop the worker");

    let record: HeartbeatRecord = records.borrow_and_update().clone();
    assert_eq!(record.consecutive_failures, 0, "an answer resets the count");
}

/// `max_missed` consecutive misses stop the worker.
#[tokio::test]
async fn reaching_max_missed_reports_loss() {
    let (exit_tx, mut exit_rx) = mpsc::channel(1);
    let pinger = ScriptedPinger::new(&[Reply::Refuse]);

    let handle =
        Heartbeat::new(pinger.clone(), settings(3), exit_tx, CancellationToken::new()).spawn();

    let reason = tokio::time::timeout(INTERVAL * 6, exit_rx.recv())
        .await
        .expect("loss must be reported")
        .expect("channel open");
    assert_eq!(reason, ExitReason::ControllerLost);
    assert_eq!(pinger.pings(), 3);
    assert_eq!(handle.record().consecutive_failures, 3);
}

// ── shutdown ────────────────────────────────────────────────────────────────

/// Stopping the loop ends it without reporting anything.
#[tokio::test]
async fn stop_ends_loop_silently() {
    let (exit_tx, mut exit_rx) = mpsc::channel(1);
    let pinger = ScriptedPinger::new(&[Reply::Answer]);

    let handle = Heartbeat::new(pinger, settings(1), exit_tx, CancellationToken::new()).spawn();
    tokio::time::sleep(INTERVAL).await;

    tokio::time::timeout(Duration::from_secs(1), handle.await_completion())
        .await
        .expect("loop must stop promptly");

    assert!(
        exit_rx.recv().await.is_none(),
        "a stopped loop must drop its sender without reporting"
    );
}

/// Cancelling the shared token also stops the loop.
#[tokio::test]
async fn external_cancel_stops_loop() {
    let (exit_tx, mut exit_rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let pinger = ScriptedPinger::new(&[Reply::Answer]);

    let _handle = Heartbeat::new(pinger, settings(1), exit_tx, cancel.clone()).spawn();
    cancel.cancel();

    let closed = tokio::time::timeout(Duration::from_secs(1), exit_rx.recv())
        .await
        .expect("loop must exit after cancel");
    assert!(closed.is_none());
}
