//! Worker → controller liveness loop.
//!
//! The worker pings its controller every interval. Each ping must be
//! answered within one interval; after `max_missed` consecutive failures the
//! loop reports [`ExitReason::ControllerLost`] and stops. With the default
//! `max_missed = 1` a dead controller is noticed within two intervals.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, trace, warn, Instrument};

use crate::config::HeartbeatSettings;
use crate::ipc::client::PeerClient;
use crate::ipc::protocol::Call;
use crate::models::heartbeat::HeartbeatRecord;
use crate::worker::ExitReason;
use crate::Result;

/// Something the heartbeat can probe.
pub trait Pinger: Send + Sync + 'static {
    /// Probe once, giving up after `wait`.
    fn ping(&self, wait: Duration) -> impl Future<Output = Result<()>> + Send;
}

impl Pinger for PeerClient {
    async fn ping(&self, wait: Duration) -> Result<()> {
        self.call(Call::Ping, wait).await.map(|_| ())
    }
}

/// Builder for the heartbeat loop.
///
/// Call [`spawn`](Self::spawn) to start it.
pub struct Heartbeat<P> {
    pinger: P,
    settings: HeartbeatSettings,
    exit_tx: mpsc::Sender<ExitReason>,
    cancel: CancellationToken,
}

impl<P: Pinger> Heartbeat<P> {
    /// Construct a heartbeat (does not start pinging yet).
    #[must_use]
    pub fn new(
        pinger: P,
        settings: HeartbeatSettings,
        exit_tx: mpsc::Sender<ExitReason>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pinger,
            settings,
            exit_tx,
            cancel,
        }
    }

    /// Start the loop on its own task.
    #[must_use]
    pub fn spawn(self) -> HeartbeatHandle {
        let (record_tx, record_rx) = watch::channel(HeartbeatRecord::default());
        let cancel = self.cancel.clone();
        let join_handle = tokio::spawn(self.run(record_tx).instrument(info_span!("heartbeat")));

        HeartbeatHandle {
            record: record_rx,
            cancel,
            join_handle: Some(join_handle),
        }
    }

    async fn run(self, record_tx: watch::Sender<HeartbeatRecord>) {
        let interval = self.settings.interval;

        loop {
            let outcome = tokio::select! {
                () = self.cancel.cancelled() => {
                    debug!("heartbeat stopped");
                    return;
                }
                outcome = self.pinger.ping(interval) => outcome,
            };

            match outcome {
                Ok(()) => {
                    trace!("controller answered ping");
                    record_tx.send_modify(HeartbeatRecord::record_success);
                }
                Err(err) => {
                    let mut failures = 0;
                    record_tx.send_modify(|record| failures = record.record_failure());
                    warn!(%err, failures, max_missed = self.settings.max_missed, "ping failed");

                    if failures >= self.settings.max_missed {
                        warn!("controller unreachable; worker will exit");
                        let _ = self.exit_tx.send(ExitReason::ControllerLost).await;
                        return;
                    }
                }
            }

            tokio::select! {
                () = self.cancel.cancelled() => {
                    debug!("heartbeat stopped");
                    return;
                }
                () = tokio::time::sleep(interval) => {}
            }
        }
    }
}

/// Handle returned from [`Heartbeat::spawn`].
pub struct HeartbeatHandle {
    record: watch::Receiver<HeartbeatRecord>,
    cancel: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

impl HeartbeatHandle {
    /// Latest heartbeat record.
    #[must_use]
    pub fn record(&self) -> HeartbeatRecord {
        self.record.borrow().clone()
    }

    /// Receiver that observes every record update.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<HeartbeatRecord> {
        self.record.clone()
    }

    /// Stop pinging.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop pinging and wait for the loop to exit.
    pub async fn await_completion(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
