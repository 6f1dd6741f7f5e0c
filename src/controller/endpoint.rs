//! Calls the worker makes into its controller.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tokio::sync::{oneshot, watch};
use tracing::{info, warn};

use crate::directory::NamingDirectory;
use crate::identity::SessionId;
use crate::ipc::client::PeerClient;
use crate::ipc::protocol::Call;
use crate::ipc::server::CallHandler;
use crate::models::session::SessionState;
use crate::{ForkError, Result};

/// Controller side of the control channel.
///
/// Owns the session state so the readiness notification, which arrives on
/// the endpoint task, and the caller-facing handle observe the same value.
pub(crate) struct ControllerEndpoint {
    identity: SessionId,
    directory: Arc<NamingDirectory>,
    state: watch::Sender<SessionState>,
    worker: OnceLock<PeerClient>,
    ready_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl ControllerEndpoint {
    pub(crate) fn new(
        identity: SessionId,
        directory: Arc<NamingDirectory>,
        ready_tx: oneshot::Sender<()>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Created);
        Self {
            identity,
            directory,
            state,
            worker: OnceLock::new(),
            ready_tx: Mutex::new(Some(ready_tx)),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Unconditional transition.
    pub(crate) fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|state| {
            let changed = *state != next;
            *state = next;
            changed
        });
    }

    /// Move to `next` only if the current state is `from`.
    pub(crate) fn transition(&self, from: SessionState, next: SessionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    /// Move to `Closing` unless already closing or closed; returns the state
    /// seen before the call.
    pub(crate) fn begin_close(&self) -> SessionState {
        let mut previous = SessionState::Closed;
        self.state.send_if_modified(|state| {
            previous = *state;
            if matches!(state, SessionState::Closing | SessionState::Closed) {
                false
            } else {
                *state = SessionState::Closing;
                true
            }
        });
        previous
    }

    pub(crate) fn worker(&self) -> Option<&PeerClient> {
        self.worker.get()
    }

    /// Accept the worker's readiness notification.
    ///
    /// # Errors
    ///
    /// - `ForkError::Handshake` if `server_name` does not belong to this
    ///   session or is not bound in the directory.
    /// - `ForkError::InvalidState` if the session is not waiting for a
    ///   handshake or a worker was already accepted.
    pub(crate) fn notify_ready(&self, server_name: &str) -> Result<()> {
        let expected = self.identity.server_name();
        if server_name != expected {
            return Err(ForkError::Handshake(format!(
                "unexpected worker name '{server_name}', expected '{expected}'"
            )));
        }

        let state = self.state();
        if !state.accepts_handshake() {
            return Err(ForkError::InvalidState(format!(
                "readiness notification not accepted in state {state:?}"
            )));
        }

        let entry = self.directory.lookup(server_name).map_err(|err| {
            ForkError::Handshake(format!("worker '{server_name}' is not discoverable: {err}"))
        })?;

        if self.worker.set(PeerClient::new(entry.endpoint)).is_err() {
            warn!(server_name, "duplicate readiness notification rejected");
            return Err(ForkError::InvalidState(format!(
                "worker '{server_name}' already reported ready"
            )));
        }

        self.transition(SessionState::Spawning, SessionState::Ready);
        self.transition(SessionState::AwaitingHandshake, SessionState::Ready);
        info!(session = %self.identity, worker_pid = entry.pid, "worker ready");

        let ready_tx = self
            .ready_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = ready_tx {
            let _ = tx.send(());
        }
        Ok(())
    }
}

impl CallHandler for ControllerEndpoint {
    async fn handle(&self, call: Call) -> Result<serde_json::Value> {
        match call {
            Call::Ping => Ok(serde_json::Value::Bool(true)),
            Call::NotifyReady { server_name } => {
                self.notify_ready(&server_name)?;
                Ok(serde_json::Value::Null)
            }
            other => Err(ForkError::Protocol(format!(
                "'{}' is not served by a controller",
                other.method()
            ))),
        }
    }
}
