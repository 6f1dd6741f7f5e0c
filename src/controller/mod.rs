//! Controller handle: the calling side of a fork session.
//!
//! [`Controller::open`] binds the client name, launches the worker with the
//! session identity as its last argument, and waits (bounded) for the
//! worker's readiness notification. Afterwards the handle forwards jobs and
//! queries to the worker until [`Controller::close`].

mod endpoint;

use std::collections::HashMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::SessionSettings;
use crate::directory::NamingDirectory;
use crate::identity::SessionId;
use crate::ipc::client::{endpoint_name, PeerClient};
use crate::ipc::protocol::Call;
use crate::ipc::server::spawn_endpoint;
use crate::launcher::{
    drain_output, LaunchCommand, Launcher, ENV_DIRECTORY, ENV_HANDSHAKE_TIMEOUT_MS,
    ENV_HEARTBEAT_INTERVAL_MS, ENV_HEARTBEAT_MAX_MISSED,
};
use crate::models::job::{JobPayload, RemoteOperation};
use crate::models::session::SessionState;
use crate::{ForkError, Result};

use self::endpoint::ControllerEndpoint;

/// How often [`Controller::wait_for_exit`] checks the worker process.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One controller/worker pairing, seen from the controller process.
pub struct Controller {
    identity: SessionId,
    settings: SessionSettings,
    directory: Arc<NamingDirectory>,
    endpoint: Arc<ControllerEndpoint>,
    child: Mutex<Child>,
    worker_pid: Option<u32>,
    output_tasks: StdMutex<Vec<JoinHandle<()>>>,
    listener_cancel: CancellationToken,
}

impl Controller {
    /// Start a session: bind the client name, launch the worker and wait
    /// for its readiness notification.
    ///
    /// `environment` is added to the inherited environment of the worker.
    ///
    /// # Errors
    ///
    /// - `ForkError::NameConflict` if the client name is already bound.
    /// - `ForkError::Launch` if the launch command cannot be built or the
    ///   process cannot be started.
    /// - `ForkError::HandshakeTimeout` if the worker does not report ready
    ///   within the handshake timeout.
    /// - `ForkError::Handshake` if the worker exits before reporting ready.
    pub async fn open(
        directory: Arc<NamingDirectory>,
        settings: SessionSettings,
        launcher: &dyn Launcher,
        environment: &HashMap<String, String>,
    ) -> Result<Self> {
        let identity = SessionId::generate();
        let span = info_span!("controller", session = %identity);
        Self::start(identity, directory, settings, launcher, environment)
            .instrument(span)
            .await
    }

    async fn start(
        identity: SessionId,
        directory: Arc<NamingDirectory>,
        settings: SessionSettings,
        launcher: &dyn Launcher,
        environment: &HashMap<String, String>,
    ) -> Result<Self> {
        let client_name = identity.client_name();
        let client_endpoint = endpoint_name(&client_name);
        let (ready_tx, ready_rx) = oneshot::channel();
        let endpoint = Arc::new(ControllerEndpoint::new(
            identity,
            Arc::clone(&directory),
            ready_tx,
        ));
        let listener_cancel = CancellationToken::new();

        if let Err(err) = spawn_endpoint(
            &client_endpoint,
            Arc::clone(&endpoint),
            listener_cancel.clone(),
        ) {
            endpoint.set_state(SessionState::Failed);
            return Err(err);
        }

        // The worker looks this name up first thing; it must exist before launch.
        if let Err(err) = directory.bind(&client_name, &client_endpoint) {
            endpoint.set_state(SessionState::Failed);
            listener_cancel.cancel();
            return Err(err);
        }
        endpoint.transition(SessionState::Created, SessionState::Spawning);
        debug!(name = %client_name, endpoint = %client_endpoint, "client name bound");

        let abandon = |err: ForkError| {
            if let Err(unbind_err) = directory.unbind(&client_name) {
                warn!(%unbind_err, "failed to unbind client name");
            }
            listener_cancel.cancel();
            endpoint.set_state(SessionState::Failed);
            err
        };

        let launch = launcher
            .build(&identity)
            .map_err(|err| match err {
                ForkError::Launch(_) => err,
                other => ForkError::Launch(other.to_string()),
            })
            .map_err(&abandon)?;
        let mut child =
            spawn_worker(&launch, environment, &directory, &settings).map_err(&abandon)?;

        let worker_pid = child.id();
        info!(pid = worker_pid.unwrap_or(0), program = %launch.program.display(), "worker spawned");

        let mut output_tasks = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            output_tasks.push(drain_output(identity, "stdout", stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            output_tasks.push(drain_output(identity, "stderr", stderr));
        }

        endpoint.transition(SessionState::Spawning, SessionState::AwaitingHandshake);

        if let Err(err) = await_ready(&mut child, ready_rx, settings.handshake_timeout).await {
            warn!(%err, "handshake failed");
            if let Err(kill_err) = child.start_kill() {
                debug!(%kill_err, "worker already gone");
            }
            return Err(abandon(err));
        }

        info!("session ready");
        Ok(Self {
            identity,
            settings,
            directory,
            endpoint,
            child: Mutex::new(child),
            worker_pid,
            output_tasks: StdMutex::new(output_tasks),
            listener_cancel,
        })
    }

    /// Session identity shared with the worker.
    #[must_use]
    pub fn identity(&self) -> SessionId {
        self.identity
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.endpoint.state()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.endpoint.subscribe()
    }

    /// OS process id of the worker, if it was known at spawn time.
    #[must_use]
    pub fn worker_pid(&self) -> Option<u32> {
        self.worker_pid
    }

    /// Timing policy of this session.
    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Liveness responder. The worker's heartbeat calls this; answering at
    /// all is the signal.
    #[must_use]
    pub fn ping(&self) -> bool {
        true
    }

    /// Accept a readiness notification for `server_name`.
    ///
    /// The worker delivers this over the control channel during
    /// [`open`](Self::open); only the first notification is accepted.
    ///
    /// # Errors
    ///
    /// - `ForkError::Handshake` if the name is foreign or not bound.
    /// - `ForkError::InvalidState` if a worker was already accepted.
    pub fn notify_ready(&self, server_name: &str) -> Result<()> {
        self.endpoint.notify_ready(server_name)
    }

    /// Run `op` in the worker and wait at most `budget` for its result.
    ///
    /// # Errors
    ///
    /// - `ForkError::InvalidState` unless the session is ready and idle.
    /// - `ForkError::ExecutionTimeout` if `op` overruns `budget`; it keeps
    ///   running in the worker.
    /// - `ForkError::ExecutionFailed` if `op` raised.
    /// - `ForkError::ConnectivityLost` if the worker cannot be reached or
    ///   does not answer within `budget` plus the reply grace.
    pub async fn run<Op: RemoteOperation>(&self, op: Op, budget: Duration) -> Result<Op::Output> {
        let job = JobPayload::encode(op)?;
        let (_executing, worker) = self.begin_call()?;

        let timeout_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
        debug!(tag = Op::TAG, ?budget, "running job");

        let value = worker
            .call(
                Call::Execute { job, timeout_ms },
                budget.saturating_add(self.settings.reply_grace),
            )
            .await?;
        decode(value)
    }

    /// [`run`](Self::run) with the configured default budget.
    ///
    /// # Errors
    ///
    /// As for [`run`](Self::run).
    pub async fn run_default<Op: RemoteOperation>(&self, op: Op) -> Result<Op::Output> {
        self.run(op, self.settings.default_execution_timeout).await
    }

    /// [`run`](Self::run), but stop waiting as soon as `cancel` fires.
    ///
    /// Cancelling only abandons the wait. The job itself keeps running in
    /// the worker.
    ///
    /// # Errors
    ///
    /// `ForkError::Cancelled` if `cancel` fired first, otherwise as for
    /// [`run`](Self::run).
    pub async fn run_cancellable<Op: RemoteOperation>(
        &self,
        op: Op,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<Op::Output> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!(tag = Op::TAG, "caller stopped waiting; job left to the worker");
                Err(ForkError::Cancelled(format!("wait for job '{}' was cancelled", Op::TAG)))
            }
            result = self.run(op, budget) => result,
        }
    }

    /// Run `op` in the worker to completion and discard its result.
    ///
    /// No budget applies.
    ///
    /// # Errors
    ///
    /// - `ForkError::InvalidState` unless the session is ready and idle.
    /// - `ForkError::ExecutionFailed` if `op` raised.
    /// - `ForkError::ConnectivityLost` if the worker cannot be reached.
    pub async fn submit<Op: RemoteOperation>(&self, op: Op) -> Result<()> {
        let job = JobPayload::encode(op)?;
        let (_executing, worker) = self.begin_call()?;
        debug!(tag = Op::TAG, "submitting job");
        worker.call(Call::Submit { job }, Duration::MAX).await?;
        Ok(())
    }

    /// Extend the worker's job search path.
    ///
    /// # Errors
    ///
    /// `ForkError::NotFound` if the worker has no such directory, or as for
    /// any query.
    pub async fn add_search_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_string_lossy().into_owned();
        self.query(Call::AddSearchPath { path }).await?;
        Ok(())
    }

    /// Worker resident memory, in bytes.
    ///
    /// # Errors
    ///
    /// `ForkError::InvalidState` if not connected, `ForkError::ConnectivityLost`
    /// if the worker does not answer.
    pub async fn total_memory(&self) -> Result<u64> {
        decode(self.query(Call::TotalMemory).await?)
    }

    /// Worker memory limit, in bytes.
    ///
    /// # Errors
    ///
    /// As for [`total_memory`](Self::total_memory).
    pub async fn max_memory(&self) -> Result<u64> {
        decode(self.query(Call::MaxMemory).await?)
    }

    /// Headroom below the worker's memory limit, in bytes.
    ///
    /// # Errors
    ///
    /// As for [`total_memory`](Self::total_memory).
    pub async fn free_memory(&self) -> Result<u64> {
        decode(self.query(Call::FreeMemory).await?)
    }

    /// Whether the worker answers an explicit liveness query.
    pub async fn alive(&self) -> bool {
        match self.query(Call::Alive).await {
            Ok(value) => value.as_bool().unwrap_or(false),
            Err(err) => {
                debug!(%err, "worker did not answer alive");
                false
            }
        }
    }

    /// Whether the worker process is still running.
    pub async fn worker_running(&self) -> bool {
        let mut child = self.child.lock().await;
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(status = %describe_exit(status), "worker process has exited");
                false
            }
            Err(err) => {
                warn!(%err, "failed to poll worker process status");
                false
            }
        }
    }

    /// Wait up to `timeout` for the worker process to exit.
    ///
    /// Returns `None` if it is still running when the timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns `ForkError::Io` if the process status cannot be read.
    pub async fn wait_for_exit(&self, timeout: Duration) -> Result<Option<ExitStatus>> {
        let deadline = tokio::time::Instant::now() + timeout;
        // The child lock is only held per poll so status queries stay prompt.
        let status = loop {
            if let Some(status) = self.child.lock().await.try_wait()? {
                break status;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL.min(deadline - now)).await;
        };
        info!(status = %describe_exit(status), "worker process exited");

        // Both streams hit EOF once the process is gone; flush what is left.
        let tasks: Vec<_> = self
            .output_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(err) = task.await {
                debug!(%err, "worker output drain task failed");
            }
        }

        Ok(Some(status))
    }

    /// Tear the session down: unbind the client name, ask the worker to
    /// close, stop listening.
    ///
    /// Safe to call more than once; later calls return `Ok(())` at once.
    /// The worker process exits on its own after its close grace.
    ///
    /// # Errors
    ///
    /// Connectivity failures while asking the worker to close are logged,
    /// not returned.
    pub async fn close(&self) -> Result<()> {
        let previous = self.endpoint.begin_close();
        if matches!(previous, SessionState::Closing | SessionState::Closed) {
            debug!(session = %self.identity, "close already requested");
            return Ok(());
        }

        let span = info_span!("close", session = %self.identity);
        async {
            info!(?previous, "closing session");

            // An absent name is fine; anything else is still not fatal here.
            if let Err(err) = self.directory.unbind(&self.identity.client_name()) {
                warn!(%err, "failed to unbind client name");
            }

            if let Some(worker) = self.endpoint.worker() {
                match worker.call(Call::Close, self.settings.reply_grace).await {
                    Ok(_) => debug!("worker acknowledged close"),
                    Err(err) => warn!(%err, "worker did not acknowledge close"),
                }
            }

            self.listener_cancel.cancel();
            self.endpoint.set_state(SessionState::Closed);
            info!("session closed");
        }
        .instrument(span)
        .await;

        Ok(())
    }

    /// Claim the session for one in-flight job.
    fn begin_call(&self) -> Result<(ExecutingGuard<'_>, &PeerClient)> {
        if !self
            .endpoint
            .transition(SessionState::Ready, SessionState::Executing)
        {
            return Err(ForkError::InvalidState(format!(
                "cannot run a job in state {:?}",
                self.state()
            )));
        }
        let guard = ExecutingGuard {
            endpoint: &self.endpoint,
        };
        let worker = self.connected_worker()?;
        Ok((guard, worker))
    }

    async fn query(&self, call: Call) -> Result<serde_json::Value> {
        let state = self.state();
        if !state.is_connected() {
            return Err(ForkError::InvalidState(format!(
                "cannot call '{}' in state {state:?}",
                call.method()
            )));
        }
        self.connected_worker()?
            .call(call, self.settings.reply_grace)
            .await
    }

    fn connected_worker(&self) -> Result<&PeerClient> {
        self.endpoint
            .worker()
            .ok_or_else(|| ForkError::InvalidState("no worker has reported ready".into()))
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.listener_cancel.cancel();
        if self.endpoint.state() != SessionState::Closed {
            // Dropped without close: release our name; kill_on_drop reaps the worker.
            let _ = self.directory.unbind(&self.identity.client_name());
        }
    }
}

/// Returns the session to `Ready` when the in-flight call ends, unless it
/// was closed meanwhile.
struct ExecutingGuard<'a> {
    endpoint: &'a ControllerEndpoint,
}

impl Drop for ExecutingGuard<'_> {
    fn drop(&mut self) {
        self.endpoint
            .transition(SessionState::Executing, SessionState::Ready);
    }
}

/// Start the worker process described by `launch`.
fn spawn_worker(
    launch: &LaunchCommand,
    environment: &HashMap<String, String>,
    directory: &NamingDirectory,
    settings: &SessionSettings,
) -> Result<Child> {
    let mut command = Command::new(&launch.program);
    command
        .args(&launch.args)
        .envs(&launch.env)
        .envs(environment)
        .env(ENV_DIRECTORY, directory.root())
        .env(
            ENV_HEARTBEAT_INTERVAL_MS,
            settings.heartbeat.interval.as_millis().to_string(),
        )
        .env(
            ENV_HEARTBEAT_MAX_MISSED,
            settings.heartbeat.max_missed.to_string(),
        )
        .env(
            ENV_HANDSHAKE_TIMEOUT_MS,
            settings.handshake_timeout.as_millis().to_string(),
        )
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    command.spawn().map_err(|err| {
        ForkError::Launch(format!(
            "failed to start {}: {err}",
            launch.program.display()
        ))
    })
}

/// Wait for the readiness notification, bounded by `timeout` and by the
/// worker staying alive.
async fn await_ready(
    child: &mut Child,
    ready_rx: oneshot::Receiver<()>,
    timeout: Duration,
) -> Result<()> {
    tokio::select! {
        biased;
        ready = tokio::time::timeout(timeout, ready_rx) => match ready {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ForkError::Handshake("readiness channel closed".into())),
            Err(_elapsed) => Err(ForkError::HandshakeTimeout(format!(
                "worker did not report ready within {timeout:?}"
            ))),
        },
        status = child.wait() => Err(ForkError::Handshake(match status {
            Ok(status) => format!("worker {} before reporting ready", describe_exit(status)),
            Err(err) => format!("lost track of the worker process: {err}"),
        })),
    }
}

fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|err| ForkError::Protocol(format!("unexpected reply payload: {err}")))
}

/// Human-readable exit status.
fn describe_exit(status: ExitStatus) -> String {
    if status.success() {
        "exited normally (code 0)".to_owned()
    } else {
        status.code().map_or_else(
            || "was terminated by a signal".to_owned(),
            |code| format!("exited with code {code}"),
        )
    }
}
