//! Worker endpoint: the half of a session that runs in the spawned process.
//!
//! Startup handshake:
//!
//! 1. Validate the session identity (never guessed or defaulted).
//! 2. Start listening on the worker's own endpoint.
//! 3. Bind the server name in the naming directory.
//! 4. Look up the controller under the client name; a miss is fatal.
//! 5. Send `notify_ready(server_name)` to the controller.
//! 6. Start the heartbeat.
//!
//! The worker then serves calls until it is closed or loses its controller,
//! and [`Worker::run`] returns the [`ExitReason`].

pub mod builtins;
pub mod engine;
pub mod heartbeat;
pub mod memory;
pub mod registry;

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::config::{HeartbeatSettings, SessionSettings};
use crate::directory::NamingDirectory;
use crate::identity::SessionId;
use crate::ipc::client::{endpoint_name, PeerClient};
use crate::ipc::protocol::Call;
use crate::ipc::server::{spawn_endpoint, CallHandler};
use crate::launcher::{
    ENV_DIRECTORY, ENV_HANDSHAKE_TIMEOUT_MS, ENV_HEARTBEAT_INTERVAL_MS, ENV_HEARTBEAT_MAX_MISSED,
    ENV_MAX_MEMORY_MB,
};
use crate::worker::engine::ExecutionEngine;
use crate::worker::heartbeat::Heartbeat;
use crate::worker::memory::MemoryProbe;
use crate::worker::registry::JobRegistry;
use crate::{ForkError, Result};

/// Why a worker stopped serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The controller asked the worker to close.
    Closed,
    /// The heartbeat could not reach the controller.
    ControllerLost,
}

impl ExitReason {
    /// Process exit code for this reason.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Closed | Self::ControllerLost => 0,
        }
    }
}

/// Exit code for a worker that could not complete its startup handshake.
pub const STARTUP_FAILURE_EXIT_CODE: i32 = -1;

/// Everything a worker needs to start.
#[derive(Debug)]
pub struct WorkerOptions {
    /// Identity handed over by the controller.
    pub identity: SessionId,
    /// Shared naming directory.
    pub directory: NamingDirectory,
    /// Liveness policy.
    pub heartbeat: HeartbeatSettings,
    /// Reply bound for the readiness notification; the controller's own
    /// handshake timeout.
    pub handshake_timeout: Duration,
    /// Jobs this worker can run.
    pub registry: JobRegistry,
    /// Reported memory limit in MiB.
    pub max_memory_mb: Option<u64>,
}

impl WorkerOptions {
    /// Assemble options from the command-line identity and the `FORK_*`
    /// environment set by the controller.
    ///
    /// # Errors
    ///
    /// - `ForkError::InvalidIdentity` if `identity` is missing or malformed.
    /// - `ForkError::Config` if a required variable is missing or invalid.
    /// - `ForkError::Directory` if the naming directory does not exist.
    pub fn from_env(identity: Option<&str>, registry: JobRegistry) -> Result<Self> {
        let identity = identity.ok_or_else(|| {
            ForkError::InvalidIdentity(
                "the worker requires the session identity as its only argument".into(),
            )
        })?;
        let identity = SessionId::parse(identity)?;

        let root = std::env::var_os(ENV_DIRECTORY)
            .map(PathBuf::from)
            .ok_or_else(|| ForkError::Config(format!("{ENV_DIRECTORY} is not set")))?;
        let directory = NamingDirectory::open(root)?;

        let mut heartbeat = HeartbeatSettings::default();
        if let Some(ms) = env_number::<u64>(ENV_HEARTBEAT_INTERVAL_MS)? {
            if ms == 0 {
                return Err(ForkError::Config(format!(
                    "{ENV_HEARTBEAT_INTERVAL_MS} must be greater than zero"
                )));
            }
            heartbeat.interval = Duration::from_millis(ms);
        }
        if let Some(max_missed) = env_number::<u32>(ENV_HEARTBEAT_MAX_MISSED)? {
            heartbeat.max_missed = max_missed.max(1);
        }

        let handshake_timeout = match env_number::<u64>(ENV_HANDSHAKE_TIMEOUT_MS)? {
            Some(0) => {
                return Err(ForkError::Config(format!(
                    "{ENV_HANDSHAKE_TIMEOUT_MS} must be greater than zero"
                )))
            }
            Some(ms) => Duration::from_millis(ms),
            None => SessionSettings::default().handshake_timeout,
        };

        Ok(Self {
            identity,
            directory,
            heartbeat,
            handshake_timeout,
            registry,
            max_memory_mb: env_number::<u64>(ENV_MAX_MEMORY_MB)?,
        })
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ForkError::Config(format!("{key}='{raw}' is not a valid number"))),
        Err(_) => Ok(None),
    }
}

/// A worker that has completed its handshake and is serving calls.
pub struct Worker {
    identity: SessionId,
    endpoint: Arc<WorkerEndpoint>,
    exit_rx: mpsc::Receiver<ExitReason>,
    heartbeat: heartbeat::HeartbeatHandle,
    listener_cancel: CancellationToken,
}

impl Worker {
    /// Run the startup handshake.
    ///
    /// # Errors
    ///
    /// - `ForkError::NameConflict` if the server name is already bound.
    /// - `ForkError::Handshake` if the controller is not registered or
    ///   rejects the readiness notification.
    /// - `ForkError::Io` if the endpoint cannot be created.
    pub async fn start(options: WorkerOptions) -> Result<Self> {
        let WorkerOptions {
            identity,
            directory,
            heartbeat,
            handshake_timeout,
            registry,
            max_memory_mb,
        } = options;

        let span = info_span!("worker", session = %identity);
        async move {
            let server_name = identity.server_name();
            let client_name = identity.client_name();
            let endpoint = endpoint_name(&server_name);
            let directory = Arc::new(directory);
            let (exit_tx, exit_rx) = mpsc::channel(1);
            let heartbeat_cancel = CancellationToken::new();
            let listener_cancel = CancellationToken::new();

            let shared = Arc::new(WorkerEndpoint {
                server_name: server_name.clone(),
                directory: Arc::clone(&directory),
                engine: ExecutionEngine::new(registry),
                memory: MemoryProbe::new(max_memory_mb),
                exit_tx: exit_tx.clone(),
                heartbeat_cancel: heartbeat_cancel.clone(),
                close_grace: heartbeat.close_grace(),
                closing: AtomicBool::new(false),
            });

            // Listen before publishing so a lookup never yields a dead endpoint.
            spawn_endpoint(&endpoint, Arc::clone(&shared), listener_cancel.clone())?;

            if let Err(err) = directory.bind(&server_name, &endpoint) {
                listener_cancel.cancel();
                return Err(err);
            }

            let controller = match directory.lookup(&client_name) {
                Ok(entry) => PeerClient::new(entry.endpoint),
                Err(err) => {
                    warn!(%err, "controller is not registered");
                    let _ = directory.unbind(&server_name);
                    listener_cancel.cancel();
                    return Err(ForkError::Handshake(format!(
                        "controller '{client_name}' not found: {err}"
                    )));
                }
            };

            info!(controller = controller.endpoint(), "contacting controller");
            let notify = Call::NotifyReady {
                server_name: server_name.clone(),
            };
            if let Err(err) = controller.call(notify, handshake_timeout).await {
                let _ = directory.unbind(&server_name);
                listener_cancel.cancel();
                return Err(ForkError::Handshake(format!(
                    "controller rejected readiness: {err}"
                )));
            }

            let heartbeat = Heartbeat::new(controller, heartbeat, exit_tx, heartbeat_cancel).spawn();
            info!("worker ready");

            Ok(Self {
                identity,
                endpoint: shared,
                exit_rx,
                heartbeat,
                listener_cancel,
            })
        }
        .instrument(span)
        .await
    }

    /// Identity of the session this worker serves.
    #[must_use]
    pub fn identity(&self) -> SessionId {
        self.identity
    }

    /// Latest heartbeat record.
    #[must_use]
    pub fn heartbeat(&self) -> crate::models::heartbeat::HeartbeatRecord {
        self.heartbeat.record()
    }

    /// Serve calls until the worker is closed or loses its controller.
    pub async fn run(self) -> ExitReason {
        self.run_until(std::future::pending()).await
    }

    /// [`run`](Self::run), also stopping when `shutdown` completes.
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) -> ExitReason {
        let reason = tokio::select! {
            reason = self.exit_rx.recv() => reason.unwrap_or(ExitReason::Closed),
            () = shutdown => {
                info!("shutdown signal received");
                ExitReason::Closed
            }
        };
        info!(session = %self.identity, ?reason, "worker stopping");

        self.heartbeat.stop();
        // Already gone after a close request; still ours otherwise.
        if let Err(err) = self.endpoint.directory.unbind(&self.endpoint.server_name) {
            warn!(%err, "failed to unbind server name");
        }
        self.listener_cancel.cancel();
        reason
    }
}

/// Call handler for the worker's endpoint.
struct WorkerEndpoint {
    server_name: String,
    directory: Arc<NamingDirectory>,
    engine: ExecutionEngine,
    memory: MemoryProbe,
    exit_tx: mpsc::Sender<ExitReason>,
    heartbeat_cancel: CancellationToken,
    close_grace: Duration,
    closing: AtomicBool,
}

impl WorkerEndpoint {
    /// Unbind, stop pinging, and exit after the grace delay so the reply to
    /// this call still reaches the controller.
    fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        // Absent or not ours: either way there is nothing left to release.
        if let Err(err) = self.directory.unbind(&self.server_name) {
            warn!(%err, "failed to unbind server name");
        }
        self.heartbeat_cancel.cancel();

        let exit_tx = self.exit_tx.clone();
        let grace = self.close_grace;
        info!(?grace, "close requested; exiting after grace delay");
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = exit_tx.send(ExitReason::Closed).await;
        });
    }
}

impl CallHandler for WorkerEndpoint {
    async fn handle(&self, call: Call) -> Result<serde_json::Value> {
        match call {
            Call::Ping | Call::Alive => Ok(serde_json::Value::Bool(true)),
            Call::Execute { job, timeout_ms } => {
                let span = info_span!("execute", tag = %job.tag, timeout_ms);
                self.engine
                    .execute(job, Duration::from_millis(timeout_ms))
                    .instrument(span)
                    .await
            }
            Call::Submit { job } => {
                let span = info_span!("submit", tag = %job.tag);
                self.engine
                    .submit(job)
                    .instrument(span)
                    .await
                    .map(|()| serde_json::Value::Null)
            }
            Call::AddSearchPath { path } => {
                self.engine.add_search_path(path)?;
                Ok(serde_json::Value::Null)
            }
            Call::TotalMemory => Ok(self.memory.total_memory().into()),
            Call::MaxMemory => Ok(self.memory.max_memory().into()),
            Call::FreeMemory => Ok(self.memory.free_memory().into()),
            Call::Close => {
                self.close();
                Ok(serde_json::Value::Null)
            }
            Call::NotifyReady { .. } => Err(ForkError::Protocol(
                "notify_ready is not served by a worker".into(),
            )),
        }
    }
}
