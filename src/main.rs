#![forbid(unsafe_code)]

//! `fork-worker`: worker process for a fork session.
//!
//! Started by a controller with the session identity as its only argument
//! and the `FORK_*` environment describing where to rendezvous. Exits with
//! `0` when closed or orphaned and `-1` when the startup handshake fails.

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use fork_session::worker::registry::JobRegistry;
use fork_session::worker::{Worker, WorkerOptions, STARTUP_FAILURE_EXIT_CODE};
use fork_session::{ForkError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "fork-worker", about = "Fork session worker process", version, long_about = None)]
struct Cli {
    /// Session identity handed over by the controller.
    identity: Option<String>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("fork-worker: {err}");
    }

    let code = match start(&args) {
        Ok(code) => code,
        Err(err) => {
            error!(%err, "worker startup failed");
            STARTUP_FAILURE_EXIT_CODE
        }
    };
    std::process::exit(code);
}

fn start(args: &Cli) -> Result<i32> {
    let options = WorkerOptions::from_env(args.identity.as_deref(), JobRegistry::with_builtins())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| ForkError::Config(format!("failed to build tokio runtime: {err}")))?;

    let outcome = runtime.block_on(async move {
        info!(session = %options.identity, "fork-worker starting");
        let worker = Worker::start(options).await?;
        let reason = worker.run_until(shutdown_signal()).await;
        info!(?reason, "fork-worker exiting");
        Ok::<_, ForkError>(reason.exit_code())
    });

    // Jobs that overran their budget may still be running; exiting reclaims them.
    runtime.shutdown_background();
    outcome
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

/// Logs go to stderr; the controller relays them.
fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| ForkError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| ForkError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
