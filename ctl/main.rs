#![forbid(unsafe_code)]

//! `fork-ctl`: operator CLI for fork sessions.
//!
//! Opens one session, runs a single built-in job or query against the
//! worker, prints the JSON result and closes the session.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

use fork_session::worker::builtins::{Echo, Fail, ResolvePath, Sleep};
use fork_session::{Controller, Coordinator, ForkConfig, ForkError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "fork-ctl",
    about = "Run a job in a freshly forked worker process",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker executable; overrides `[worker] program`.
    ///
    /// Defaults to the `fork-worker` binary next to this one.
    #[arg(long)]
    worker: Option<PathBuf>,

    /// Execution budget in seconds; defaults to `[timeouts] execution_seconds`.
    #[arg(long)]
    timeout: Option<u64>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Return a JSON value from the worker unchanged.
    Echo {
        /// JSON value; plain text is sent as a string.
        value: String,
    },

    /// Sleep in the worker, then return a value.
    Sleep {
        /// How long the job sleeps.
        millis: u64,
        /// JSON value returned after the sleep.
        #[arg(long, default_value = "null")]
        value: String,
    },

    /// Run a job that always fails.
    Fail {
        /// Failure cause reported back.
        message: String,
    },

    /// Look a file up in the worker's search paths.
    Resolve {
        /// File name to look up.
        name: String,
        /// Directories added to the worker's search path first.
        #[arg(long = "search-path")]
        search_paths: Vec<PathBuf>,
    },

    /// Report the worker's memory figures.
    Memory,

    /// Ask the worker whether it is alive.
    Alive,
}

fn main() {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("fork-ctl: {err}");
    }

    let outcome = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| ForkError::Config(format!("failed to build tokio runtime: {err}")))
        .and_then(|runtime| runtime.block_on(run(args)));

    match outcome {
        Ok(output) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string())
            );
        }
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}

async fn run(args: Cli) -> Result<serde_json::Value> {
    let mut config = match &args.config {
        Some(path) => ForkConfig::load_from_path(path)?,
        None => ForkConfig::for_program(default_worker()?),
    };
    if let Some(worker) = args.worker {
        config.worker.program = worker;
    }

    let coordinator = Coordinator::new(config)?;
    let controller = coordinator.open_default().await?;
    debug!(session = %controller.identity(), "session open");

    let budget = args
        .timeout
        .map_or(coordinator.settings().default_execution_timeout, Duration::from_secs);
    let result = dispatch(&controller, args.command, budget).await;

    controller.close().await?;
    result
}

async fn dispatch(
    controller: &Controller,
    command: Command,
    budget: Duration,
) -> Result<serde_json::Value> {
    match command {
        Command::Echo { value } => controller.run(Echo { value: parse_value(&value) }, budget).await,
        Command::Sleep { millis, value } => {
            let value = parse_value(&value);
            controller.run(Sleep { millis, value }, budget).await
        }
        Command::Fail { message } => {
            controller.run(Fail { message }, budget).await?;
            Ok(serde_json::Value::Null)
        }
        Command::Resolve { name, search_paths } => {
            for path in &search_paths {
                controller.add_search_path(path).await?;
            }
            let found = controller.run(ResolvePath { name }, budget).await?;
            Ok(serde_json::json!({ "path": found }))
        }
        Command::Memory => Ok(serde_json::json!({
            "total": controller.total_memory().await?,
            "max": controller.max_memory().await?,
            "free": controller.free_memory().await?,
        })),
        Command::Alive => Ok(serde_json::Value::Bool(controller.alive().await)),
    }
}

/// Interpret `raw` as JSON, falling back to a plain string.
fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_owned()))
}

/// The `fork-worker` binary installed next to this executable.
fn default_worker() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe
        .parent()
        .ok_or_else(|| ForkError::Config(format!("{} has no parent directory", exe.display())))?;
    Ok(dir.join(format!("fork-worker{}", std::env::consts::EXE_SUFFIX)))
}

/// Logs go to stderr so stdout carries only the result.
fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

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
