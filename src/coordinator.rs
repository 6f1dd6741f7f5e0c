//! Coordinator: owns the naming directory and opens sessions against it.
//!
//! One coordinator per controller process is the expected shape, but nothing
//! enforces it; callers pass the coordinator around explicitly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use crate::config::{ForkConfig, SessionSettings};
use crate::controller::Controller;
use crate::directory::NamingDirectory;
use crate::launcher::Launcher;
use crate::Result;

/// Entry point for opening fork sessions.
#[derive(Debug)]
pub struct Coordinator {
    config: ForkConfig,
    directory: Mutex<Option<Arc<NamingDirectory>>>,
}

impl Coordinator {
    /// Coordinator for a validated configuration.
    ///
    /// The naming directory is created on first use.
    ///
    /// # Errors
    ///
    /// Returns `ForkError::Config` if `config` fails validation.
    pub fn new(config: ForkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            directory: Mutex::new(None),
        })
    }

    /// Configuration this coordinator was built from.
    #[must_use]
    pub fn config(&self) -> &ForkConfig {
        &self.config
    }

    /// Timing policy applied to every session.
    #[must_use]
    pub fn settings(&self) -> SessionSettings {
        self.config.session_settings()
    }

    /// The naming directory, created on the first call and reused after.
    ///
    /// # Errors
    ///
    /// Returns `ForkError::Directory` if the directory cannot be created.
    pub fn directory(&self) -> Result<Arc<NamingDirectory>> {
        let mut slot = self.directory.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(directory) = slot.as_ref() {
            return Ok(Arc::clone(directory));
        }

        let directory = Arc::new(match &self.config.directory_root {
            Some(root) => NamingDirectory::create_at(root)?,
            None => NamingDirectory::create()?,
        });
        info!(root = %directory.root().display(), "naming directory created");
        *slot = Some(Arc::clone(&directory));
        Ok(directory)
    }

    /// Open a session whose worker is started by `launcher` with
    /// `environment` added to the inherited environment.
    ///
    /// # Errors
    ///
    /// As for [`Controller::open`], plus `ForkError::Directory` if the
    /// naming directory cannot be created.
    pub async fn open(
        &self,
        launcher: &dyn Launcher,
        environment: &HashMap<String, String>,
    ) -> Result<Controller> {
        let directory = self.directory()?;
        Controller::open(directory, self.settings(), launcher, environment).await
    }

    /// Open a session using the configured worker.
    ///
    /// # Errors
    ///
    /// As for [`open`](Self::open).
    pub async fn open_default(&self) -> Result<Controller> {
        self.open(&self.config.launch_config(), &HashMap::new())
            .await
    }
}
