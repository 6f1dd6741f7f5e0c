//! Naming directory shared by the controller and worker processes.
//!
//! The two processes do not share memory, so the rendezvous point lives on
//! the file system: one directory, one JSON file per bound name. Binding is
//! an atomic no-clobber create, which gives the "bind fails if already
//! bound" contract without any cross-process lock.
//!
//! Each side only ever writes and removes its own entry; [`NamingDirectory::unbind`]
//! refuses to remove an entry recorded by another process.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::{NamedTempFile, TempDir};
use tracing::debug;

use crate::{ForkError, Result};

/// File extension used for entry files.
const ENTRY_EXTENSION: &str = "json";

/// One bound name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// The bound name, e.g. `<uuid>_client`.
    pub name: String,
    /// Local-socket name where the owner accepts calls.
    pub endpoint: String,
    /// Process that bound the name.
    pub pid: u32,
    /// When the name was bound.
    pub bound_at: DateTime<Utc>,
}

/// Name → endpoint registry reachable from every process that knows its root.
#[derive(Debug)]
pub struct NamingDirectory {
    root: PathBuf,
    /// Present when this instance created the directory and removes it on drop.
    _owned: Option<TempDir>,
}

impl NamingDirectory {
    /// Create a private directory under the system temp location.
    ///
    /// The directory is removed when this instance is dropped.
    ///
    /// # Errors
    ///
    /// Returns `ForkError::Directory` if the directory cannot be created.
    pub fn create() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("fork-directory-")
            .tempdir()
            .map_err(|err| ForkError::Directory(format!("failed to create directory: {err}")))?;

        Ok(Self {
            root: dir.path().to_path_buf(),
            _owned: Some(dir),
        })
    }

    /// Create (if needed) and use a directory at a caller-chosen location.
    ///
    /// The directory is left in place on drop.
    ///
    /// # Errors
    ///
    /// Returns `ForkError::Directory` if the directory cannot be created.
    pub fn create_at(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).map_err(|err| {
            ForkError::Directory(format!("failed to create {}: {err}", root.display()))
        })?;
        Self::open(root)
    }

    /// Attach to an existing directory created by another process.
    ///
    /// # Errors
    ///
    /// Returns `ForkError::Directory` if `root` does not exist or is not a
    /// directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(ForkError::Directory(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        Ok(Self {
            root: root.to_path_buf(),
            _owned: None,
        })
    }

    /// Root path, handed to the worker at launch.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bind `name` to `endpoint`, owned by the current process.
    ///
    /// # Errors
    ///
    /// - `ForkError::NameConflict` if `name` is already bound.
    /// - `ForkError::Directory` if `name` is malformed or the entry cannot be
    ///   written.
    pub fn bind(&self, name: &str, endpoint: &str) -> Result<()> {
        let path = self.entry_path(name)?;

        let entry = DirectoryEntry {
            name: name.to_owned(),
            endpoint: endpoint.to_owned(),
            pid: std::process::id(),
            bound_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&entry)
            .map_err(|err| ForkError::Directory(format!("failed to encode entry: {err}")))?;

        // Write the full entry first, then link it into place, so readers
        // never observe a partially written file.
        let mut tmp = NamedTempFile::new_in(&self.root)
            .map_err(|err| ForkError::Directory(format!("failed to stage entry: {err}")))?;
        tmp.write_all(&bytes)
            .and_then(|()| tmp.flush())
            .map_err(|err| ForkError::Directory(format!("failed to stage entry: {err}")))?;

        match tmp.persist_noclobber(&path) {
            Ok(_) => {
                debug!(name, endpoint, "name bound");
                Ok(())
            }
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => {
                Err(ForkError::NameConflict(format!("'{name}' is already bound")))
            }
            Err(err) => Err(ForkError::Directory(format!(
                "failed to bind '{name}': {}",
                err.error
            ))),
        }
    }

    /// Resolve `name` to its entry.
    ///
    /// # Errors
    ///
    /// - `ForkError::NotFound` if `name` is not bound.
    /// - `ForkError::Directory` if the entry cannot be read or decoded.
    pub fn lookup(&self, name: &str) -> Result<DirectoryEntry> {
        let path = self.entry_path(name)?;

        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ForkError::NotFound(format!("'{name}' is not bound")));
            }
            Err(err) => {
                return Err(ForkError::Directory(format!(
                    "failed to read '{name}': {err}"
                )));
            }
        };

        serde_json::from_slice(&raw)
            .map_err(|err| ForkError::Directory(format!("corrupt entry '{name}': {err}")))
    }

    /// Remove `name` if the current process bound it.
    ///
    /// An absent name is not an error, which keeps repeated teardown safe.
    ///
    /// # Errors
    ///
    /// Returns `ForkError::Directory` if the entry belongs to another process
    /// or cannot be removed.
    pub fn unbind(&self, name: &str) -> Result<()> {
        let entry = match self.lookup(name) {
            Ok(entry) => entry,
            Err(ForkError::NotFound(_)) => return Ok(()),
            Err(err) => return Err(err),
        };

        let own_pid = std::process::id();
        if entry.pid != own_pid {
            return Err(ForkError::Directory(format!(
                "'{name}' is owned by process {} and cannot be unbound by {own_pid}",
                entry.pid
            )));
        }

        match fs::remove_file(self.entry_path(name)?) {
            Ok(()) => {
                debug!(name, "name unbound");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ForkError::Directory(format!(
                "failed to unbind '{name}': {err}"
            ))),
        }
    }

    /// All currently bound entries, sorted by name.
    ///
    /// Entries that disappear or fail to decode mid-scan are skipped.
    ///
    /// # Errors
    ///
    /// Returns `ForkError::Directory` if the directory cannot be listed.
    pub fn entries(&self) -> Result<Vec<DirectoryEntry>> {
        let listing = fs::read_dir(&self.root)
            .map_err(|err| ForkError::Directory(format!("failed to list directory: {err}")))?;

        let mut entries: Vec<DirectoryEntry> = listing
            .filter_map(std::result::Result::ok)
            .map(|item| item.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION))
            .filter_map(|path| fs::read(path).ok())
            .filter_map(|raw| serde_json::from_slice(&raw).ok())
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn entry_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(format!("{name}.{ENTRY_EXTENSION}")))
    }
}

/// Names become file names, so only a conservative character set is allowed.
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if valid {
        Ok(())
    } else {
        Err(ForkError::Directory(format!("invalid name '{name}'")))
    }
}
