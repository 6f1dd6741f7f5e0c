//! Fork session identity and role-qualified names.
//!
//! The controller generates one [`SessionId`] per session. Both processes
//! derive their naming-directory names from it, so the worker only ever
//! needs the identity to find its controller.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ForkError, Result};

/// Which side of a session a name belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The controlling process.
    Client,
    /// The spawned worker process.
    Server,
}

impl Role {
    /// Suffix appended to the session identity for this role.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Client => "_client",
            Self::Server => "_server",
        }
    }
}

/// Unique token identifying one controller/worker pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an identity handed to a worker on its command line.
    ///
    /// The worker must never guess or default an identity, so a missing or
    /// malformed token is rejected rather than replaced.
    ///
    /// # Errors
    ///
    /// Returns `ForkError::InvalidIdentity` if `raw` is empty or is not a
    /// hyphenated UUID.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ForkError::InvalidIdentity(
                "session identity must not be empty".into(),
            ));
        }

        // Only the canonical hyphenated form is produced by `generate`.
        if trimmed.len() != uuid::fmt::Hyphenated::LENGTH {
            return Err(ForkError::InvalidIdentity(format!(
                "'{trimmed}' is not a hyphenated uuid"
            )));
        }

        Uuid::parse_str(trimmed)
            .map(Self)
            .map_err(|err| ForkError::InvalidIdentity(format!("'{trimmed}': {err}")))
    }

    /// Name registered for the given role.
    #[must_use]
    pub fn name_for(&self, role: Role) -> String {
        format!("{}{}", self.0.hyphenated(), role.suffix())
    }

    /// Name the controller registers under.
    #[must_use]
    pub fn client_name(&self) -> String {
        self.name_for(Role::Client)
    }

    /// Name the worker registers under.
    #[must_use]
    pub fn server_name(&self) -> String {
        self.name_for(Role::Server)
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for SessionId {
    type Err = ForkError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
