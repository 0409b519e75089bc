//! Identity — the two-name allow-list and the device flag.
//!
//! DESIGN
//! ======
//! There is no account system. A participant is admitted when their
//! normalized name matches one of exactly two allowed names. The last
//! admitted name is remembered on disk so the next start can skip the prompt;
//! the flag is read once at startup and re-validated against the allow-list.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

pub const DEFAULT_ALLOWED_USERS: [&str; 2] = ["Atif", "Adiba"];

const FLAG_DIR: &str = "ghostsync";
const FLAG_FILE: &str = "last_user";

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("name is empty")]
    Empty,
    #[error("allow-list needs exactly two names, got {0}")]
    WrongCount(usize),
    #[error("allow-list names must differ: {0}")]
    Duplicate(String),
    #[error("{0} is not on the allow-list")]
    NotAllowed(String),
    #[error("device flag I/O failed: {0}")]
    Flag(#[from] std::io::Error),
}

impl frames::ErrorCode for IdentityError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Empty => "E_IDENTITY_EMPTY",
            Self::WrongCount(_) => "E_IDENTITY_COUNT",
            Self::Duplicate(_) => "E_IDENTITY_DUPLICATE",
            Self::NotAllowed(_) => "E_IDENTITY_NOT_ALLOWED",
            Self::Flag(_) => "E_IDENTITY_FLAG",
        }
    }
}

// =============================================================================
// IDENTITY
// =============================================================================

/// An admitted participant name. Only [`AllowList::admit`] constructs one, so
/// it serializes as a plain string but never deserializes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Capitalize the first character and lowercase the rest (`"aTIF"` → `"Atif"`).
#[must_use]
pub fn normalize_name(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut chars = trimmed.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };
    first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
}

// =============================================================================
// ALLOW-LIST
// =============================================================================

/// Exactly two distinct participant names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    names: [Identity; 2],
}

impl AllowList {
    /// Build an allow-list from two raw names.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Empty`] for blank names and
    /// [`IdentityError::Duplicate`] when both normalize to the same name.
    pub fn new(first: &str, second: &str) -> Result<Self, IdentityError> {
        let first = normalize_name(first);
        let second = normalize_name(second);
        if first.is_empty() || second.is_empty() {
            return Err(IdentityError::Empty);
        }
        if first == second {
            return Err(IdentityError::Duplicate(first));
        }
        Ok(Self { names: [Identity(first), Identity(second)] })
    }

    /// Parse a comma-separated pair, e.g. `"Atif,Adiba"`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::WrongCount`] unless exactly two names are given.
    pub fn parse(csv: &str) -> Result<Self, IdentityError> {
        let names: Vec<&str> = csv
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect();
        match names.as_slice() {
            [first, second] => Self::new(first, second),
            other => Err(IdentityError::WrongCount(other.len())),
        }
    }

    /// Normalize `raw` and admit it if it is on the list.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::NotAllowed`] for any other name.
    pub fn admit(&self, raw: &str) -> Result<Identity, IdentityError> {
        let name = normalize_name(raw);
        if name.is_empty() {
            return Err(IdentityError::Empty);
        }
        self.names
            .iter()
            .find(|allowed| allowed.0 == name)
            .cloned()
            .ok_or(IdentityError::NotAllowed(name))
    }

    /// The other allowed participant.
    #[must_use]
    pub fn partner_of(&self, me: &Identity) -> Option<&Identity> {
        self.names.iter().find(|name| *name != me)
    }

    #[must_use]
    pub fn names(&self) -> &[Identity] {
        &self.names
    }
}

impl Default for AllowList {
    fn default() -> Self {
        let [first, second] = DEFAULT_ALLOWED_USERS;
        Self { names: [Identity(first.to_owned()), Identity(second.to_owned())] }
    }
}

// =============================================================================
// DEVICE FLAG
// =============================================================================

/// Remembers the last admitted name across restarts.
pub trait DeviceFlag: Send + Sync {
    /// Raw remembered name, if any. Not yet validated.
    fn load(&self) -> Option<String>;

    /// Remember `identity` for the next start.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Flag`] when the flag cannot be written.
    fn store(&self, identity: &Identity) -> Result<(), IdentityError>;

    /// Drop the remembered name.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Flag`] when the flag cannot be removed.
    fn forget(&self) -> Result<(), IdentityError>;
}

/// Device flag stored as a one-line file.
#[derive(Debug, Clone)]
pub struct FileDeviceFlag {
    path: PathBuf,
}

impl FileDeviceFlag {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/ghostsync/last_user`, when the platform has a config dir.
    #[must_use]
    pub fn default_location() -> Option<Self> {
        dirs::config_dir().map(|dir| Self::new(dir.join(FLAG_DIR).join(FLAG_FILE)))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeviceFlag for FileDeviceFlag {
    fn load(&self) -> Option<String> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        let name = raw.trim();
        if name.is_empty() { None } else { Some(name.to_owned()) }
    }

    fn store(&self, identity: &Identity) -> Result<(), IdentityError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, identity.as_str())?;
        Ok(())
    }

    fn forget(&self) -> Result<(), IdentityError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Read the device flag once and admit the remembered name, if still allowed.
#[must_use]
pub fn restore(flag: &dyn DeviceFlag, allowed: &AllowList) -> Option<Identity> {
    let raw = flag.load()?;
    match allowed.admit(&raw) {
        Ok(identity) => Some(identity),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring stale device flag");
            None
        }
    }
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;
