//! Constants used throughout lockbox.
//!
//! Centralizes magic strings and configuration values.

use std::path::PathBuf;

use crate::error::{KeystoreError, Result};

/// Project configuration file name.
pub const CONFIG_FILE: &str = ".lockbox.toml";

/// Access control file, stored next to the project configuration.
pub const ACCESS_FILE: &str = ".lockbox.access.json";

/// Default data directory for backends, relative to the project root.
pub const DATA_DIR: &str = ".lockbox";

/// Default environments for a new project.
pub const DEFAULT_ENVIRONMENTS: &[&str] = &["development", "staging", "production"];

/// Largest value any backend accepts (1 MiB).
pub const MAX_VALUE_SIZE: usize = 1024 * 1024;

/// File extension of git-tracked variable blobs.
pub const GIT_BLOB_EXT: &str = "enc";

/// Overrides the lockbox home directory (default `~/.lockbox`).
pub const ENV_HOME: &str = "LOCKBOX_HOME";

/// Disables the macOS Keychain keystore when set.
pub const ENV_NO_KEYCHAIN: &str = "LOCKBOX_NO_KEYCHAIN";

/// Password injected at runtime instead of prompting.
pub const ENV_PASSWORD: &str = "LOCKBOX_PASSWORD";

/// Acting user for history, audit and access checks.
pub const ENV_USER: &str = "LOCKBOX_USER";

/// Log filter for the binary.
pub const ENV_LOG: &str = "LOCKBOX_LOG";

/// Home directory for per-user lockbox state.
///
/// `$LOCKBOX_HOME` if set, otherwise `~/.lockbox`.
pub fn lockbox_home() -> Result<PathBuf> {
    if let Ok(home) = std::env::var(ENV_HOME) {
        return Ok(PathBuf::from(home));
    }
    let home = dirs::home_dir().ok_or_else(|| {
        KeystoreError::ReadFailed(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "unable to determine home directory",
        ))
    })?;
    Ok(home.join(".lockbox"))
}

/// The acting user: `$LOCKBOX_USER`, else the OS username.
pub fn current_user() -> String {
    std::env::var(ENV_USER).unwrap_or_else(|_| whoami::username())
}
