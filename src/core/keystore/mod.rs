//! Key custody.
//!
//! Durable storage of raw key bytes addressed by `(service, account)`:
//! `service` is the project identifier, `account` the environment name.
//!
//! ## Implementations
//!
//! - `Keychain`: macOS Keychain (hardware-backed where available)
//! - `FileKeystore`: encrypted JSON file under `$LOCKBOX_HOME/keystore/`
//! - `MemoryKeystore`: in-process map for tests
//!
//! [`default_keystore`] picks one at startup based on the host platform.
//!
//! ## Adding a New Keystore
//!
//! 1. Implement the `Keystore` trait
//! 2. Add the implementation in a new file (e.g., `secret_service.rs`)
//! 3. Teach `default_keystore` when to select it

use crate::error::{KeystoreError, Result};

mod backend;
mod file;
mod memory;

#[cfg(target_os = "macos")]
pub mod keychain;

pub use backend::default_keystore;
pub use file::FileKeystore;
pub use memory::MemoryKeystore;

/// Raw key storage.
///
/// All implementations behave identically apart from persistence across
/// process restarts.
pub trait Keystore {
    /// Store `data` under `(service, account)`, replacing any existing entry.
    ///
    /// # Errors
    ///
    /// Returns `KeystoreError::EmptyData` for zero-length data.
    fn store(&self, service: &str, account: &str, data: &[u8]) -> Result<()>;

    /// Retrieve the bytes stored under `(service, account)`.
    ///
    /// # Errors
    ///
    /// Returns `KeystoreError::NotFound` if no entry exists.
    fn retrieve(&self, service: &str, account: &str) -> Result<Vec<u8>>;

    /// Delete an entry. Deleting an absent entry succeeds.
    fn delete(&self, service: &str, account: &str) -> Result<()>;

    /// Accounts stored under `service`, sorted.
    fn list(&self, service: &str) -> Result<Vec<String>>;

    /// Whether an entry exists.
    fn contains(&self, service: &str, account: &str) -> Result<bool> {
        match self.retrieve(service, account) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Backend name for display.
    fn name(&self) -> &'static str;
}

impl<K: Keystore + ?Sized> Keystore for Box<K> {
    fn store(&self, service: &str, account: &str, data: &[u8]) -> Result<()> {
        (**self).store(service, account, data)
    }

    fn retrieve(&self, service: &str, account: &str) -> Result<Vec<u8>> {
        (**self).retrieve(service, account)
    }

    fn delete(&self, service: &str, account: &str) -> Result<()> {
        (**self).delete(service, account)
    }

    fn list(&self, service: &str) -> Result<Vec<String>> {
        (**self).list(service)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

pub(crate) fn reject_empty(service: &str, account: &str, data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Err(KeystoreError::EmptyData {
            service: service.to_string(),
            account: account.to_string(),
        }
        .into());
    }
    Ok(())
}

pub(crate) fn not_found(service: &str, account: &str) -> crate::error::Error {
    KeystoreError::NotFound {
        service: service.to_string(),
        account: account.to_string(),
    }
    .into()
}
