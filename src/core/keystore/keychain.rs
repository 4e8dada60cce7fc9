//! macOS Keychain keystore.
//!
//! Stores raw key bytes as generic passwords. The Keychain has no cheap
//! "list accounts for a service" call, so each service keeps an index entry
//! (account `@index`) naming its accounts.

#![cfg(target_os = "macos")]

use security_framework::passwords::{
    delete_generic_password, get_generic_password, set_generic_password,
};
use tracing::{debug, error, info};

use super::{not_found, reject_empty, Keystore};
use crate::error::{KeystoreError, Result};

/// errSecItemNotFound
const ITEM_NOT_FOUND: i32 = -25300;

/// errSecUserCanceled
const USER_CANCELED: i32 = -128;

const INDEX_ACCOUNT: &str = "@index";

/// Keychain backend.
pub struct Keychain {
    prefix: String,
}

impl Keychain {
    /// Service prefix for all lockbox entries in the Keychain.
    const SERVICE_PREFIX: &'static str = "com.lockbox";

    pub fn new() -> Result<Self> {
        Ok(Self {
            prefix: Self::SERVICE_PREFIX.to_string(),
        })
    }

    fn service(&self, service: &str) -> String {
        format!("{}.{}", self.prefix, service)
    }

    fn map_err(account: &str, e: security_framework::base::Error) -> crate::error::Error {
        match e.code() {
            USER_CANCELED => KeystoreError::KeychainAccessDenied.into(),
            code => {
                error!(account = %account, error_code = code, error = %e, "keychain error");
                KeystoreError::KeychainError(e.to_string()).into()
            }
        }
    }

    fn read_index(&self, service: &str) -> Result<Vec<String>> {
        match get_generic_password(&self.service(service), INDEX_ACCOUNT) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| KeystoreError::Corrupt(format!("keychain index: {}", e)).into()),
            Err(e) if e.code() == ITEM_NOT_FOUND => Ok(Vec::new()),
            Err(e) => Err(Self::map_err(INDEX_ACCOUNT, e)),
        }
    }

    fn write_index(&self, service: &str, accounts: &[String]) -> Result<()> {
        let svc = self.service(service);
        if accounts.is_empty() {
            return match delete_generic_password(&svc, INDEX_ACCOUNT) {
                Ok(()) => Ok(()),
                Err(e) if e.code() == ITEM_NOT_FOUND => Ok(()),
                Err(e) => Err(Self::map_err(INDEX_ACCOUNT, e)),
            };
        }
        let bytes = serde_json::to_vec(accounts)
            .map_err(|e| KeystoreError::Corrupt(format!("keychain index: {}", e)))?;
        set_generic_password(&svc, INDEX_ACCOUNT, &bytes).map_err(|e| Self::map_err(INDEX_ACCOUNT, e))
    }
}

impl Keystore for Keychain {
    fn store(&self, service: &str, account: &str, data: &[u8]) -> Result<()> {
        reject_empty(service, account, data)?;
        info!(service = %service, account = %account, "storing key in macOS Keychain");

        set_generic_password(&self.service(service), account, data)
            .map_err(|e| Self::map_err(account, e))?;

        let mut accounts = self.read_index(service)?;
        if !accounts.iter().any(|a| a == account) {
            accounts.push(account.to_string());
            accounts.sort();
            self.write_index(service, &accounts)?;
        }
        Ok(())
    }

    fn retrieve(&self, service: &str, account: &str) -> Result<Vec<u8>> {
        debug!(service = %service, account = %account, "loading key from macOS Keychain");
        match get_generic_password(&self.service(service), account) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.code() == ITEM_NOT_FOUND => Err(not_found(service, account)),
            Err(e) => Err(Self::map_err(account, e)),
        }
    }

    fn delete(&self, service: &str, account: &str) -> Result<()> {
        match delete_generic_password(&self.service(service), account) {
            Ok(()) => {}
            Err(e) if e.code() == ITEM_NOT_FOUND => {
                debug!(account = %account, "key not in Keychain (already deleted)");
            }
            Err(e) => return Err(Self::map_err(account, e)),
        }

        let mut accounts = self.read_index(service)?;
        let before = accounts.len();
        accounts.retain(|a| a != account);
        if accounts.len() != before {
            self.write_index(service, &accounts)?;
        }
        Ok(())
    }

    fn list(&self, service: &str) -> Result<Vec<String>> {
        self.read_index(service)
    }

    fn name(&self) -> &'static str {
        "keychain"
    }
}
