//! In-memory keystore.

use std::collections::BTreeMap;
use std::sync::Mutex;

use zeroize::Zeroizing;

use super::{not_found, reject_empty, Keystore};
use crate::error::{KeystoreError, Result};

type Entries = BTreeMap<(String, String), Zeroizing<Vec<u8>>>;

/// Keystore that lives only as long as the process.
#[derive(Default)]
pub struct MemoryKeystore {
    entries: Mutex<Entries>,
}

impl MemoryKeystore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Entries>> {
        self.entries
            .lock()
            .map_err(|_| KeystoreError::Corrupt("memory keystore lock poisoned".to_string()).into())
    }
}

impl Keystore for MemoryKeystore {
    fn store(&self, service: &str, account: &str, data: &[u8]) -> Result<()> {
        reject_empty(service, account, data)?;
        self.lock()?.insert(
            (service.to_string(), account.to_string()),
            Zeroizing::new(data.to_vec()),
        );
        Ok(())
    }

    fn retrieve(&self, service: &str, account: &str) -> Result<Vec<u8>> {
        self.lock()?
            .get(&(service.to_string(), account.to_string()))
            .map(|v| v.to_vec())
            .ok_or_else(|| not_found(service, account))
    }

    fn delete(&self, service: &str, account: &str) -> Result<()> {
        self.lock()?
            .remove(&(service.to_string(), account.to_string()));
        Ok(())
    }

    fn list(&self, service: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .keys()
            .filter(|(s, _)| s == service)
            .map(|(_, a)| a.clone())
            .collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
