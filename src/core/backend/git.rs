//! Git-tracked backend.
//!
//! One blob per variable at `<base>/<environment>/<KEY>.enc`, sealed with
//! deterministic encryption (context `<environment>/<KEY>`). Writing a value
//! that is already stored leaves the blob untouched so unchanged secrets
//! never show up in a diff. Staging and committing is left to the caller
//! (see `Vault::sync`).

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::file::write_atomic;
use super::{check_write, not_found, Backend, RekeyPlan, StoredValue};
use crate::core::cipher::{Algorithm, EncryptedRecord, MasterKey};
use crate::core::constants::GIT_BLOB_EXT;
use crate::core::types::VariableKey;
use crate::core::validation;
use crate::error::{BackendError, ErrorKind, Result};

/// `created_at` of every git blob, fixed so identical writes are identical
/// bytes. The `newest` strategy reads commit times instead.
const BLOB_CREATED_AT: i64 = 0;

/// Backend storing one deterministic blob per variable.
pub struct GitBackend {
    dir: PathBuf,
    environment: String,
    key: MasterKey,
    closed: bool,
}

impl GitBackend {
    /// Open `<base>/<environment>/`. The directory is created on first write.
    pub fn open(base: &Path, environment: &str, key: MasterKey) -> Result<Self> {
        let dir = base.join(environment);
        debug!(dir = %dir.display(), "opening git backend");
        Ok(Self {
            dir,
            environment: environment.to_string(),
            key,
            closed: false,
        })
    }

    /// Directory holding this environment's blobs.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Blob path for `key`.
    pub fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, GIT_BLOB_EXT))
    }

    /// Variable name for a blob file name, if it is one of ours.
    pub fn key_for_file(file_name: &str) -> Option<&str> {
        let key = file_name.strip_suffix(&format!(".{}", GIT_BLOB_EXT))?;
        validation::validate_key(key).ok().map(|_| key)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(BackendError::Closed.into());
        }
        Ok(())
    }

    fn context(&self, key: &str) -> String {
        format!("{}/{}", self.environment, key)
    }

    /// Parse a blob as stored on disk or read from an index stage.
    pub fn decode_blob(&self, key: &str, bytes: &[u8]) -> Result<StoredValue> {
        serde_json::from_slice(bytes).map_err(|e| {
            BackendError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Decrypt a blob under this backend's key.
    pub fn open_blob(&self, key: &str, bytes: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.decode_blob(key, bytes)?.open(&self.key)
    }

    fn seal(&self, key: &str, value: &[u8], with: &MasterKey, encrypt: bool) -> Result<StoredValue> {
        if !encrypt {
            return Ok(StoredValue::Plain {
                value: value.to_vec(),
            });
        }
        Ok(StoredValue::Sealed(EncryptedRecord::seal_deterministic(
            Algorithm::default(),
            with.as_bytes(),
            value,
            self.context(key).as_bytes(),
            &[],
            BLOB_CREATED_AT,
        )?))
    }

    fn read(&self, key: &str) -> Result<Option<StoredValue>> {
        self.ensure_open()?;
        let path = self.blob_path(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(self.decode_blob(key, &bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackendError::io(&path, e).into()),
        }
    }

    fn write(&self, key: &str, stored: &StoredValue) -> Result<()> {
        // One line per blob, so concurrent edits always conflict as a whole.
        let mut json = serde_json::to_vec(stored).map_err(|e| BackendError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        json.push(b'\n');
        write_atomic(&self.blob_path(key), &json)
    }
}

impl Backend for GitBackend {
    fn name(&self) -> &'static str {
        "git"
    }

    fn environment(&self) -> &str {
        &self.environment
    }

    fn get(&self, key: &str) -> Result<Zeroizing<Vec<u8>>> {
        validation::validate_key(key)?;
        self.read(key)?
            .ok_or_else(|| not_found(&self.environment, key))?
            .open(&self.key)
    }

    fn is_sealed(&self, key: &str) -> Result<bool> {
        validation::validate_key(key)?;
        self.read(key)?
            .map(|stored| stored.is_sealed())
            .ok_or_else(|| not_found(&self.environment, key))
    }

    fn set(&mut self, key: &str, value: &[u8], encrypt: bool) -> Result<()> {
        check_write(key, value)?;
        match self.read(key) {
            Ok(Some(existing)) if existing.is_sealed() == encrypt => {
                if let Ok(current) = existing.open(&self.key) {
                    if current.as_slice() == value {
                        debug!(key = %key, "value unchanged, blob left as is");
                        return Ok(());
                    }
                }
            }
            Ok(_) => {}
            // Conflict markers left by a merge.
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                debug!(key = %key, "replacing unreadable blob");
            }
            Err(e) => return Err(e),
        }

        let stored = self.seal(key, value, &self.key, encrypt)?;
        self.write(key, &stored)?;
        debug!(key = %key, bytes = value.len(), encrypt, "git backend set");
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        validation::validate_key(key)?;
        self.ensure_open()?;
        let path = self.blob_path(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(key = %key, "git backend delete");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(not_found(&self.environment, key))
            }
            Err(e) => Err(BackendError::io(&path, e).into()),
        }
    }

    fn list(&self) -> Result<Vec<VariableKey>> {
        self.ensure_open()?;
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackendError::io(&self.dir, e).into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| BackendError::io(&self.dir, e))?;
            let name = entry.file_name();
            if let Some(key) = name.to_str().and_then(Self::key_for_file) {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(validation::validate_key(key).is_ok() && self.blob_path(key).is_file())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn stage_rekey(&self, next: &MasterKey) -> Result<RekeyPlan> {
        let mut plan = RekeyPlan::new(next);
        for key in self.list()? {
            let Some(stored) = self.read(&key)? else {
                continue;
            };
            if !stored.is_sealed() {
                continue;
            }
            let plaintext = match stored.open(&self.key) {
                Ok(p) => p,
                Err(e) if e.kind() == ErrorKind::AuthenticationFailed => {
                    // Sealed under `next` by an interrupted rotation.
                    stored.open(next)?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            let resealed = self.seal(&key, &plaintext, next, true)?;
            plan.values.insert(key, resealed);
            plan.count += 1;
        }
        Ok(plan)
    }

    fn commit_rekey(&mut self, plan: RekeyPlan) -> Result<usize> {
        for (key, stored) in &plan.values {
            self.write(key, stored)?;
        }
        self.key = plan.next;
        info!(environment = %self.environment, count = plan.count, "git backend rekeyed");
        Ok(plan.count)
    }
}
