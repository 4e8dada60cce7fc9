//! Encrypted-file keystore.
//!
//! Fallback when no native credential vault is available. Each service gets
//! one file, `<dir>/<service>.json`, holding an [`EncryptedRecord`] whose
//! plaintext is a JSON map of account → base64 key bytes. The file key lives
//! next to it in `<dir>/.keystore.key` with 0600 permissions.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;
#[cfg(unix)]
use tracing::warn;
use zeroize::Zeroizing;

use super::{not_found, reject_empty, Keystore};
use crate::core::cipher::{self, Algorithm, EncryptedRecord, MasterKey};
use crate::core::constants;
#[cfg(unix)]
use crate::core::validation;
use crate::error::{KeystoreError, Result};

const FILE_KEY: &str = ".keystore.key";

/// Keystore backed by encrypted files on disk.
pub struct FileKeystore {
    dir: PathBuf,
}

impl FileKeystore {
    /// Keystore rooted at `dir` (created on first write).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Keystore at `$LOCKBOX_HOME/keystore`, or `~/.lockbox/keystore`.
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(constants::lockbox_home()?.join("keystore")))
    }

    /// Directory holding the keystore files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn service_path(&self, service: &str) -> PathBuf {
        let safe: String = service
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    /// Load the file key, creating it on first use.
    fn file_key(&self, create: bool) -> Result<Option<MasterKey>> {
        let path = self.dir.join(FILE_KEY);
        if !path.exists() {
            if !create {
                return Ok(None);
            }
            fs::create_dir_all(&self.dir).map_err(KeystoreError::WriteFailed)?;
            let key = cipher::generate_key();
            write_private(&path, key.as_bytes())?;
            debug!(path = %path.display(), "created keystore file key");
            return Ok(Some(key));
        }

        #[cfg(unix)]
        {
            if let Err(e) = validation::validate_file_permissions(&path, 0o600) {
                warn!(error = %e, "insecure keystore key permissions");
            }
        }

        let bytes = Zeroizing::new(fs::read(&path).map_err(KeystoreError::ReadFailed)?);
        MasterKey::from_slice(&bytes)
            .map(Some)
            .map_err(|_| KeystoreError::Corrupt(format!("{} is not a 32-byte key", path.display())).into())
    }

    fn load(&self, service: &str) -> Result<BTreeMap<String, String>> {
        let path = self.service_path(service);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let key = self.file_key(false)?.ok_or_else(|| {
            KeystoreError::Corrupt(format!("{} exists but the file key is missing", path.display()))
        })?;

        let contents = fs::read_to_string(&path).map_err(KeystoreError::ReadFailed)?;
        let record: EncryptedRecord = serde_json::from_str(&contents)
            .map_err(|e| KeystoreError::Corrupt(e.to_string()))?;
        let plaintext = record.open(key.as_bytes())?;
        serde_json::from_slice(&plaintext).map_err(|e| KeystoreError::Corrupt(e.to_string()).into())
    }

    fn save(&self, service: &str, entries: &BTreeMap<String, String>) -> Result<()> {
        let path = self.service_path(service);
        if entries.is_empty() {
            if path.exists() {
                fs::remove_file(&path).map_err(KeystoreError::WriteFailed)?;
            }
            return Ok(());
        }

        let key = self
            .file_key(true)?
            .ok_or_else(|| KeystoreError::Corrupt("file key unavailable".to_string()))?;
        let plaintext = Zeroizing::new(
            serde_json::to_vec(entries).map_err(|e| KeystoreError::Corrupt(e.to_string()))?,
        );
        let record = EncryptedRecord::seal(Algorithm::default(), key.as_bytes(), &plaintext, &[])?;
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| KeystoreError::Corrupt(e.to_string()))?;
        write_private(&path, &json)
    }
}

/// Write `data` to `path` atomically with 0600 permissions.
fn write_private(path: &Path, data: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".lockbox-")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(KeystoreError::WriteFailed)?;
    tmp.write_all(data).map_err(KeystoreError::WriteFailed)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))
            .map_err(KeystoreError::WriteFailed)?;
    }

    tmp.persist(path).map_err(|e| KeystoreError::WriteFailed(e.error))?;
    Ok(())
}

impl Keystore for FileKeystore {
    fn store(&self, service: &str, account: &str, data: &[u8]) -> Result<()> {
        reject_empty(service, account, data)?;
        let mut entries = self.load(service)?;
        entries.insert(account.to_string(), STANDARD.encode(data));
        self.save(service, &entries)?;
        debug!(service = %service, account = %account, "stored key in file keystore");
        Ok(())
    }

    fn retrieve(&self, service: &str, account: &str) -> Result<Vec<u8>> {
        let entries = self.load(service)?;
        let encoded = entries
            .get(account)
            .ok_or_else(|| not_found(service, account))?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| KeystoreError::Corrupt(e.to_string()).into())
    }

    fn delete(&self, service: &str, account: &str) -> Result<()> {
        let mut entries = self.load(service)?;
        if entries.remove(account).is_some() {
            self.save(service, &entries)?;
        }
        Ok(())
    }

    fn list(&self, service: &str) -> Result<Vec<String>> {
        Ok(self.load(service)?.into_keys().collect())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
