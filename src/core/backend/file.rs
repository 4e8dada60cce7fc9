//! Flat-file backend.
//!
//! One JSON document per environment at `<base>/<environment>.json`. Every
//! write rewrites the whole document through a temp file and a rename, so a
//! reader never sees a half-written file. Concurrent writers are
//! last-writer-wins.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::{check_write, not_found, Backend, RekeyPlan, StoredValue};
use crate::core::cipher::MasterKey;
use crate::core::types::VariableKey;
use crate::error::{BackendError, Result};

const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    version: u32,
    variables: BTreeMap<VariableKey, StoredValue>,
}

/// Encrypted JSON file backend.
pub struct FileBackend {
    path: PathBuf,
    environment: String,
    key: MasterKey,
    closed: bool,
}

impl FileBackend {
    /// Open (or prepare to create) `<base>/<environment>.json`.
    pub fn open(base: &Path, environment: &str, key: MasterKey) -> Result<Self> {
        let path = base.join(format!("{}.json", environment));
        debug!(path = %path.display(), "opening file backend");
        Ok(Self {
            path,
            environment: environment.to_string(),
            key,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(BackendError::Closed.into());
        }
        Ok(())
    }

    fn load(&self) -> Result<Document> {
        self.ensure_open()?;
        if !self.path.exists() {
            return Ok(Document {
                version: DOCUMENT_VERSION,
                variables: BTreeMap::new(),
            });
        }
        let bytes = fs::read(&self.path).map_err(|e| BackendError::io(&self.path, e))?;
        let doc: Document = serde_json::from_slice(&bytes).map_err(|e| BackendError::Corrupt {
            key: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        if doc.version > DOCUMENT_VERSION {
            return Err(BackendError::Corrupt {
                key: self.path.display().to_string(),
                reason: format!("unsupported document version {}", doc.version),
            }
            .into());
        }
        Ok(doc)
    }

    fn save(&self, doc: &Document) -> Result<()> {
        let json = serde_json::to_vec_pretty(doc).map_err(|e| BackendError::Corrupt {
            key: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        write_atomic(&self.path, &json)
    }
}

impl Backend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn environment(&self) -> &str {
        &self.environment
    }

    fn get(&self, key: &str) -> Result<Zeroizing<Vec<u8>>> {
        let doc = self.load()?;
        doc.variables
            .get(key)
            .ok_or_else(|| not_found(&self.environment, key))?
            .open(&self.key)
    }

    fn is_sealed(&self, key: &str) -> Result<bool> {
        let doc = self.load()?;
        doc.variables
            .get(key)
            .map(StoredValue::is_sealed)
            .ok_or_else(|| not_found(&self.environment, key))
    }

    fn set(&mut self, key: &str, value: &[u8], encrypt: bool) -> Result<()> {
        check_write(key, value)?;
        let mut doc = self.load()?;
        let stored = StoredValue::new(&self.key, value, encrypt)?;
        doc.variables.insert(key.to_string(), stored);
        self.save(&doc)?;
        debug!(key = %key, bytes = value.len(), encrypt, "file backend set");
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        let mut doc = self.load()?;
        if doc.variables.remove(key).is_none() {
            return Err(not_found(&self.environment, key));
        }
        self.save(&doc)?;
        debug!(key = %key, "file backend delete");
        Ok(())
    }

    fn list(&self) -> Result<Vec<VariableKey>> {
        Ok(self.load()?.variables.into_keys().collect())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.load()?.variables.contains_key(key))
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn stage_rekey(&self, next: &MasterKey) -> Result<RekeyPlan> {
        let doc = self.load()?;
        let mut plan = RekeyPlan::new(next);
        for (key, value) in &doc.variables {
            if value.is_sealed() {
                plan.count += 1;
            }
            plan.values.insert(key.clone(), value.rekey(&self.key, next)?);
        }
        Ok(plan)
    }

    fn commit_rekey(&mut self, plan: RekeyPlan) -> Result<usize> {
        let mut doc = self.load()?;
        doc.variables.extend(plan.values);
        self.save(&doc)?;
        self.key = plan.next;
        info!(environment = %self.environment, count = plan.count, "file backend rekeyed");
        Ok(plan.count)
    }
}

/// Write `data` to `path` via a uniquely named sibling temp file and a
/// rename, 0600 on Unix. Concurrent writers each rename their own file, so
/// the last rename wins.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| BackendError::io(parent, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".lockbox-")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| BackendError::io(parent, e))?;
    tmp.write_all(data).map_err(|e| BackendError::io(tmp.path(), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))
            .map_err(|e| BackendError::io(tmp.path(), e))?;
    }

    tmp.persist(path).map_err(|e| BackendError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::contract;
    use crate::core::cipher::generate_key;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_contract() {
        let tmp = TempDir::new().unwrap();
        let mut backend = FileBackend::open(tmp.path(), "development", generate_key()).unwrap();
        contract::run(&mut backend);
    }

    #[test]
    fn test_reopen_reads_persisted_values() {
        let tmp = TempDir::new().unwrap();
        let key = generate_key();
        {
            let mut backend = FileBackend::open(tmp.path(), "staging", key.clone()).unwrap();
            backend.set("API_KEY", b"abc", true).unwrap();
            backend.close().unwrap();
        }
        let backend = FileBackend::open(tmp.path(), "staging", key).unwrap();
        assert_eq!(&*backend.get("API_KEY").unwrap(), b"abc");
        assert!(tmp.path().join("staging.json").exists());
    }

    #[test]
    fn test_file_does_not_contain_plaintext() {
        let tmp = TempDir::new().unwrap();
        let mut backend = FileBackend::open(tmp.path(), "dev", generate_key()).unwrap();
        backend.set("PASSWORD", b"correct-horse-battery", true).unwrap();
        let raw = fs::read_to_string(backend.path()).unwrap();
        assert!(!raw.contains("correct-horse-battery"));
        assert!(raw.contains("PASSWORD"));
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let tmp = TempDir::new().unwrap();
        let mut backend = FileBackend::open(tmp.path(), "dev", generate_key()).unwrap();
        backend.set("X", b"1", true).unwrap();

        let other = FileBackend::open(tmp.path(), "dev", generate_key()).unwrap();
        assert_eq!(
            other.get("X").unwrap_err().kind(),
            ErrorKind::AuthenticationFailed
        );
    }

    #[test]
    fn test_no_history_capability() {
        let tmp = TempDir::new().unwrap();
        let backend = FileBackend::open(tmp.path(), "dev", generate_key()).unwrap();
        assert!(!backend.capabilities().history);
        assert_eq!(
            backend.get_history("X", 10).unwrap_err().kind(),
            ErrorKind::UnsupportedCapability
        );
        assert_eq!(
            backend.get_audit_log(10).unwrap_err().kind(),
            ErrorKind::UnsupportedCapability
        );
    }

    #[test]
    fn test_close_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let mut backend = FileBackend::open(tmp.path(), "dev", generate_key()).unwrap();
        backend.close().unwrap();
        backend.close().unwrap();
        assert_eq!(backend.list().unwrap_err().kind(), ErrorKind::BackendIo);
    }

    #[test]
    fn test_rekey() {
        let tmp = TempDir::new().unwrap();
        let mut backend = FileBackend::open(tmp.path(), "dev", generate_key()).unwrap();
        backend.set("A", b"1", true).unwrap();
        backend.set("B", b"2", false).unwrap();

        let next = generate_key();
        assert_eq!(backend.rekey(&next).unwrap(), 1);

        let reopened = FileBackend::open(tmp.path(), "dev", next).unwrap();
        assert_eq!(&*reopened.get("A").unwrap(), b"1");
        assert_eq!(&*reopened.get("B").unwrap(), b"2");
    }

    #[test]
    fn test_concurrent_writers_last_wins() {
        let tmp = TempDir::new().unwrap();
        let key = generate_key();
        let writers: Vec<_> = (0..8)
            .map(|i| {
                let base = tmp.path().to_path_buf();
                let key = key.clone();
                std::thread::spawn(move || {
                    let mut backend = FileBackend::open(&base, "dev", key).unwrap();
                    for n in 0..20 {
                        backend.set("COUNTER", format!("{}-{}", i, n).as_bytes(), true).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let backend = FileBackend::open(tmp.path(), "dev", key).unwrap();
        let last = String::from_utf8(backend.get("COUNTER").unwrap().to_vec()).unwrap();
        assert!(last.ends_with("-19"), "unexpected final value {}", last);
        let leftovers = fs::read_dir(tmp.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_staged_rekey_writes_nothing_until_committed() {
        let tmp = TempDir::new().unwrap();
        let old = generate_key();
        let mut backend = FileBackend::open(tmp.path(), "dev", old.clone()).unwrap();
        backend.set("A", b"1", true).unwrap();
        let before = fs::read(backend.path()).unwrap();

        let next = generate_key();
        let plan = backend.stage_rekey(&next).unwrap();
        assert_eq!(plan.count(), 1);
        assert_eq!(fs::read(backend.path()).unwrap(), before);
        assert_eq!(&*backend.get("A").unwrap(), b"1");

        assert_eq!(backend.commit_rekey(plan).unwrap(), 1);
        let reopened = FileBackend::open(tmp.path(), "dev", next).unwrap();
        assert_eq!(&*reopened.get("A").unwrap(), b"1");
    }

    #[test]
    fn test_rekey_aborts_without_writing_on_foreign_record() {
        let tmp = TempDir::new().unwrap();
        let key = generate_key();
        let mut backend = FileBackend::open(tmp.path(), "dev", key.clone()).unwrap();
        backend.set("A", b"1", true).unwrap();
        {
            let mut intruder = FileBackend::open(tmp.path(), "dev", generate_key()).unwrap();
            intruder.set("Z", b"9", true).unwrap();
        }
        let before = fs::read(backend.path()).unwrap();

        assert!(backend.rekey(&generate_key()).is_err());
        assert_eq!(fs::read(backend.path()).unwrap(), before);
        assert_eq!(&*backend.get("A").unwrap(), b"1");
    }
}
