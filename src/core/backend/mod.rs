//! Variable storage.
//!
//! A [`Backend`] persists the variables of one environment. Three engines
//! implement it:
//!
//! - `FileBackend`: one encrypted JSON document per environment
//! - `SqlBackend`: SQLite with versioned history and an audit trail
//! - `GitBackend`: one deterministically encrypted blob per variable in a
//!   git working tree
//!
//! [`open_backend`] picks one from a [`StorageConfig`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use zeroize::Zeroizing;

use crate::core::cipher::{record::b64, Algorithm, EncryptedRecord, MasterKey};
use crate::core::config::{BackendType, StorageConfig};
use crate::core::constants;
use crate::core::domain::{AuditEntry, HistoryEntry};
use crate::core::types::VariableKey;
use crate::core::validation;
use crate::error::{BackendError, Error, ErrorKind, Result};

pub(crate) mod file;
mod git;
mod migrate;
pub mod repo;
mod sql;

pub use file::FileBackend;
pub use git::GitBackend;
pub use migrate::migrate;
pub use repo::GitRepo;
pub use sql::SqlBackend;

/// Optional features a backend advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Supports [`Backend::get_history`].
    pub history: bool,
    /// Supports [`Backend::get_audit_log`].
    pub audit: bool,
}

/// Persistent variable store for one environment.
pub trait Backend {
    /// Engine name for display and errors.
    fn name(&self) -> &'static str;

    /// The environment this backend serves.
    fn environment(&self) -> &str;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Read a variable.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::NotFound` if the key is absent, or an
    /// authentication error if the stored record doesn't open under the
    /// current key.
    fn get(&self, key: &str) -> Result<Zeroizing<Vec<u8>>>;

    /// Whether `key` is stored sealed (as opposed to written with
    /// `encrypt = false`).
    fn is_sealed(&self, key: &str) -> Result<bool>;

    /// Write a variable, sealing it when `encrypt` is true.
    fn set(&mut self, key: &str, value: &[u8], encrypt: bool) -> Result<()>;

    /// Remove a variable.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::NotFound` if the key is absent.
    fn delete(&mut self, key: &str) -> Result<()>;

    /// All variable names. Order is unspecified.
    fn list(&self) -> Result<Vec<VariableKey>>;

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.list()?.iter().any(|k| k == key))
    }

    /// Release open handles. Calling twice is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Up to `limit` history entries for `key`, newest first.
    fn get_history(&self, _key: &str, _limit: usize) -> Result<Vec<HistoryEntry>> {
        Err(unsupported(self.name(), "history"))
    }

    /// Up to `limit` audit entries, newest first.
    fn get_audit_log(&self, _limit: usize) -> Result<Vec<AuditEntry>> {
        Err(unsupported(self.name(), "audit"))
    }

    /// Re-seal every sealed value under `next` in memory. Nothing is
    /// written.
    ///
    /// Values that already open under `next` are carried over, so an
    /// interrupted rotation can be run again.
    ///
    /// # Errors
    ///
    /// Fails if any sealed value opens under neither the current key nor
    /// `next`.
    fn stage_rekey(&self, next: &MasterKey) -> Result<RekeyPlan>;

    /// Write a plan from [`Backend::stage_rekey`] and adopt its key.
    /// Returns the number of values re-sealed.
    fn commit_rekey(&mut self, plan: RekeyPlan) -> Result<usize>;

    /// Stage and commit in one step.
    fn rekey(&mut self, next: &MasterKey) -> Result<usize> {
        let plan = self.stage_rekey(next)?;
        self.commit_rekey(plan)
    }
}

/// Values re-sealed under a new key, held in memory until committed.
pub struct RekeyPlan {
    next: MasterKey,
    /// Current values that change, by variable name.
    values: BTreeMap<VariableKey, StoredValue>,
    /// Archived copies (sql history rows) that change, by row id.
    archived: Vec<(i64, VariableKey, StoredValue)>,
    count: usize,
}

impl RekeyPlan {
    pub(crate) fn new(next: &MasterKey) -> Self {
        Self {
            next: next.clone(),
            values: BTreeMap::new(),
            archived: Vec::new(),
            count: 0,
        }
    }

    /// Number of sealed values the plan re-seals.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn next_key(&self) -> &MasterKey {
        &self.next
    }
}

impl std::fmt::Debug for RekeyPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RekeyPlan")
            .field("values", &self.values.len())
            .field("archived", &self.archived.len())
            .field("count", &self.count)
            .finish_non_exhaustive()
    }
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn environment(&self) -> &str {
        (**self).environment()
    }

    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    fn get(&self, key: &str) -> Result<Zeroizing<Vec<u8>>> {
        (**self).get(key)
    }

    fn is_sealed(&self, key: &str) -> Result<bool> {
        (**self).is_sealed(key)
    }

    fn set(&mut self, key: &str, value: &[u8], encrypt: bool) -> Result<()> {
        (**self).set(key, value, encrypt)
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn list(&self) -> Result<Vec<VariableKey>> {
        (**self).list()
    }

    fn exists(&self, key: &str) -> Result<bool> {
        (**self).exists(key)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn get_history(&self, key: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        (**self).get_history(key, limit)
    }

    fn get_audit_log(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        (**self).get_audit_log(limit)
    }

    fn stage_rekey(&self, next: &MasterKey) -> Result<RekeyPlan> {
        (**self).stage_rekey(next)
    }

    fn commit_rekey(&mut self, plan: RekeyPlan) -> Result<usize> {
        (**self).commit_rekey(plan)
    }

    fn rekey(&mut self, next: &MasterKey) -> Result<usize> {
        (**self).rekey(next)
    }
}

/// A value as persisted: sealed, or plaintext when written with
/// `encrypt = false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoredValue {
    Sealed(EncryptedRecord),
    Plain {
        #[serde(with = "b64")]
        value: Vec<u8>,
    },
}

impl StoredValue {
    /// Seal `value` with a random nonce, or keep it plain.
    pub fn new(key: &MasterKey, value: &[u8], encrypt: bool) -> Result<Self> {
        if encrypt {
            Ok(Self::Sealed(EncryptedRecord::seal(
                Algorithm::default(),
                key.as_bytes(),
                value,
                &[],
            )?))
        } else {
            Ok(Self::Plain {
                value: value.to_vec(),
            })
        }
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self, Self::Sealed(_))
    }

    /// Recover the plaintext.
    pub fn open(&self, key: &MasterKey) -> Result<Zeroizing<Vec<u8>>> {
        match self {
            Self::Sealed(record) => record.open(key.as_bytes()),
            Self::Plain { value } => Ok(Zeroizing::new(value.clone())),
        }
    }

    /// Re-seal under `next`. Plain values are returned unchanged.
    ///
    /// Records that fail authentication under `current` but open under
    /// `next` were re-sealed by an earlier, interrupted rotation and are
    /// kept as they are.
    pub fn rekey(&self, current: &MasterKey, next: &MasterKey) -> Result<Self> {
        let Self::Sealed(record) = self else {
            return Ok(self.clone());
        };
        match record.open(current.as_bytes()) {
            Ok(plaintext) => Ok(Self::Sealed(EncryptedRecord::seal(
                record.algorithm()?,
                next.as_bytes(),
                &plaintext,
                &[],
            )?)),
            Err(e) if e.kind() == ErrorKind::AuthenticationFailed => {
                record.open(next.as_bytes())?;
                Ok(self.clone())
            }
            Err(e) => Err(e),
        }
    }
}

/// Validate a key name and value size before any write.
pub(crate) fn check_write(key: &str, value: &[u8]) -> Result<()> {
    validation::validate_key(key)?;
    if value.len() > constants::MAX_VALUE_SIZE {
        return Err(BackendError::ValueTooLarge {
            key: key.to_string(),
            size: value.len(),
            limit: constants::MAX_VALUE_SIZE,
        }
        .into());
    }
    Ok(())
}

pub(crate) fn not_found(environment: &str, key: &str) -> Error {
    BackendError::NotFound {
        environment: environment.to_string(),
        key: key.to_string(),
    }
    .into()
}

pub(crate) fn unsupported(backend: &'static str, capability: &'static str) -> Error {
    BackendError::Unsupported {
        backend,
        capability,
    }
    .into()
}

/// Open the backend described by `config`, sealing with `key`.
///
/// `user` is recorded in history and audit rows where the engine keeps them.
pub fn open_backend(config: &StorageConfig, key: MasterKey, user: &str) -> Result<Box<dyn Backend>> {
    validation::validate_environment(&config.environment)?;
    debug!(
        backend = %config.backend_type,
        environment = %config.environment,
        path = %config.base_path.display(),
        "opening backend"
    );

    let backend: Box<dyn Backend> = match config.backend_type {
        BackendType::File => Box::new(FileBackend::open(
            &config.base_path,
            &config.environment,
            key,
        )?),
        BackendType::Sql => Box::new(
            SqlBackend::open(&config.base_path, &config.environment, key)?.with_user(user),
        ),
        BackendType::Git => Box::new(GitBackend::open(
            &config.base_path,
            &config.environment,
            key,
        )?),
    };
    Ok(backend)
}
