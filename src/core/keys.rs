//! Key management.
//!
//! Derives, caches and rotates the master keys of one project. Keys live in
//! a [`Keystore`] under `(project, account)`, where `account` is the
//! environment name, or `@master` for the project-wide key. The salt used to
//! derive each key is kept next to it under `<account>@salt`.
//!
//! ## Rotation
//!
//! 1. A fresh random key is stored under `<account>@pending`
//! 2. Every backend re-seals its values in memory under the new key
//! 3. Only once all of them succeeded are the re-sealed values written
//! 4. The new key replaces the old one and the pending entry is removed
//!
//! If the process dies between 1 and 4, [`KeyManager::resume_rotation`]
//! finishes the job: backends skip values already sealed under the pending
//! key.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::core::backend::Backend;
use crate::core::cipher::{self, KdfParams, MasterKey};
use crate::core::constants;
use crate::core::keystore::Keystore;
use crate::core::types::ProjectId;
use crate::error::{KeystoreError, Result};

/// Keystore account of the project-wide key.
pub const MASTER_ACCOUNT: &str = "@master";

const SALT_SUFFIX: &str = "@salt";
const PENDING_SUFFIX: &str = "@pending";

/// Whether environments get their own keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyScope {
    /// One key (and password) per environment.
    #[default]
    Environment,
    /// Every environment shares the project master key.
    Project,
}

/// Where passwords come from when a key has to be created.
pub trait PasswordSource {
    /// Password for `account`. `confirm` asks interactive sources to
    /// confirm a newly chosen password.
    fn password(&self, account: &str, confirm: bool) -> Result<Zeroizing<String>>;
}

/// Interactive prompt on the terminal.
pub struct Prompt;

impl PasswordSource for Prompt {
    fn password(&self, account: &str, confirm: bool) -> Result<Zeroizing<String>> {
        let mut prompt = dialoguer::Password::new().with_prompt(format!("Password for {}", account));
        if confirm {
            prompt = prompt.with_confirmation("Confirm password", "Passwords don't match");
        }
        let password = prompt
            .interact()
            .map_err(|e| KeystoreError::NoPassword(e.to_string()))?;
        Ok(Zeroizing::new(password))
    }
}

/// A password supplied up front.
pub struct StaticPassword(Zeroizing<String>);

impl StaticPassword {
    pub fn new(password: impl Into<String>) -> Self {
        Self(Zeroizing::new(password.into()))
    }
}

impl PasswordSource for StaticPassword {
    fn password(&self, _account: &str, _confirm: bool) -> Result<Zeroizing<String>> {
        Ok(self.0.clone())
    }
}

/// `$LOCKBOX_PASSWORD`.
pub struct EnvPassword;

impl PasswordSource for EnvPassword {
    fn password(&self, _account: &str, _confirm: bool) -> Result<Zeroizing<String>> {
        std::env::var(constants::ENV_PASSWORD)
            .map(Zeroizing::new)
            .map_err(|_| {
                KeystoreError::NoPassword(format!("{} is not set", constants::ENV_PASSWORD)).into()
            })
    }
}

/// `$LOCKBOX_PASSWORD` when set, else an interactive prompt.
pub fn default_password_source() -> Box<dyn PasswordSource> {
    if std::env::var_os(constants::ENV_PASSWORD).is_some() {
        Box::new(EnvPassword)
    } else {
        Box::new(Prompt)
    }
}

/// In-process key cache, scoped to one `KeyManager`.
#[derive(Default)]
pub struct KeyCache {
    keys: HashMap<String, MasterKey>,
}

impl KeyCache {
    pub fn get(&self, account: &str) -> Option<&MasterKey> {
        self.keys.get(account)
    }

    pub fn insert(&mut self, account: &str, key: MasterKey) {
        self.keys.insert(account.to_string(), key);
    }

    pub fn invalidate(&mut self, account: &str) {
        self.keys.remove(account);
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Anything that can hand out the key of an environment.
pub trait EnvironmentKeys {
    fn key_for(&mut self, environment: &str) -> Result<MasterKey>;
}

impl EnvironmentKeys for HashMap<String, MasterKey> {
    fn key_for(&mut self, environment: &str) -> Result<MasterKey> {
        self.get(environment).cloned().ok_or_else(|| {
            KeystoreError::NotFound {
                service: "memory".to_string(),
                account: environment.to_string(),
            }
            .into()
        })
    }
}

/// Derives, caches and rotates the keys of one project.
pub struct KeyManager<K: Keystore = Box<dyn Keystore>> {
    keystore: K,
    project: ProjectId,
    scope: KeyScope,
    passwords: Box<dyn PasswordSource>,
    params: KdfParams,
    cache: KeyCache,
}

impl<K: Keystore> KeyManager<K> {
    pub fn new(keystore: K, project: impl Into<ProjectId>, passwords: Box<dyn PasswordSource>) -> Self {
        Self {
            keystore,
            project: project.into(),
            scope: KeyScope::default(),
            passwords,
            params: KdfParams::default(),
            cache: KeyCache::default(),
        }
    }

    pub fn with_scope(mut self, scope: KeyScope) -> Self {
        self.scope = scope;
        self
    }

    /// Override the KDF cost. Tests use [`KdfParams::fast`].
    pub fn with_kdf_params(mut self, params: KdfParams) -> Self {
        self.params = params;
        self
    }

    pub fn set_kdf_params(&mut self, params: KdfParams) {
        self.params = params;
    }

    pub fn scope(&self) -> KeyScope {
        self.scope
    }

    pub fn keystore(&self) -> &K {
        &self.keystore
    }

    /// Keystore account holding the key used for `environment`.
    pub fn account_for(&self, environment: &str) -> String {
        match self.scope {
            KeyScope::Environment => environment.to_string(),
            KeyScope::Project => MASTER_ACCOUNT.to_string(),
        }
    }

    /// The project-wide key, created from a password on first use.
    pub fn get_or_create_master_key(&mut self) -> Result<MasterKey> {
        self.get_or_create(MASTER_ACCOUNT)
    }

    /// The key of `environment` alone, created from a password on first use.
    pub fn get_or_create_environment_key(&mut self, environment: &str) -> Result<MasterKey> {
        crate::core::validation::validate_environment(environment)?;
        self.get_or_create(environment)
    }

    /// Whether a key for `environment` already exists.
    pub fn has_key(&self, environment: &str) -> Result<bool> {
        self.keystore
            .contains(&self.project, &self.account_for(environment))
    }

    fn get_or_create(&mut self, account: &str) -> Result<MasterKey> {
        if let Some(key) = self.cache.get(account) {
            return Ok(key.clone());
        }

        let key = match self.keystore.retrieve(&self.project, account) {
            Ok(bytes) => {
                let bytes = Zeroizing::new(bytes);
                debug!(project = %self.project, account = %account, "loaded key");
                MasterKey::from_slice(&bytes)?
            }
            Err(e) if e.is_not_found() => self.create(account)?,
            Err(e) => return Err(e),
        };

        self.cache.insert(account, key.clone());
        Ok(key)
    }

    fn create(&mut self, account: &str) -> Result<MasterKey> {
        self.params.validate()?;
        let password = self.passwords.password(account, true)?;
        let salt = cipher::generate_salt();
        let key = cipher::derive_key_with(password.as_bytes(), &salt, &self.params)?;

        self.keystore.store(&self.project, account, key.as_bytes())?;
        self.keystore
            .store(&self.project, &salt_account(account), &salt)?;

        info!(project = %self.project, account = %account, "created key");
        Ok(key)
    }

    /// Check `password` against the stored key of `environment`.
    ///
    /// # Errors
    ///
    /// Returns `KeystoreError::NotFound` if the key has no salt, which is the
    /// case once it has been rotated to a random key.
    pub fn verify_password(&self, environment: &str, password: &str) -> Result<bool> {
        let account = self.account_for(environment);
        let salt = Zeroizing::new(self.keystore.retrieve(&self.project, &salt_account(&account))?);
        let stored = Zeroizing::new(self.keystore.retrieve(&self.project, &account)?);
        let stored = MasterKey::from_slice(&stored)?;
        let derived = cipher::derive_key_with(password.as_bytes(), &salt, &self.params)?;
        Ok(derived == stored)
    }

    /// Replace the key of `environment` with a fresh random key, re-sealing
    /// everything in `backends` first.
    ///
    /// `backends` must be open with the current key. Under
    /// [`KeyScope::Project`] that means every environment's backend.
    pub fn rotate(&mut self, environment: &str, backends: &mut [Box<dyn Backend>]) -> Result<usize> {
        let account = self.account_for(environment);
        let pending = pending_account(&account);

        if self.keystore.contains(&self.project, &pending)? {
            debug!(account = %account, "pending rotation found, resuming it");
        } else {
            let next = cipher::generate_key();
            self.keystore.store(&self.project, &pending, next.as_bytes())?;
        }
        self.finish_rotation(&account, backends)
    }

    /// Complete a rotation interrupted after its new key was staged.
    ///
    /// Returns `None` when no rotation was pending.
    pub fn resume_rotation(
        &mut self,
        environment: &str,
        backends: &mut [Box<dyn Backend>],
    ) -> Result<Option<usize>> {
        let account = self.account_for(environment);
        if !self.keystore.contains(&self.project, &pending_account(&account))? {
            return Ok(None);
        }
        self.finish_rotation(&account, backends).map(Some)
    }

    /// Whether a rotation of `environment` is pending.
    pub fn rotation_pending(&self, environment: &str) -> Result<bool> {
        let account = self.account_for(environment);
        self.keystore
            .contains(&self.project, &pending_account(&account))
    }

    fn finish_rotation(&mut self, account: &str, backends: &mut [Box<dyn Backend>]) -> Result<usize> {
        let pending = pending_account(account);
        let next = Zeroizing::new(self.keystore.retrieve(&self.project, &pending)?);
        let next = MasterKey::from_slice(&next)?;

        // Stage everything before the first write.
        let plans = backends
            .iter()
            .map(|backend| backend.stage_rekey(&next))
            .collect::<Result<Vec<_>>>()?;
        let mut count = 0;
        for (backend, plan) in backends.iter_mut().zip(plans) {
            count += backend.commit_rekey(plan)?;
        }

        self.keystore.store(&self.project, account, next.as_bytes())?;
        self.keystore.delete(&self.project, &salt_account(account))?;
        self.keystore.delete(&self.project, &pending)?;
        self.cache.invalidate(account);

        info!(project = %self.project, account = %account, count, "rotated key");
        Ok(count)
    }

    /// Forget every cached key.
    pub fn lock(&mut self) {
        debug!(cached = self.cache.len(), "locking");
        self.cache.clear();
    }

    /// Load (or create) the keys of `environments` into the cache.
    pub fn unlock(&mut self, environments: &[String]) -> Result<()> {
        for environment in environments {
            self.key_for(environment)?;
        }
        Ok(())
    }

    /// Whether the key for `environment` is cached.
    pub fn is_unlocked(&self, environment: &str) -> bool {
        self.cache.get(&self.account_for(environment)).is_some()
    }
}

impl<K: Keystore> EnvironmentKeys for KeyManager<K> {
    /// The key used for `environment` under the configured scope.
    fn key_for(&mut self, environment: &str) -> Result<MasterKey> {
        match self.scope {
            KeyScope::Environment => self.get_or_create_environment_key(environment),
            KeyScope::Project => self.get_or_create_master_key(),
        }
    }
}

fn salt_account(account: &str) -> String {
    format!("{}{}", account, SALT_SUFFIX)
}

fn pending_account(account: &str) -> String {
    format!("{}{}", account, PENDING_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::FileBackend;
    use crate::core::keystore::MemoryKeystore;
    use crate::error::ErrorKind;
    use std::cell::Cell;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// Counts how often a password was asked for.
    struct Counting(Rc<Cell<usize>>);

    impl PasswordSource for Counting {
        fn password(&self, _account: &str, _confirm: bool) -> Result<Zeroizing<String>> {
            self.0.set(self.0.get() + 1);
            Ok(Zeroizing::new("pw123".to_string()))
        }
    }

    fn manager() -> (KeyManager<MemoryKeystore>, Rc<Cell<usize>>) {
        let asked = Rc::new(Cell::new(0));
        let km = KeyManager::new(MemoryKeystore::new(), "acme", Box::new(Counting(asked.clone())))
            .with_kdf_params(KdfParams::fast());
        (km, asked)
    }

    #[test]
    fn test_create_then_cache() {
        let (mut km, asked) = manager();
        let a = km.key_for("development").unwrap();
        let b = km.key_for("development").unwrap();
        assert_eq!(a, b);
        assert_eq!(asked.get(), 1);
        assert!(km.keystore().contains("acme", "development").unwrap());
        assert!(km.keystore().contains("acme", "development@salt").unwrap());
    }

    #[test]
    fn test_environments_get_distinct_keys() {
        let (mut km, asked) = manager();
        let dev = km.key_for("development").unwrap();
        let prod = km.key_for("production").unwrap();
        assert_ne!(dev, prod);
        assert_eq!(asked.get(), 2);
    }

    #[test]
    fn test_project_scope_shares_master_key() {
        let (km, asked) = manager();
        let mut km = km.with_scope(KeyScope::Project);
        let dev = km.key_for("development").unwrap();
        let prod = km.key_for("production").unwrap();
        assert_eq!(dev, prod);
        assert_eq!(asked.get(), 1);
        assert!(km.keystore().contains("acme", MASTER_ACCOUNT).unwrap());
    }

    #[test]
    fn test_lock_forces_reload_not_prompt() {
        let (mut km, asked) = manager();
        let key = km.key_for("staging").unwrap();
        assert!(km.is_unlocked("staging"));

        km.lock();
        assert!(!km.is_unlocked("staging"));

        km.unlock(&["staging".to_string()]).unwrap();
        assert!(km.is_unlocked("staging"));
        assert_eq!(km.key_for("staging").unwrap(), key);
        assert_eq!(asked.get(), 1);
    }

    #[test]
    fn test_verify_password() {
        let (mut km, _) = manager();
        km.key_for("development").unwrap();
        assert!(km.verify_password("development", "pw123").unwrap());
        assert!(!km.verify_password("development", "wrong").unwrap());
    }

    #[test]
    fn test_missing_password_source() {
        let mut km = KeyManager::new(MemoryKeystore::new(), "acme", Box::new(EnvPasswordUnset))
            .with_kdf_params(KdfParams::fast());
        let err = km.key_for("development").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    struct EnvPasswordUnset;

    impl PasswordSource for EnvPasswordUnset {
        fn password(&self, _account: &str, _confirm: bool) -> Result<Zeroizing<String>> {
            Err(KeystoreError::NoPassword("none".into()).into())
        }
    }

    #[test]
    fn test_weak_kdf_params_rejected_before_prompting() {
        let (km, asked) = manager();
        let mut km = km.with_kdf_params(KdfParams {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        });
        let err = km.key_for("development").unwrap_err();
        assert!(err.to_string().contains("below the minimum"), "{}", err);
        assert_eq!(asked.get(), 0);
        assert!(!km.keystore().contains("acme", "development").unwrap());
    }

    #[test]
    fn test_invalid_environment_rejected() {
        let (mut km, asked) = manager();
        assert!(km.key_for("../prod").is_err());
        assert_eq!(asked.get(), 0);
    }

    #[test]
    fn test_rotate() {
        let tmp = TempDir::new().unwrap();
        let (mut km, _) = manager();
        let old = km.key_for("production").unwrap();

        let mut backend = FileBackend::open(tmp.path(), "production", old.clone()).unwrap();
        backend.set("API_KEY", b"secret", true).unwrap();
        backend.set("DB", b"postgres://x", true).unwrap();

        let mut backends: Vec<Box<dyn Backend>> = vec![Box::new(backend)];
        assert_eq!(km.rotate("production", &mut backends).unwrap(), 2);

        let new = km.key_for("production").unwrap();
        assert_ne!(new, old);
        assert!(!km.rotation_pending("production").unwrap());
        assert!(!km.keystore().contains("acme", "production@salt").unwrap());
        assert!(km.verify_password("production", "pw123").unwrap_err().is_not_found());

        let reopened = FileBackend::open(tmp.path(), "production", new).unwrap();
        assert_eq!(&*reopened.get("API_KEY").unwrap(), b"secret");
        let stale = FileBackend::open(tmp.path(), "production", old).unwrap();
        assert_eq!(stale.get("API_KEY").unwrap_err().kind(), ErrorKind::AuthenticationFailed);
    }

    #[test]
    fn test_failed_rotation_keeps_old_key() {
        let tmp = TempDir::new().unwrap();
        let (mut km, _) = manager();
        let old = km.key_for("dev").unwrap();

        let mut backend = FileBackend::open(tmp.path(), "dev", old.clone()).unwrap();
        backend.set("A", b"1", true).unwrap();
        // A record sealed under an unrelated key makes re-encryption fail.
        let mut foreign = FileBackend::open(tmp.path(), "dev", cipher::generate_key()).unwrap();
        foreign.set("B", b"2", true).unwrap();

        let mut backends: Vec<Box<dyn Backend>> = vec![Box::new(backend)];
        assert!(km.rotate("dev", &mut backends).is_err());

        assert_eq!(km.key_for("dev").unwrap(), old);
        assert!(km.rotation_pending("dev").unwrap());
        let check = FileBackend::open(tmp.path(), "dev", old).unwrap();
        assert_eq!(&*check.get("A").unwrap(), b"1");
    }

    #[test]
    fn test_project_rotation_writes_nothing_when_any_environment_fails() {
        let tmp = TempDir::new().unwrap();
        let (km, _) = manager();
        let mut km = km.with_scope(KeyScope::Project);
        let old = km.key_for("dev").unwrap();

        let mut dev = FileBackend::open(tmp.path(), "dev", old.clone()).unwrap();
        dev.set("A", b"1", true).unwrap();
        let mut prod = FileBackend::open(tmp.path(), "prod", old.clone()).unwrap();
        prod.set("B", b"2", true).unwrap();
        let mut foreign = FileBackend::open(tmp.path(), "prod", cipher::generate_key()).unwrap();
        foreign.set("C", b"3", true).unwrap();
        let dev_before = std::fs::read(dev.path()).unwrap();

        let mut backends: Vec<Box<dyn Backend>> = vec![Box::new(dev), Box::new(prod)];
        let err = km.rotate("dev", &mut backends).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);

        km.lock();
        assert_eq!(km.key_for("prod").unwrap(), old);
        assert_eq!(std::fs::read(tmp.path().join("dev.json")).unwrap(), dev_before);
        let check = FileBackend::open(tmp.path(), "dev", old).unwrap();
        assert_eq!(&*check.get("A").unwrap(), b"1");
    }

    #[test]
    fn test_resume_rotation() {
        let tmp = TempDir::new().unwrap();
        let (mut km, _) = manager();
        let old = km.key_for("dev").unwrap();

        let mut backend = FileBackend::open(tmp.path(), "dev", old.clone()).unwrap();
        backend.set("A", b"1", true).unwrap();

        // Stage a pending key as an interrupted rotation would have.
        let next = cipher::generate_key();
        km.keystore.store("acme", "dev@pending", next.as_bytes()).unwrap();

        let mut backends: Vec<Box<dyn Backend>> = vec![Box::new(backend)];
        assert_eq!(km.resume_rotation("dev", &mut backends).unwrap(), Some(1));
        assert_eq!(km.key_for("dev").unwrap(), next);
        assert_eq!(km.resume_rotation("dev", &mut backends).unwrap(), None);
    }

    #[test]
    fn test_map_environment_keys() {
        let mut keys = HashMap::new();
        keys.insert("dev".to_string(), cipher::generate_key());
        assert!(keys.key_for("dev").is_ok());
        assert!(keys.key_for("prod").unwrap_err().is_not_found());
    }
}
