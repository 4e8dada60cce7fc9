//! Vault.
//!
//! The primary interface for all lockbox operations. Ties the project
//! config, the key manager, one backend per environment, the acting user and
//! access control together.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::core::access::{AccessControl, AccessLevel};
use crate::core::backend::{self, Backend, GitRepo};
use crate::core::cipher::KdfParams;
use crate::core::config::{BackendType, Config};
use crate::core::conflict::{ConflictPrompt, Resolver, SyncReport};
use crate::core::constants;
use crate::core::domain::{AuditEntry, Conflict, HistoryEntry, ResolutionSummary, Strategy};
use crate::core::keys::{self, EnvironmentKeys, KeyManager, PasswordSource};
use crate::core::keystore::{self, Keystore};
use crate::core::types::{EnvironmentName, UserName, VariableKey};
use crate::error::{ConfigError, Result};

/// The primary interface for lockbox operations.
pub struct Vault<K: Keystore = Box<dyn Keystore>> {
    root: PathBuf,
    config: Config,
    keys: KeyManager<K>,
    user: UserName,
    access: Option<AccessControl>,
    backends: HashMap<EnvironmentName, Box<dyn Backend>>,
}

impl<K: Keystore> fmt::Debug for Vault<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vault")
            .field("root", &self.root)
            .field("project", &self.config.project_id())
            .field("user", &self.user)
            .field("access_enforced", &self.access.is_some())
            .field("open_backends", &self.backends.len())
            .finish()
    }
}

impl Vault {
    // --- Construction ---
    /// Open the project at `root` with the host keystore.
    ///
    /// Passwords come from `$LOCKBOX_PASSWORD` or an interactive prompt.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotInitialized` if no `.lockbox.toml` exists.
    pub fn open(root: &Path) -> Result<Self> {
        Self::open_with(
            root,
            keystore::default_keystore()?,
            keys::default_password_source(),
        )
    }

    /// Create `.lockbox.toml` at `root` and open the new project.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::AlreadyInitialized` if the project exists.
    pub fn init(root: &Path, project: &str, backend: BackendType) -> Result<Self> {
        Self::init_with(
            root,
            project,
            backend,
            keystore::default_keystore()?,
            keys::default_password_source(),
        )
    }
}

impl<K: Keystore> Vault<K> {
    /// Open with an explicit keystore and password source.
    pub fn open_with(root: &Path, keystore: K, passwords: Box<dyn PasswordSource>) -> Result<Self> {
        let config = Config::load(root)?;
        let keys = KeyManager::new(keystore, config.project_id(), passwords)
            .with_scope(config.keys.scope);
        let access = if AccessControl::exists(root) {
            Some(AccessControl::load(root)?)
        } else {
            None
        };
        let user = constants::current_user();
        debug!(root = %root.display(), user = %user, "vault opened");

        Ok(Self {
            root: root.to_path_buf(),
            config,
            keys,
            user,
            access,
            backends: HashMap::new(),
        })
    }

    /// Initialize with an explicit keystore and password source.
    pub fn init_with(
        root: &Path,
        project: &str,
        backend: BackendType,
        keystore: K,
        passwords: Box<dyn PasswordSource>,
    ) -> Result<Self> {
        if Config::exists(root) {
            return Err(ConfigError::AlreadyInitialized.into());
        }
        let mut config = Config::new(project);
        config.storage.backend = backend;
        config.save(root)?;

        let data_dir = config.data_dir(root);
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| crate::error::BackendError::io(&data_dir, e))?;
        info!(project = %project, backend = %backend, "initialized project");

        Self::open_with(root, keystore, passwords)
    }

    /// Act as `user` for history, audit and access checks.
    pub fn with_user(mut self, user: impl Into<UserName>) -> Self {
        self.user = user.into();
        self
    }

    /// Override the KDF cost used when keys are created.
    pub fn with_kdf_params(mut self, params: KdfParams) -> Self {
        self.keys.set_kdf_params(params);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn key_manager(&mut self) -> &mut KeyManager<K> {
        &mut self.keys
    }

    /// The access file, if one exists.
    pub fn access(&self) -> Option<&AccessControl> {
        self.access.as_ref()
    }

    /// Resolve an optional environment to the configured default.
    pub fn environment<'a>(&'a self, environment: Option<&'a str>) -> &'a str {
        environment.unwrap_or(&self.config.keys.default_environment)
    }

    // --- Internals ---
    /// Environments without a policy are open to everyone.
    fn authorize(&self, environment: &str, level: AccessLevel) -> Result<()> {
        match &self.access {
            Some(access) if access.policy(environment).is_some() => {
                access.check(&self.user, environment, level)
            }
            _ => Ok(()),
        }
    }

    fn open_storage(&mut self, environment: &str, backend_type: BackendType) -> Result<Box<dyn Backend>> {
        let mut storage = self.config.storage_config(&self.root, environment, None)?;
        storage.backend_type = backend_type;
        let key = self.keys.key_for(environment)?;
        backend::open_backend(&storage, key, &self.user)
    }

    fn backend(&mut self, environment: &str) -> Result<&mut Box<dyn Backend>> {
        if !self.backends.contains_key(environment) {
            let opened = self.open_storage(environment, self.config.storage.backend)?;
            self.backends.insert(environment.to_string(), opened);
        }
        self.backends
            .get_mut(environment)
            .ok_or_else(|| ConfigError::UnknownEnvironment(environment.to_string()).into())
    }

    fn close_backend(&mut self, environment: &str) -> Result<()> {
        if let Some(mut backend) = self.backends.remove(environment) {
            backend.close()?;
        }
        Ok(())
    }

    // --- Variables ---
    /// Read a variable.
    pub fn get(&mut self, environment: &str, key: &str) -> Result<Zeroizing<Vec<u8>>> {
        self.authorize(environment, AccessLevel::Read)?;
        self.backend(environment)?.get(key)
    }

    /// Write a variable, sealed unless `encrypt` is false.
    pub fn set(&mut self, environment: &str, key: &str, value: &[u8], encrypt: bool) -> Result<()> {
        self.authorize(environment, AccessLevel::Write)?;
        self.backend(environment)?.set(key, value, encrypt)
    }

    pub fn delete(&mut self, environment: &str, key: &str) -> Result<()> {
        self.authorize(environment, AccessLevel::Write)?;
        self.backend(environment)?.delete(key)
    }

    /// Variable names, sorted.
    pub fn list(&mut self, environment: &str) -> Result<Vec<VariableKey>> {
        self.authorize(environment, AccessLevel::Read)?;
        let mut keys = self.backend(environment)?.list()?;
        keys.sort();
        Ok(keys)
    }

    pub fn exists(&mut self, environment: &str, key: &str) -> Result<bool> {
        self.authorize(environment, AccessLevel::Read)?;
        self.backend(environment)?.exists(key)
    }

    /// Whether `key` is stored sealed.
    pub fn is_sealed(&mut self, environment: &str, key: &str) -> Result<bool> {
        self.authorize(environment, AccessLevel::Read)?;
        self.backend(environment)?.is_sealed(key)
    }

    pub fn history(&mut self, environment: &str, key: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.authorize(environment, AccessLevel::Read)?;
        self.backend(environment)?.get_history(key, limit)
    }

    pub fn audit_log(&mut self, environment: &str, limit: usize) -> Result<Vec<AuditEntry>> {
        self.authorize(environment, AccessLevel::Admin)?;
        self.backend(environment)?.get_audit_log(limit)
    }

    // --- Keys ---
    /// Environments sharing the key of `environment`.
    fn key_group(&self, environment: &str) -> Vec<EnvironmentName> {
        match self.keys.scope() {
            keys::KeyScope::Environment => vec![environment.to_string()],
            keys::KeyScope::Project => self.config.keys.environments.clone(),
        }
    }

    fn rotation_backends(&mut self, environment: &str) -> Result<Vec<Box<dyn Backend>>> {
        if !self.config.has_environment(environment) {
            return Err(ConfigError::UnknownEnvironment(environment.to_string()).into());
        }
        let group = self.key_group(environment);
        let mut backends = Vec::with_capacity(group.len());
        for env in &group {
            self.close_backend(env)?;
            backends.push(self.open_storage(env, self.config.storage.backend)?);
        }
        Ok(backends)
    }

    /// Re-encrypt everything under a fresh key. Returns the number of values
    /// re-sealed.
    pub fn rotate(&mut self, environment: &str) -> Result<usize> {
        self.authorize(environment, AccessLevel::Admin)?;
        let mut backends = self.rotation_backends(environment)?;
        let count = self.keys.rotate(environment, &mut backends)?;
        for mut backend in backends {
            backend.close()?;
        }
        Ok(count)
    }

    /// Finish an interrupted rotation, if one is pending.
    pub fn resume_rotation(&mut self, environment: &str) -> Result<Option<usize>> {
        self.authorize(environment, AccessLevel::Admin)?;
        if !self.keys.rotation_pending(environment)? {
            return Ok(None);
        }
        let mut backends = self.rotation_backends(environment)?;
        self.keys.resume_rotation(environment, &mut backends)
    }

    pub fn verify_password(&self, environment: &str, password: &str) -> Result<bool> {
        self.keys.verify_password(environment, password)
    }

    /// Forget cached keys and close every backend.
    pub fn lock(&mut self) -> Result<()> {
        self.close()?;
        self.keys.lock();
        Ok(())
    }

    /// Load the keys of every configured environment.
    pub fn unlock(&mut self) -> Result<()> {
        self.keys.unlock(&self.config.keys.environments)
    }

    pub fn close(&mut self) -> Result<()> {
        for (_, mut backend) in self.backends.drain() {
            backend.close()?;
        }
        Ok(())
    }

    // --- Migration ---
    /// Copy every environment to `target` and switch the project over.
    ///
    /// The config is rewritten only after every environment was copied and
    /// verified; the old data is left in place.
    pub fn migrate(&mut self, target: BackendType) -> Result<usize> {
        let current = self.config.storage.backend;
        if current == target {
            return Err(ConfigError::InvalidValue {
                field: "storage.backend",
                reason: format!("project already uses the {} backend", target),
            }
            .into());
        }
        let environments = self.config.keys.environments.clone();
        for env in &environments {
            self.authorize(env, AccessLevel::Admin)?;
        }
        self.close()?;

        let mut total = 0;
        for env in &environments {
            let source = self.open_storage(env, current)?;
            let mut dest = self.open_storage(env, target)?;
            total += backend::migrate(source.as_ref(), dest.as_mut())?;
            dest.close()?;
        }

        self.config.storage.backend = target;
        self.config.save(&self.root)?;
        info!(from = %current, to = %target, total, "migrated project");
        Ok(total)
    }

    // --- Git sync ---
    fn resolver(&mut self) -> Result<Resolver> {
        if self.config.storage.backend != BackendType::Git {
            return Err(ConfigError::InvalidValue {
                field: "storage.backend",
                reason: "sync needs the git backend".to_string(),
            }
            .into());
        }
        for env in &self.config.keys.environments {
            self.authorize(env, AccessLevel::Write)?;
        }
        self.close()?;
        let repo = GitRepo::discover(&self.root)?;
        Resolver::new(repo, &self.config.data_dir(&self.root))
    }

    /// Conflicting variables of an interrupted merge.
    pub fn conflicts(&mut self) -> Result<Vec<Conflict>> {
        let resolver = self.resolver()?;
        resolver.detect(&mut self.keys)
    }

    /// Settle the conflicts of an interrupted merge without committing.
    pub fn resolve(
        &mut self,
        strategy: Strategy,
        prompt: Option<&mut dyn ConflictPrompt>,
    ) -> Result<ResolutionSummary> {
        let resolver = self.resolver()?;
        resolver.resolve_all(strategy, &mut self.keys, prompt)
    }

    /// Commit, pull `remote` and settle conflicts with `strategy`.
    pub fn sync(
        &mut self,
        remote: &str,
        branch: Option<&str>,
        strategy: Strategy,
        prompt: Option<&mut dyn ConflictPrompt>,
    ) -> Result<SyncReport> {
        let resolver = self.resolver()?;
        resolver.sync(remote, branch, strategy, &mut self.keys, prompt)
    }

    // --- Access ---
    /// Grant `level` on `environment` to `user`.
    ///
    /// The first grant on an environment starts enforcing access there and
    /// grants the acting user admin as well, so they aren't locked out.
    pub fn grant(
        &mut self,
        user: &str,
        environment: &str,
        level: AccessLevel,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if !self.config.has_environment(environment) {
            return Err(ConfigError::UnknownEnvironment(environment.to_string()).into());
        }
        let actor = self.user.clone();
        let loaded = match self.access.take() {
            Some(access) => access,
            None => AccessControl::load(&self.root)?,
        };
        let access = self.access.insert(loaded);

        if access.policy(environment).is_some() {
            access.check(&actor, environment, AccessLevel::Admin)?;
        } else {
            warn!(environment = %environment, "access control is now enforced");
            if user != actor {
                access.grant(&actor, environment, AccessLevel::Admin, &actor, None)?;
            }
        }
        access.grant(user, environment, level, &actor, expires_at)
    }

    /// Revoke every grant of `user` on `environment`.
    pub fn revoke(&mut self, user: &str, environment: &str) -> Result<bool> {
        let actor = self.user.clone();
        match self.access.as_mut() {
            Some(access) if access.policy(environment).is_some() => {
                access.check(&actor, environment, AccessLevel::Admin)?;
                access.revoke(user, environment)
            }
            _ => Ok(false),
        }
    }
}

impl<K: Keystore> Drop for Vault<K> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close backends");
        }
    }
}
