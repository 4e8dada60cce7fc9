//! Access control.
//!
//! A per-project JSON file (`.lockbox.access.json`) maps each environment to
//! an [`AccessPolicy`]: users and roles listed outright, plus individual
//! [`AccessEntry`] grants that may expire. Expired grants are ignored, never
//! purged. The whole file is rewritten atomically on every change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::core::backend::file::write_atomic;
use crate::core::constants::ACCESS_FILE;
use crate::core::types::{EnvironmentName, UserName};
use crate::core::validation;
use crate::error::{AccessError, BackendError, ConfigError, Error, Result};

/// Matches every user (or role) in listings and grants.
pub const WILDCARD: &str = "*";

/// Permission level, ordered `Read < Write < Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Read,
    Write,
    Admin,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "admin" => Ok(Self::Admin),
            other => Err(ConfigError::InvalidValue {
                field: "level",
                reason: format!("unknown access level '{}' (expected read, write or admin)", other),
            }
            .into()),
        }
    }
}

/// One grant of `level` on an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEntry {
    pub user: UserName,
    pub environment: EnvironmentName,
    pub level: AccessLevel,
    pub granted_at: DateTime<Utc>,
    pub granted_by: UserName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessEntry {
    /// Unexpired at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |t| t > now)
    }

    fn applies_to(&self, user: &str) -> bool {
        self.user == user || self.user == WILDCARD
    }
}

/// Who may touch one environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    #[serde(default)]
    pub allowed_users: Vec<UserName>,
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    #[serde(default)]
    pub entries: Vec<AccessEntry>,
}

impl AccessPolicy {
    fn lists(&self, user: &str) -> bool {
        self.allowed_users.iter().any(|u| u == user || u == WILDCARD)
    }

    fn lists_role(&self, roles: &[String]) -> bool {
        self.allowed_roles
            .iter()
            .any(|r| r == WILDCARD || roles.contains(r))
    }

    /// Highest level `user` holds at `now`. A listed user holds `Write`.
    fn level_at(&self, user: &str, now: DateTime<Utc>) -> Option<AccessLevel> {
        let granted = self
            .entries
            .iter()
            .filter(|e| e.applies_to(user) && e.is_active_at(now))
            .map(|e| e.level)
            .max();
        let listed = self.lists(user).then_some(AccessLevel::Write);
        granted.max(listed)
    }
}

/// The access file of one project.
#[derive(Debug, Clone)]
pub struct AccessControl {
    path: PathBuf,
    policies: BTreeMap<EnvironmentName, AccessPolicy>,
}

impl AccessControl {
    /// Path of the access file under `root`.
    pub fn path(root: &Path) -> PathBuf {
        root.join(ACCESS_FILE)
    }

    /// Whether `root` has an access file. Without one, access isn't enforced.
    pub fn exists(root: &Path) -> bool {
        Self::path(root).is_file()
    }

    /// Load the access file under `root`, or an empty one if it is missing.
    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::path(root);
        let policies = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(AccessError::Parse)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(BackendError::io(&path, e).into()),
        };
        debug!(path = %path.display(), "loaded access file");
        Ok(Self { path, policies })
    }

    /// Rewrite the access file.
    pub fn save(&self) -> Result<()> {
        let mut json = serde_json::to_vec_pretty(&self.policies).map_err(AccessError::Parse)?;
        json.push(b'\n');
        write_atomic(&self.path, &json)
    }

    pub fn policy(&self, environment: &str) -> Option<&AccessPolicy> {
        self.policies.get(environment)
    }

    /// Whether `user` may access `environment` at all.
    pub fn has_access(&self, user: &str, environment: &str) -> bool {
        self.has_access_at(user, environment, Utc::now())
    }

    pub fn has_access_at(&self, user: &str, environment: &str, now: DateTime<Utc>) -> bool {
        self.level_of_at(user, environment, now).is_some()
    }

    /// Like [`has_access`](Self::has_access), also honouring `allowed_roles`.
    pub fn has_access_with_roles(&self, user: &str, roles: &[String], environment: &str) -> bool {
        self.has_access(user, environment)
            || self
                .policies
                .get(environment)
                .is_some_and(|p| p.lists_role(roles))
    }

    /// Whether `user` holds at least `level` on `environment`.
    pub fn has_level(&self, user: &str, environment: &str, level: AccessLevel) -> bool {
        self.level_of(user, environment)
            .is_some_and(|held| held >= level)
    }

    pub fn level_of(&self, user: &str, environment: &str) -> Option<AccessLevel> {
        self.level_of_at(user, environment, Utc::now())
    }

    pub fn level_of_at(
        &self,
        user: &str,
        environment: &str,
        now: DateTime<Utc>,
    ) -> Option<AccessLevel> {
        self.policies.get(environment)?.level_at(user, now)
    }

    /// Fail with `AccessError::Denied` unless `user` holds `level`.
    pub fn check(&self, user: &str, environment: &str, level: AccessLevel) -> Result<()> {
        if self.has_level(user, environment, level) {
            return Ok(());
        }
        Err(AccessError::Denied {
            user: user.to_string(),
            environment: environment.to_string(),
            level: level.to_string(),
        }
        .into())
    }

    /// Grant `level` to `user`. An existing grant is updated in place.
    pub fn grant(
        &mut self,
        user: &str,
        environment: &str,
        level: AccessLevel,
        granted_by: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        validation::validate_environment(environment)?;
        let policy = self.policies.entry(environment.to_string()).or_default();
        let now = Utc::now();

        match policy.entries.iter_mut().find(|e| e.user == user) {
            Some(entry) => {
                entry.level = level;
                entry.granted_at = now;
                entry.granted_by = granted_by.to_string();
                entry.expires_at = expires_at;
            }
            None => policy.entries.push(AccessEntry {
                user: user.to_string(),
                environment: environment.to_string(),
                level,
                granted_at: now,
                granted_by: granted_by.to_string(),
                expires_at,
            }),
        }
        self.save()?;
        info!(user = %user, environment = %environment, level = %level, "granted access");
        Ok(())
    }

    /// List `user` outright on `environment`.
    pub fn allow_user(&mut self, environment: &str, user: &str) -> Result<()> {
        validation::validate_environment(environment)?;
        let policy = self.policies.entry(environment.to_string()).or_default();
        if !policy.allowed_users.iter().any(|u| u == user) {
            policy.allowed_users.push(user.to_string());
        }
        self.save()
    }

    /// Let every holder of `role` access `environment`.
    pub fn allow_role(&mut self, environment: &str, role: &str) -> Result<()> {
        validation::validate_environment(environment)?;
        let policy = self.policies.entry(environment.to_string()).or_default();
        if !policy.allowed_roles.iter().any(|r| r == role) {
            policy.allowed_roles.push(role.to_string());
        }
        self.save()
    }

    /// Remove every grant and listing of `user` on `environment`. Returns
    /// whether anything was removed.
    pub fn revoke(&mut self, user: &str, environment: &str) -> Result<bool> {
        let Some(policy) = self.policies.get_mut(environment) else {
            return Ok(false);
        };
        let before = policy.entries.len() + policy.allowed_users.len();
        policy.entries.retain(|e| e.user != user);
        policy.allowed_users.retain(|u| u != user);
        let removed = before != policy.entries.len() + policy.allowed_users.len();

        if removed {
            self.save()?;
            info!(user = %user, environment = %environment, "revoked access");
        }
        Ok(removed)
    }

    /// Grants on `environment` that haven't expired.
    pub fn active_entries(&self, environment: &str) -> Vec<&AccessEntry> {
        self.active_entries_at(environment, Utc::now())
    }

    pub fn active_entries_at(&self, environment: &str, now: DateTime<Utc>) -> Vec<&AccessEntry> {
        self.policies
            .get(environment)
            .map(|p| p.entries.iter().filter(|e| e.is_active_at(now)).collect())
            .unwrap_or_default()
    }
}
