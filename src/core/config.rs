//! Configuration file management.
//!
//! Handles reading, writing, and validating `.lockbox.toml` configuration files.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;
use zeroize::Zeroizing;

use crate::core::constants;
use crate::core::keys::KeyScope;
use crate::core::types::{EnvironmentName, ProjectId};
use crate::core::validation;
use crate::error::{ConfigError, Result};

/// Project configuration stored in `.lockbox.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Metadata about the project
    pub lockbox: Meta,
    /// Where variables are persisted
    #[serde(default)]
    pub storage: Storage,
    /// Key custody and environments
    #[serde(default)]
    pub keys: Keys,
}

/// Metadata section of the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    /// Configuration version
    pub version: String,
    /// Project identifier, used as the keystore service name
    pub project: ProjectId,
}

/// Storage backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// One encrypted JSON file per environment
    #[default]
    File,
    /// SQLite with history and audit
    #[serde(alias = "relational", alias = "sqlite")]
    Sql,
    /// One encrypted blob per variable in a git working tree
    Git,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Sql => "sql",
            Self::Git => "git",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "sql" | "sqlite" | "relational" => Ok(Self::Sql),
            "git" => Ok(Self::Git),
            other => Err(ConfigError::InvalidValue {
                field: "storage.backend",
                reason: format!("unknown backend '{}' (expected file, sql or git)", other),
            }
            .into()),
        }
    }
}

/// `[storage]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Storage {
    #[serde(default)]
    pub backend: BackendType,
    /// Data directory, relative to the project root unless absolute
    #[serde(default = "default_data_path")]
    pub path: String,
}

fn default_data_path() -> String {
    constants::DATA_DIR.to_string()
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            path: default_data_path(),
        }
    }
}

/// `[keys]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keys {
    #[serde(default)]
    pub scope: KeyScope,
    #[serde(default = "default_environments")]
    pub environments: Vec<EnvironmentName>,
    #[serde(default = "default_environment")]
    pub default_environment: EnvironmentName,
}

fn default_environments() -> Vec<EnvironmentName> {
    constants::DEFAULT_ENVIRONMENTS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_environment() -> EnvironmentName {
    constants::DEFAULT_ENVIRONMENTS[0].to_string()
}

impl Default for Keys {
    fn default() -> Self {
        Self {
            scope: KeyScope::default(),
            environments: default_environments(),
            default_environment: default_environment(),
        }
    }
}

/// Everything a backend needs to open one environment.
///
/// `password` is injected at runtime and never written to disk.
pub struct StorageConfig {
    pub environment: EnvironmentName,
    pub backend_type: BackendType,
    pub base_path: PathBuf,
    pub password: Option<Zeroizing<String>>,
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("environment", &self.environment)
            .field("backend_type", &self.backend_type)
            .field("base_path", &self.base_path)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Config {
    /// Create a new configuration with current version and default sections
    pub fn new(project: impl Into<ProjectId>) -> Self {
        Self {
            lockbox: Meta {
                version: env!("CARGO_PKG_VERSION").to_string(),
                project: project.into(),
            },
            storage: Storage::default(),
            keys: Keys::default(),
        }
    }

    /// Path to the configuration file under `root`
    pub fn config_path(root: &Path) -> PathBuf {
        root.join(constants::CONFIG_FILE)
    }

    /// Check if a configuration file exists under `root`
    pub fn exists(root: &Path) -> bool {
        Self::config_path(root).exists()
    }

    /// Load configuration from `<root>/.lockbox.toml`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotInitialized` if the file doesn't exist,
    /// or `ConfigError::Parse` if the TOML is malformed.
    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::config_path(root);
        debug!(path = %path.display(), "loading config");

        if !path.exists() {
            return Err(ConfigError::NotInitialized.into());
        }
        let contents = std::fs::read_to_string(&path).map_err(ConfigError::ReadFile)?;
        let config: Self = toml::from_str(&contents).map_err(ConfigError::Parse)?;

        debug!(
            project = %config.lockbox.project,
            backend = %config.storage.backend,
            environments = config.keys.environments.len(),
            "config loaded"
        );

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `<root>/.lockbox.toml`
    ///
    /// # Errors
    ///
    /// Returns error if validation, serialization or the file write fails.
    pub fn save(&self, root: &Path) -> Result<()> {
        debug!("saving config");
        self.validate()?;

        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        let path = Self::config_path(root);
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Validate the configuration structure and contents
    ///
    /// Checks:
    /// - Version and project are present
    /// - Every environment name is valid and listed once
    /// - The default environment is one of them
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` or `ConfigError::MissingField` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if self.lockbox.version.is_empty() {
            return Err(ConfigError::MissingField { field: "version" }.into());
        }
        if self.lockbox.version.split('.').count() < 2 {
            return Err(ConfigError::InvalidValue {
                field: "version",
                reason: format!("not a valid semver: {}", self.lockbox.version),
            }
            .into());
        }
        if self.lockbox.project.trim().is_empty() {
            return Err(ConfigError::MissingField { field: "project" }.into());
        }
        if self.storage.path.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "storage.path",
            }
            .into());
        }
        if self.keys.environments.is_empty() {
            return Err(ConfigError::MissingField {
                field: "keys.environments",
            }
            .into());
        }

        for (i, env) in self.keys.environments.iter().enumerate() {
            validation::validate_environment(env)?;
            if self.keys.environments[..i].contains(env) {
                return Err(ConfigError::InvalidValue {
                    field: "keys.environments",
                    reason: format!("'{}' is listed twice", env),
                }
                .into());
            }
        }

        if !self.has_environment(&self.keys.default_environment) {
            return Err(ConfigError::InvalidValue {
                field: "keys.default_environment",
                reason: format!(
                    "'{}' is not in keys.environments",
                    self.keys.default_environment
                ),
            }
            .into());
        }

        Ok(())
    }

    pub fn project_id(&self) -> &str {
        &self.lockbox.project
    }

    pub fn has_environment(&self, environment: &str) -> bool {
        self.keys.environments.iter().any(|e| e == environment)
    }

    /// Resolved data directory for this project.
    pub fn data_dir(&self, root: &Path) -> PathBuf {
        let path = Path::new(&self.storage.path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            root.join(path)
        }
    }

    /// Backend settings for one environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownEnvironment` if the environment isn't configured.
    pub fn storage_config(
        &self,
        root: &Path,
        environment: &str,
        password: Option<Zeroizing<String>>,
    ) -> Result<StorageConfig> {
        if !self.has_environment(environment) {
            return Err(ConfigError::UnknownEnvironment(environment.to_string()).into());
        }
        Ok(StorageConfig {
            environment: environment.to_string(),
            backend_type: self.storage.backend,
            base_path: self.data_dir(root),
            password,
        })
    }
}
