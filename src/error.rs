//! Error types.
//!
//! Each concern has its own error enum; all of them fold into [`Error`].
//! [`Error::kind`] maps any error onto the coarse categories callers branch on.

use thiserror::Error;

/// Cipher engine errors.
#[derive(Error, Debug)]
pub enum CipherError {
    #[error("invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    #[error("authentication failed: data was tampered with or the key is wrong")]
    AuthenticationFailed,

    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("unsupported record version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("key derivation failed: {0}")]
    KdfFailed(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
}

/// Keystore errors.
#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("key not found: {service}/{account}")]
    NotFound { service: String, account: String },

    #[error("refusing to store empty key material for {service}/{account}")]
    EmptyData { service: String, account: String },

    #[error("keystore file is corrupt: {0}")]
    Corrupt(String),

    #[error("keychain access denied")]
    KeychainAccessDenied,

    #[error("keychain error: {0}")]
    KeychainError(String),

    #[error("failed to read keystore: {0}")]
    ReadFailed(#[source] std::io::Error),

    #[error("failed to write keystore: {0}")]
    WriteFailed(#[source] std::io::Error),

    #[error("no password available: {0}")]
    NoPassword(String),
}

/// Storage backend errors.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("variable not found: {key} (environment: {environment})")]
    NotFound { environment: String, key: String },

    #[error("{backend} backend does not support {capability}")]
    Unsupported {
        backend: &'static str,
        capability: &'static str,
    },

    #[error("backend is closed")]
    Closed,

    #[error("value for {key} is {size} bytes, limit is {limit}")]
    ValueTooLarge {
        key: String,
        size: usize,
        limit: usize,
    },

    #[error("corrupt record for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("migration failed after {copied} of {total} variables: {reason}")]
    Migration {
        copied: usize,
        total: usize,
        reason: String,
    },
}

impl BackendError {
    /// Wrap an I/O error with the path it concerns.
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Project configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("not initialized: run `lockbox init` first")]
    NotInitialized,

    #[error("already initialized: .lockbox.toml exists")]
    AlreadyInitialized,

    #[error("failed to read config: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),
}

/// Input validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("variable name cannot be empty")]
    EmptyKey,

    #[error("invalid variable name '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("invalid environment name '{name}': {reason}")]
    InvalidEnvironment { name: String, reason: String },

    #[error("insecure permissions on {path}: expected {expected}, found {actual}")]
    InvalidPermissions {
        path: String,
        expected: String,
        actual: String,
    },
}

/// Conflict resolution errors.
#[derive(Error, Debug)]
pub enum ConflictError {
    #[error("not a git repository: {0}")]
    NotARepository(String),

    #[error("path {0} is outside the tracked variable directory")]
    Untracked(String),

    #[error("merge left conflicts outside tracked variables: {0}")]
    ForeignConflicts(String),

    #[error("conflict prompt failed: {0}")]
    Prompt(String),
}

/// Access control errors.
#[derive(Error, Debug)]
pub enum AccessError {
    #[error("{user} lacks {level} access to {environment}")]
    Denied {
        user: String,
        environment: String,
        level: String,
    },

    #[error("failed to parse access file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Coarse error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidKey,
    InvalidData,
    AuthenticationFailed,
    UnsupportedCapability,
    BackendIo,
    InvalidInput,
    AccessDenied,
    Conflict,
    Config,
}

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Keystore(#[from] KeystoreError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(BackendError::Sqlite(e))
    }
}

impl Error {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cipher(e) => match e {
                CipherError::InvalidKeyLength { .. } => ErrorKind::InvalidKey,
                CipherError::AuthenticationFailed => ErrorKind::AuthenticationFailed,
                CipherError::Malformed(_)
                | CipherError::UnknownAlgorithm(_)
                | CipherError::UnsupportedVersion { .. } => ErrorKind::InvalidData,
                CipherError::KdfFailed(_) | CipherError::EncryptionFailed(_) => {
                    ErrorKind::InvalidInput
                }
            },
            Self::Keystore(e) => match e {
                KeystoreError::NotFound { .. } => ErrorKind::NotFound,
                KeystoreError::EmptyData { .. } | KeystoreError::NoPassword(_) => {
                    ErrorKind::InvalidInput
                }
                KeystoreError::Corrupt(_) => ErrorKind::InvalidData,
                KeystoreError::KeychainAccessDenied => ErrorKind::AccessDenied,
                KeystoreError::KeychainError(_)
                | KeystoreError::ReadFailed(_)
                | KeystoreError::WriteFailed(_) => ErrorKind::BackendIo,
            },
            Self::Backend(e) => match e {
                BackendError::NotFound { .. } => ErrorKind::NotFound,
                BackendError::Unsupported { .. } => ErrorKind::UnsupportedCapability,
                BackendError::ValueTooLarge { .. } => ErrorKind::InvalidInput,
                BackendError::Corrupt { .. } => ErrorKind::InvalidData,
                BackendError::Closed
                | BackendError::Sqlite(_)
                | BackendError::Git { .. }
                | BackendError::Io { .. }
                | BackendError::Migration { .. } => ErrorKind::BackendIo,
            },
            Self::Config(_) => ErrorKind::Config,
            Self::Validation(_) => ErrorKind::InvalidInput,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Access(AccessError::Denied { .. }) => ErrorKind::AccessDenied,
            Self::Access(AccessError::Parse(_)) => ErrorKind::InvalidData,
            Self::Io(_) => ErrorKind::BackendIo,
        }
    }

    /// Whether this error means "the thing asked for does not exist".
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

pub type Result<T> = std::result::Result<T, Error>;
