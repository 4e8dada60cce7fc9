//! Type aliases for domain concepts.
//!
//! Provides semantic type aliases to make function signatures more descriptive.

/// A variable name (e.g., DATABASE_URL, API_KEY).
///
/// Must match `[A-Za-z_][A-Za-z0-9_]*`.
pub type VariableKey = String;

/// An environment name (e.g., development, production).
pub type EnvironmentName = String;

/// A project identifier; the keystore service name.
pub type ProjectId = String;

/// A user name as recorded in history, audit and access entries.
pub type UserName = String;
