//! Input validation.
//!
//! Validates variable names, environment names and file permissions.

use crate::error::{Result, ValidationError};

/// Validate a variable name.
///
/// Variable names must match `[A-Za-z_][A-Za-z0-9_]*`:
/// - Only ASCII letters, digits and underscore
/// - Cannot start with a digit
/// - Cannot be empty
///
/// # Errors
///
/// Returns `ValidationError` if the key is invalid.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(ValidationError::EmptyKey.into());
    }

    if let Some(first_char) = key.chars().next() {
        if first_char.is_ascii_digit() {
            return Err(ValidationError::InvalidKey {
                key: key.to_string(),
                reason: "cannot start with a digit".to_string(),
            }
            .into());
        }
    }

    for (i, ch) in key.chars().enumerate() {
        if !ch.is_ascii_alphanumeric() && ch != '_' {
            return Err(ValidationError::InvalidKey {
                key: key.to_string(),
                reason: format!(
                    "invalid character '{}' at position {}. Only A-Z, a-z, 0-9, and underscore are allowed",
                    ch,
                    i + 1
                ),
            }
            .into());
        }
    }

    Ok(())
}

/// Validate an environment name.
///
/// Environment names become directory and file names, so they are limited to
/// ASCII letters, digits, `-` and `_`, and may not start with `-`.
pub fn validate_environment(name: &str) -> Result<()> {
    let invalid = |reason: &str| -> crate::error::Error {
        ValidationError::InvalidEnvironment {
            name: name.to_string(),
            reason: reason.to_string(),
        }
        .into()
    };

    if name.is_empty() {
        return Err(invalid("cannot be empty"));
    }
    if name.starts_with('-') {
        return Err(invalid("cannot start with '-'"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid("only letters, digits, '-' and '_' are allowed"));
    }
    Ok(())
}

/// Validate file permissions (Unix only).
///
/// Checks that a file has the expected permissions mode.
///
/// # Errors
///
/// Returns `ValidationError` if permissions don't match.
#[cfg(unix)]
pub fn validate_file_permissions(path: &std::path::Path, expected_mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path)?;
    let actual_mode = metadata.permissions().mode() & 0o777;

    if actual_mode != expected_mode {
        return Err(ValidationError::InvalidPermissions {
            path: path.display().to_string(),
            expected: format!("{:o}", expected_mode),
            actual: format!("{:o}", actual_mode),
        }
        .into());
    }

    Ok(())
}
