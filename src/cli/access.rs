//! Access commands: grant and revoke.

use chrono::{Duration, Utc};
use std::path::Path;

use crate::cli::{open, output};
use crate::core::access::AccessLevel;
use crate::error::{ConfigError, Result};

/// Grant `user` access to the environment, optionally expiring after `days`.
pub fn grant(root: &Path, env: Option<&str>, user: &str, level: AccessLevel, days: Option<i64>) -> Result<()> {
    let (mut vault, env) = open(root, env)?;

    let expires_at = match days {
        Some(d) if d <= 0 => {
            return Err(ConfigError::InvalidValue {
                field: "days",
                reason: "must be positive".to_string(),
            }
            .into())
        }
        Some(d) => Some(Utc::now() + Duration::days(d)),
        None => None,
    };

    vault.grant(user, &env, level, expires_at)?;
    match expires_at {
        Some(t) => output::success(&format!(
            "granted {} {} access to {} until {}",
            user,
            level,
            output::env(&env),
            t.format("%Y-%m-%d")
        )),
        None => output::success(&format!("granted {} {} access to {}", user, level, output::env(&env))),
    }
    Ok(())
}

/// Revoke every grant of `user` on the environment.
pub fn revoke(root: &Path, env: Option<&str>, user: &str) -> Result<()> {
    let (mut vault, env) = open(root, env)?;
    if vault.revoke(user, &env)? {
        output::success(&format!("revoked {} from {}", user, output::env(&env)));
    } else {
        output::dimmed(&format!("{} had no access to {}", user, env));
    }
    Ok(())
}
