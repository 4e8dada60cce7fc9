//! Key rotation command.

use std::path::Path;
use tracing::info;

use crate::cli::{open, output};
use crate::core::keys::KeyScope;
use crate::error::Result;

/// Rotate the key of the environment, or finish an interrupted rotation.
pub fn execute(root: &Path, env: Option<&str>, resume: bool) -> Result<()> {
    let (mut vault, env) = open(root, env)?;
    info!(environment = %env, resume, "rotating key");

    if resume {
        match vault.resume_rotation(&env)? {
            Some(count) => output::success(&format!("finished rotation ({} values re-encrypted)", count)),
            None => output::dimmed("no rotation pending"),
        }
        return Ok(());
    }

    let count = vault.rotate(&env)?;
    let scope = match vault.config().keys.scope {
        KeyScope::Environment => format!("key for {}", output::env(&env)),
        KeyScope::Project => "project key".to_string(),
    };
    output::success(&format!("rotated {} ({} values re-encrypted)", scope, count));
    output::hint("the new key is random; the old password no longer applies");
    Ok(())
}
