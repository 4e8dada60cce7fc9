//! Variable commands: set, get, rm, list.

use std::io::{self, IsTerminal, Read, Write};
use std::path::Path;

use dialoguer::Password;
use tracing::info;
use zeroize::Zeroizing;

use crate::cli::{open, output};
use crate::error::Result;

/// Set a variable. Without `value`, read it from stdin or a hidden prompt.
pub fn set(root: &Path, env: Option<&str>, key: &str, value: Option<String>, plain: bool) -> Result<()> {
    let (mut vault, env) = open(root, env)?;

    let value = match value {
        Some(v) => Zeroizing::new(v.into_bytes()),
        None if !io::stdin().is_terminal() => {
            let mut buf = Zeroizing::new(Vec::new());
            io::stdin().read_to_end(&mut buf)?;
            // A single trailing newline comes from `echo`, not the value.
            if buf.last() == Some(&b'\n') {
                buf.pop();
            }
            buf
        }
        None => {
            let input = Password::new()
                .with_prompt(format!("Value for {}", output::key(key)))
                .allow_empty_password(true)
                .interact()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            Zeroizing::new(input.into_bytes())
        }
    };

    info!(key = %key, environment = %env, bytes = value.len(), "setting variable");
    vault.set(&env, key, &value, !plain)?;
    output::success(&format!("set {} in {}", output::key(key), output::env(&env)));
    Ok(())
}

/// Print a variable's raw value.
pub fn get(root: &Path, env: Option<&str>, key: &str) -> Result<()> {
    let (mut vault, env) = open(root, env)?;
    let value = vault.get(&env, key)?;

    let mut stdout = io::stdout().lock();
    stdout.write_all(&value)?;
    if io::stdout().is_terminal() && value.last() != Some(&b'\n') {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}

/// Remove a variable.
pub fn rm(root: &Path, env: Option<&str>, key: &str) -> Result<()> {
    let (mut vault, env) = open(root, env)?;
    vault.delete(&env, key)?;
    output::success(&format!("removed {} from {}", output::key(key), output::env(&env)));
    Ok(())
}

/// List variable names.
pub fn list(root: &Path, env: Option<&str>) -> Result<()> {
    let (mut vault, env) = open(root, env)?;
    let keys = vault.list(&env)?;

    if keys.is_empty() {
        output::dimmed(&format!("no variables in {}", env));
        return Ok(());
    }
    output::header(&format!("{} ({})", env, keys.len()));
    for key in &keys {
        if vault.is_sealed(&env, key)? {
            output::list_item(key);
        } else {
            output::list_item(&format!("{} (plain)", key));
        }
    }
    Ok(())
}
