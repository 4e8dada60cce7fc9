//! History and audit commands.

use std::path::Path;

use crate::cli::{open, output};
use crate::core::domain::ChangeType;
use crate::error::Result;

/// Show the versions of a variable, newest first. Values are not printed.
pub fn history(root: &Path, env: Option<&str>, key: &str, limit: usize) -> Result<()> {
    let (mut vault, env) = open(root, env)?;
    let entries = vault.history(&env, key, limit)?;

    if entries.is_empty() {
        output::dimmed(&format!("no history for {} in {}", key, env));
        return Ok(());
    }
    output::header(&format!("{} in {}", output::key(key), output::env(&env)));
    for entry in &entries {
        let detail = match entry.change_type {
            ChangeType::Set => format!("{} bytes", entry.value.len()),
            ChangeType::Delete => "deleted".to_string(),
        };
        output::list_item(&format!(
            "v{}  {}  {}  {}  ({})",
            entry.version,
            entry.changed_at.format("%Y-%m-%d %H:%M:%S"),
            entry.change_type.as_str(),
            entry.changed_by,
            detail
        ));
    }
    Ok(())
}

/// Show the audit log, newest first.
pub fn audit(root: &Path, env: Option<&str>, limit: usize) -> Result<()> {
    let (mut vault, env) = open(root, env)?;
    let entries = vault.audit_log(&env, limit)?;

    if entries.is_empty() {
        output::dimmed(&format!("no audit entries for {}", env));
        return Ok(());
    }
    output::header(&format!("audit log for {}", output::env(&env)));
    for entry in &entries {
        if entry.success {
            output::list_item(&entry.to_string());
        } else {
            output::warn(&entry.to_string());
        }
    }
    Ok(())
}
