//! Backend migration command.

use std::path::Path;

use crate::cli::output;
use crate::core::config::BackendType;
use crate::core::vault::Vault;
use crate::error::Result;

/// Copy every environment to `target` and switch the project config.
pub fn execute(root: &Path, target: BackendType) -> Result<()> {
    let mut vault = Vault::open(root)?;
    let from = vault.config().storage.backend;

    let count = vault.migrate(target)?;
    output::success(&format!("migrated {} variables from {} to {}", count, from, target));
    output::dimmed("the old data was left in place");
    Ok(())
}
