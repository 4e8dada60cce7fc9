//! Init command.

use std::path::Path;
use tracing::info;

use crate::cli::output;
use crate::core::backend::GitRepo;
use crate::core::config::{BackendType, Config};
use crate::core::vault::Vault;
use crate::error::Result;

/// Initialize lockbox in `root`.
pub fn execute(root: &Path, project: Option<String>, backend: BackendType) -> Result<()> {
    let project = project.unwrap_or_else(|| {
        root.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "lockbox".to_string())
    });
    info!(project = %project, backend = %backend, "initializing");

    let vault = Vault::init(root, &project, backend)?;
    let config = vault.config();

    output::success("lockbox initialized");
    output::kv("project:    ", &project);
    output::kv("backend:    ", backend);
    output::kv("config:     ", Config::config_path(root).display());
    output::kv("data:       ", config.data_dir(root).display());
    output::kv("environments", config.keys.environments.join(", "));

    if backend == BackendType::Git && GitRepo::discover(root).is_err() {
        output::warn("not inside a git repository; `lockbox sync` needs one");
    }
    output::hint("next: lockbox set KEY VALUE");
    Ok(())
}
