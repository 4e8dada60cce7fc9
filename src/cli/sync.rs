//! Sync command: commit, pull and resolve conflicts on the git backend.

use std::io::{self, IsTerminal};
use std::path::Path;

use dialoguer::Select;
use tracing::info;
use zeroize::Zeroizing;

use crate::cli::output;
use crate::core::conflict::ConflictPrompt;
use crate::core::domain::{Conflict, Resolution, Strategy};
use crate::core::vault::Vault;
use crate::error::{ConflictError, Error, Result};

/// Asks on the terminal which side of a conflict to keep.
struct TerminalPrompt;

fn describe(value: &Option<Zeroizing<Vec<u8>>>) -> String {
    match value {
        Some(v) => format!("{:?}", String::from_utf8_lossy(v)),
        None => "(deleted)".to_string(),
    }
}

impl ConflictPrompt for TerminalPrompt {
    fn choose(&mut self, conflict: &Conflict) -> Result<Option<Resolution>> {
        if !io::stdin().is_terminal() {
            return Ok(None);
        }
        let items = [
            format!("keep local:  {}", describe(&conflict.local)),
            format!("keep remote: {}", describe(&conflict.remote)),
            "skip".to_string(),
        ];
        let choice = Select::new()
            .with_prompt(format!(
                "{} changed on both sides in {}",
                output::key(&conflict.key),
                output::env(&conflict.environment)
            ))
            .items(&items)
            .default(0)
            .interact_opt()
            .map_err(prompt_error)?;

        let side = |v: &Option<Zeroizing<Vec<u8>>>| match v {
            Some(v) => Resolution::Value(v.clone()),
            None => Resolution::Deleted,
        };
        Ok(match choice {
            Some(0) => Some(side(&conflict.local)),
            Some(1) => Some(side(&conflict.remote)),
            _ => None,
        })
    }
}

fn prompt_error(e: dialoguer::Error) -> Error {
    ConflictError::Prompt(e.to_string()).into()
}

/// Sync with `remote`, settling conflicts with `strategy`.
pub fn execute(root: &Path, remote: &str, branch: Option<&str>, strategy: Strategy) -> Result<()> {
    info!(remote = %remote, strategy = %strategy, "syncing");
    let mut vault = Vault::open(root)?;

    let mut prompt = TerminalPrompt;
    let report = vault.sync(remote, branch, strategy, Some(&mut prompt))?;

    if report.clean {
        output::success(&format!("in sync with {}", remote));
        return Ok(());
    }

    let summary = &report.summary;
    output::header(&format!(
        "{} conflicts: {} resolved, {} unresolved",
        summary.total(),
        summary.resolved_count,
        summary.unresolved_count
    ));
    for item in &summary.outcomes {
        let line = format!(
            "{}/{}: {}",
            output::env(&item.environment),
            output::key(&item.key),
            item.outcome
        );
        if item.outcome.is_resolved() {
            output::list_item(&line);
        } else {
            output::warn(&line);
        }
    }

    if report.committed {
        output::success("merge committed");
    } else {
        output::hint("resolve the remaining conflicts, then run lockbox sync again");
    }
    Ok(())
}
