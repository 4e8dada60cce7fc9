//! Command-line interface.
//!
//! A thin layer over [`Vault`](crate::core::vault::Vault): parse arguments,
//! call one vault operation, print the result.

pub mod access;
pub mod history;
pub mod init;
pub mod migrate;
pub mod output;
pub mod rotate;
pub mod secrets;
pub mod sync;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::core::access::AccessLevel;
use crate::core::config::BackendType;
use crate::core::domain::Strategy;
use crate::core::vault::Vault;
use crate::error::Result;

/// Lockbox - encrypted, versioned variables for every environment.
#[derive(Parser)]
#[command(
    name = "lockbox",
    about = "Encrypted, versioned, git-friendly variables for every environment",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Environment to operate on (default from .lockbox.toml)
    #[arg(short, long, global = true)]
    pub env: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Top-level commands.
#[derive(Subcommand)]
pub enum Command {
    /// Initialize lockbox in the current directory
    Init {
        /// Project name (defaults to the directory name)
        #[arg(short, long)]
        project: Option<String>,
        /// Storage backend: file, sql or git
        #[arg(short, long, default_value = "file")]
        backend: BackendType,
    },

    /// Set a variable (reads the value from stdin when omitted)
    Set {
        /// Variable name (e.g., DATABASE_URL)
        key: String,
        /// Value
        value: Option<String>,
        /// Store the value unencrypted
        #[arg(long)]
        plain: bool,
    },

    /// Print a variable
    Get {
        /// Variable name
        key: String,
    },

    /// Remove a variable
    Rm {
        /// Variable name
        key: String,
    },

    /// List variable names
    List,

    /// Show the change history of a variable (sql backend)
    History {
        /// Variable name
        key: String,
        /// Maximum number of entries
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },

    /// Show the audit log (sql backend)
    Audit {
        /// Maximum number of entries
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Re-encrypt every variable under a fresh key
    Rotate {
        /// Only finish an interrupted rotation
        #[arg(long)]
        resume: bool,
    },

    /// Move every environment to another backend
    Migrate {
        /// Target backend: file, sql or git
        backend: BackendType,
    },

    /// Commit, pull and resolve conflicts (git backend)
    Sync {
        /// Remote to pull from
        #[arg(long, default_value = "origin")]
        remote: String,
        /// Branch to pull
        #[arg(long)]
        branch: Option<String>,
        /// Conflict strategy: ours, theirs, newest or prompt
        #[arg(short, long, default_value = "prompt")]
        strategy: Strategy,
    },

    /// Grant a user access to the environment
    Grant {
        /// User name
        user: String,
        /// Access level: read, write or admin
        #[arg(short, long, default_value = "read")]
        level: AccessLevel,
        /// Expire the grant after this many days
        #[arg(long)]
        days: Option<i64>,
    },

    /// Revoke a user's access to the environment
    Revoke {
        /// User name
        user: String,
    },
}

/// Execute a command.
///
/// # Errors
///
/// Returns error if the command execution fails.
pub fn execute(command: Command, env: Option<String>) -> Result<()> {
    let root = current_dir()?;
    let env = env.as_deref();

    match command {
        Command::Init { project, backend } => init::execute(&root, project, backend),
        Command::Set { key, value, plain } => secrets::set(&root, env, &key, value, plain),
        Command::Get { key } => secrets::get(&root, env, &key),
        Command::Rm { key } => secrets::rm(&root, env, &key),
        Command::List => secrets::list(&root, env),
        Command::History { key, limit } => history::history(&root, env, &key, limit),
        Command::Audit { limit } => history::audit(&root, env, limit),
        Command::Rotate { resume } => rotate::execute(&root, env, resume),
        Command::Migrate { backend } => migrate::execute(&root, backend),
        Command::Sync {
            remote,
            branch,
            strategy,
        } => sync::execute(&root, &remote, branch.as_deref(), strategy),
        Command::Grant { user, level, days } => access::grant(&root, env, &user, level, days),
        Command::Revoke { user } => access::revoke(&root, env, &user),
    }
}

fn current_dir() -> Result<PathBuf> {
    Ok(std::env::current_dir()?)
}

/// Open the vault at `root` and resolve the target environment.
pub(crate) fn open(root: &std::path::Path, env: Option<&str>) -> Result<(Vault, String)> {
    let vault = Vault::open(root)?;
    let env = vault.environment(env).to_string();
    Ok((vault, env))
}
