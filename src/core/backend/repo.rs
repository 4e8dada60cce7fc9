//! Thin wrapper over the `git` binary.
//!
//! Only the handful of plumbing calls the git backend and the conflict
//! resolver need. Every command runs with `-C <toplevel>` so paths are
//! always relative to the repository root.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::debug;

use crate::error::{BackendError, ConflictError, Result};

/// A path with unmerged index entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmergedPath {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    /// Stage 1 (common ancestor) present.
    pub base: bool,
    /// Stage 2 (ours) present.
    pub ours: bool,
    /// Stage 3 (theirs) present.
    pub theirs: bool,
}

/// A git working tree.
#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
}

impl GitRepo {
    /// Whether a `git` binary is on `PATH`.
    pub fn is_available() -> bool {
        Command::new("git")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Find the repository containing `path`.
    ///
    /// # Errors
    ///
    /// Returns `ConflictError::NotARepository` if `path` isn't inside a work tree.
    pub fn discover(path: &Path) -> Result<Self> {
        let output = Command::new("git")
            .arg("-C")
            .arg(path)
            .args(["rev-parse", "--show-toplevel"])
            .env("LC_ALL", "C")
            .output()?;
        if !output.status.success() {
            return Err(ConflictError::NotARepository(path.display().to_string()).into());
        }
        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let root = fs::canonicalize(&root).map_err(|e| BackendError::io(&root, e))?;
        debug!(root = %root.display(), "found git repository");
        Ok(Self { root })
    }

    /// `git init` at `path` and open it.
    pub fn init(path: &Path) -> Result<Self> {
        fs::create_dir_all(path).map_err(|e| BackendError::io(path, e))?;
        let output = Command::new("git")
            .arg("-C")
            .arg(path)
            .args(["init", "--quiet"])
            .env("LC_ALL", "C")
            .output()?;
        check("init", &output)?;
        Self::discover(path)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new("git");
        cmd.arg("-C")
            .arg(&self.root)
            .args(args)
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null());
        cmd
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        debug!(args = ?args, "git");
        Ok(self.command(args).output()?)
    }

    /// Run and require success; returns stdout.
    fn git(&self, args: &[&str]) -> Result<Vec<u8>> {
        let output = self.run(args)?;
        check(args.first().copied().unwrap_or("git"), &output)?;
        Ok(output.stdout)
    }

    /// Path of `abs` relative to the repository root, `/`-separated.
    ///
    /// # Errors
    ///
    /// Returns `ConflictError::Untracked` if `abs` is outside the work tree.
    pub fn relative(&self, abs: &Path) -> Result<String> {
        let abs = match fs::canonicalize(abs) {
            Ok(p) => p,
            Err(_) => match (abs.parent(), abs.file_name()) {
                (Some(parent), Some(name)) => fs::canonicalize(parent)
                    .map_err(|e| BackendError::io(parent, e))?
                    .join(name),
                _ => abs.to_path_buf(),
            },
        };
        let rel = abs
            .strip_prefix(&self.root)
            .map_err(|_| ConflictError::Untracked(abs.display().to_string()))?;
        Ok(rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"))
    }

    /// Stage `paths` (additions, modifications and deletions).
    pub fn add(&self, paths: &[&str]) -> Result<()> {
        let mut args = vec!["add", "--all", "--"];
        args.extend_from_slice(paths);
        self.git(&args)?;
        Ok(())
    }

    /// Remove `path` from the index, resolving it as deleted.
    pub fn remove(&self, path: &str) -> Result<()> {
        self.git(&["rm", "--quiet", "--cached", "--ignore-unmatch", "--", path])?;
        Ok(())
    }

    /// Whether the index differs from `HEAD`.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let output = self.run(&["diff", "--cached", "--quiet"])?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(git_error("diff", &output)),
        }
    }

    /// Whether a merge is in progress.
    pub fn is_merging(&self) -> Result<bool> {
        Ok(self
            .run(&["rev-parse", "-q", "--verify", "MERGE_HEAD"])?
            .status
            .success())
    }

    /// Commit the index. Returns `false` when there was nothing to commit.
    pub fn commit(&self, message: &str) -> Result<bool> {
        if !self.is_merging()? && !self.has_staged_changes()? {
            return Ok(false);
        }
        self.git(&["commit", "--quiet", "--no-verify", "-m", message])?;
        Ok(true)
    }

    pub fn fetch(&self, remote: &str, branch: Option<&str>) -> Result<()> {
        let mut args = vec!["fetch", "--quiet", remote];
        if let Some(branch) = branch {
            args.push(branch);
        }
        self.git(&args)?;
        Ok(())
    }

    /// Merge `rev` into the current branch.
    ///
    /// Returns `true` for a clean merge and `false` when it stopped with
    /// conflicts.
    pub fn merge(&self, rev: &str) -> Result<bool> {
        let output = self.run(&["merge", "--no-edit", "--no-ff", rev])?;
        if output.status.success() {
            return Ok(true);
        }
        if self.unmerged()?.is_empty() {
            return Err(git_error("merge", &output));
        }
        Ok(false)
    }

    /// Fetch and merge. Returns `true` for a clean merge.
    pub fn pull(&self, remote: &str, branch: Option<&str>) -> Result<bool> {
        self.fetch(remote, branch)?;
        self.merge("FETCH_HEAD")
    }

    /// Paths with unmerged index entries, sorted.
    pub fn unmerged(&self) -> Result<Vec<UnmergedPath>> {
        let out = self.git(&["ls-files", "-u", "-z"])?;
        let mut paths: Vec<UnmergedPath> = Vec::new();

        // <mode> SP <object> SP <stage> TAB <path> NUL
        for entry in out.split(|b| *b == 0).filter(|e| !e.is_empty()) {
            let entry = String::from_utf8_lossy(entry);
            let Some((meta, path)) = entry.split_once('\t') else {
                continue;
            };
            let stage = meta.rsplit(' ').next().unwrap_or("");

            let idx = match paths.iter().position(|p| p.path == path) {
                Some(i) => i,
                None => {
                    paths.push(UnmergedPath {
                        path: path.to_string(),
                        base: false,
                        ours: false,
                        theirs: false,
                    });
                    paths.len() - 1
                }
            };
            match stage {
                "1" => paths[idx].base = true,
                "2" => paths[idx].ours = true,
                "3" => paths[idx].theirs = true,
                _ => {}
            }
        }

        paths.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(paths)
    }

    /// Contents of `path` at index stage 1, 2 or 3.
    pub fn show_stage(&self, stage: u8, path: &str) -> Result<Vec<u8>> {
        self.git(&["show", &format!(":{}:{}", stage, path)])
    }

    /// Unix time of the last commit on `rev` touching `path`.
    pub fn last_commit_time(&self, rev: &str, path: &str) -> Result<Option<i64>> {
        let out = self.git(&["log", "-1", "--format=%ct", rev, "--", path])?;
        let text = String::from_utf8_lossy(&out);
        Ok(text.trim().parse().ok())
    }

    /// Set a repository-local config value.
    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.git(&["config", key, value])?;
        Ok(())
    }
}

fn check(command: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        Ok(())
    } else {
        Err(git_error(command, output))
    }
}

fn git_error(command: &str, output: &Output) -> crate::error::Error {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stderr = if stderr.is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        stderr
    };
    BackendError::Git {
        command: command.to_string(),
        stderr,
    }
    .into()
}
