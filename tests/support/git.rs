//! Git repository fixtures.

use std::path::{Path, PathBuf};
use std::process::Command;

use lockbox::core::config::BackendType;
use lockbox::core::keystore::FileKeystore;
use lockbox::core::vault::Vault;
use tempfile::TempDir;

use super::{open_at, Test};

/// Run git in `dir`, pinning author and committer time when given.
pub fn git(dir: &Path, args: &[&str], time: Option<i64>) {
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(dir).args(args);
    if let Some(t) = time {
        let date = format!("@{} +0000", t);
        cmd.env("GIT_AUTHOR_DATE", &date).env("GIT_COMMITTER_DATE", &date);
    }
    let out = cmd.output().expect("failed to run git");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
}

fn configure(dir: &Path) {
    git(dir, &["config", "user.name", "Test"], None);
    git(dir, &["config", "user.email", "test@example.com"], None);
    git(dir, &["config", "commit.gpgsign", "false"], None);
}

/// Two clones of one git-backed project sharing a keystore.
///
/// `local` is where sync runs; `remote` plays the other writer.
pub struct GitPair {
    test: Test,
    pub remote_dir: TempDir,
}

impl GitPair {
    /// A project committed in `local` and cloned to `remote`.
    pub fn new() -> Self {
        let test = Test::new();
        git(test.root(), &["init", "-q"], None);
        configure(test.root());
        drop(test.init(BackendType::Git));
        commit(test.root(), "init", 1_000);

        let remote_dir = TempDir::new().expect("failed to create temp dir");
        let out = Command::new("git")
            .arg("clone")
            .arg("-q")
            .arg(test.root())
            .arg(remote_dir.path().join("repo"))
            .output()
            .expect("failed to run git clone");
        assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
        configure(&remote_dir.path().join("repo"));

        Self { test, remote_dir }
    }

    pub fn local(&self) -> &Path {
        self.test.root()
    }

    pub fn remote(&self) -> PathBuf {
        self.remote_dir.path().join("repo")
    }

    pub fn open_local(&self) -> Vault<FileKeystore> {
        open_at(self.local(), self.test.keystore(), "alice")
    }

    pub fn open_remote(&self) -> Vault<FileKeystore> {
        open_at(&self.remote(), self.test.keystore(), "bob")
    }

    /// Set `key` on one side and commit at `time`.
    pub fn write(&self, remote: bool, env: &str, key: &str, value: &[u8], time: i64) {
        let dir = if remote { self.remote() } else { self.local().to_path_buf() };
        {
            let mut vault = open_at(&dir, self.test.keystore(), "writer");
            vault.set(env, key, value, true).expect("set failed");
        }
        commit(&dir, &format!("set {}", key), time);
    }

    /// Remote path usable as a git remote URL.
    pub fn remote_url(&self) -> String {
        self.remote().to_string_lossy().to_string()
    }
}

/// Stage everything and commit at `time`.
pub fn commit(dir: &Path, message: &str, time: i64) {
    git(dir, &["add", "--all"], None);
    git(dir, &["commit", "-q", "-m", message], Some(time));
}
