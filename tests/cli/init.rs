//! Tests for `lockbox init`.

use crate::support::*;
use std::fs;

#[test]
fn test_init_creates_config() {
    let t = Test::new();

    let output = t.init_cmd("sql");
    assert_success(&output);
    assert_stdout_contains(&output, "lockbox initialized");
    assert_stdout_contains(&output, "development, staging, production");

    let config = fs::read_to_string(t.dir.path().join(".lockbox.toml")).unwrap();
    assert!(config.contains("project = \"acme\""));
    assert!(config.contains("backend = \"sql\""));
    assert!(t.dir.path().join(".lockbox").is_dir());
}

#[test]
fn test_init_twice_fails() {
    let t = Test::init_cli("file");
    let output = t.init_cmd("file");
    assert_failure(&output);
    assert_stderr_contains(&output, "already initialized");
}

#[test]
fn test_init_git_outside_repo_warns() {
    crate::skip_without_git!();
    let t = Test::new();
    let output = t.init_cmd("git");
    assert_success(&output);
    assert_stderr_contains(&output, "not inside a git repository");
}

#[test]
fn test_init_rejects_unknown_backend() {
    let t = Test::new();
    assert_failure(&t.init_cmd("postgres"));
    assert!(!t.dir.path().join(".lockbox.toml").exists());
}
