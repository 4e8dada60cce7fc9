//! Tests for rotate, migrate and sync.

use crate::support::*;

#[test]
fn test_rotate_keeps_values() {
    let t = Test::init_cli("sql");
    assert_success(&t.set("A", "1"));
    assert_success(&t.set("B", "2"));

    let output = t.run(&["rotate"]);
    assert_success(&output);
    assert_stdout_contains(&output, "2 values re-encrypted");

    // The key is no longer derived from the password.
    let output = t.cmd().env("LOCKBOX_PASSWORD", "something-else").args(["get", "A"]).output().unwrap();
    assert_success(&output);
    assert_eq!(stdout(&output), "1");
}

#[test]
fn test_rotate_resume_without_pending() {
    let t = Test::init_cli("file");
    assert_success(&t.set("A", "1"));
    let output = t.run(&["rotate", "--resume"]);
    assert_success(&output);
    assert_stdout_contains(&output, "no rotation pending");
}

#[test]
fn test_migrate_switches_backend() {
    let t = Test::init_cli("file");
    assert_success(&t.set("A", "1"));
    assert_success(&t.run(&["-e", "production", "set", "B", "2", "--plain"]));

    let output = t.run(&["migrate", "sql"]);
    assert_success(&output);
    assert_stdout_contains(&output, "migrated 2 variables from file to sql");

    let config = std::fs::read_to_string(t.dir.path().join(".lockbox.toml")).unwrap();
    assert!(config.contains("backend = \"sql\""));
    assert_eq!(stdout(&t.get("A")), "1");
    assert_success(&t.run(&["history", "A"]));

    assert_failure(&t.run(&["migrate", "sql"]));
}

#[test]
fn test_sync_requires_git_backend() {
    let t = Test::init_cli("file");
    let output = t.run(&["sync", "--strategy", "ours"]);
    assert_failure(&output);
    assert_stderr_contains(&output, "git backend");
}

#[test]
fn test_sync_rejects_unknown_strategy() {
    let t = Test::init_cli("git");
    assert_failure(&t.run(&["sync", "--strategy", "merge"]));
}
