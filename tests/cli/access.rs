//! Tests for grant and revoke.

use crate::support::*;

#[test]
fn test_grant_enforces_environment() {
    let t = Test::init_cli("file");
    assert_success(&t.run(&["-e", "production", "set", "A", "1"]));

    let output = t.run(&["-e", "production", "grant", "bob", "--level", "read"]);
    assert_success(&output);
    assert_stdout_contains(&output, "granted bob read access");
    assert!(t.dir.path().join(".lockbox.access.json").exists());

    let output = t.run_as("bob", &["-e", "production", "get", "A"]);
    assert_success(&output);
    assert_eq!(stdout(&output), "1");

    let output = t.run_as("bob", &["-e", "production", "set", "A", "2"]);
    assert_failure(&output);
    assert_stderr_contains(&output, "bob lacks write access to production");
    assert_stderr_contains(&output, "lockbox grant");

    assert_failure(&t.run_as("mallory", &["-e", "production", "get", "A"]));
    // Development has no policy.
    assert_success(&t.run_as("mallory", &["set", "A", "dev"]));
}

#[test]
fn test_grant_with_expiry() {
    let t = Test::init_cli("file");
    let output = t.run(&["-e", "staging", "grant", "bob", "--level", "write", "--days", "30"]);
    assert_success(&output);
    assert_stdout_contains(&output, "until");

    assert_failure(&t.run(&["-e", "staging", "grant", "carol", "--days", "0"]));
}

#[test]
fn test_revoke() {
    let t = Test::init_cli("file");
    assert_success(&t.run(&["-e", "staging", "grant", "bob", "--level", "write"]));
    assert_success(&t.run_as("bob", &["-e", "staging", "set", "A", "1"]));

    let output = t.run(&["-e", "staging", "revoke", "bob"]);
    assert_success(&output);
    assert_stdout_contains(&output, "revoked bob");
    assert_failure(&t.run_as("bob", &["-e", "staging", "get", "A"]));

    // Only admins may revoke.
    assert_failure(&t.run_as("bob", &["-e", "staging", "revoke", "alice"]));
    assert_stdout_contains(&t.run(&["-e", "staging", "revoke", "bob"]), "had no access");
}

#[test]
fn test_grant_rejects_unknown_level() {
    let t = Test::init_cli("file");
    assert_failure(&t.run(&["grant", "bob", "--level", "owner"]));
    assert!(!t.dir.path().join(".lockbox.access.json").exists());
}
