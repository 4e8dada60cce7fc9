//! Tests for set, get, rm and list.

use crate::support::*;
use predicates::prelude::*;

#[test]
fn test_set_get_roundtrip() {
    let t = Test::init_cli("file");

    assert_success(&t.set("DATABASE_URL", "postgres://localhost/mydb"));
    let output = t.get("DATABASE_URL");
    assert_success(&output);
    assert_eq!(stdout(&output), "postgres://localhost/mydb");
}

#[test]
fn test_value_is_not_stored_in_plaintext() {
    let t = Test::init_cli("file");
    assert_success(&t.set("API_KEY", "sk-test-12345"));

    let data = std::fs::read_to_string(t.dir.path().join(".lockbox/development.json")).unwrap();
    assert!(!data.contains("sk-test-12345"));
}

#[test]
fn test_set_from_stdin_strips_one_newline() {
    let t = Test::init_cli("sql");
    t.cmd()
        .args(["set", "PEM"])
        .write_stdin("line1\nline2\n")
        .assert()
        .success();

    t.cmd()
        .args(["get", "PEM"])
        .assert()
        .success()
        .stdout(predicate::eq("line1\nline2"));
}

#[test]
fn test_environments_are_separate() {
    let t = Test::init_cli("sql");
    assert_success(&t.run(&["set", "A", "dev-value"]));
    assert_success(&t.run(&["--env", "production", "set", "A", "prod-value"]));

    assert_eq!(stdout(&t.run(&["get", "A"])), "dev-value");
    assert_eq!(stdout(&t.run(&["-e", "production", "get", "A"])), "prod-value");
    assert_failure(&t.run(&["-e", "staging", "get", "A"]));
}

#[test]
fn test_list_marks_plain_values() {
    let t = Test::init_cli("file");
    assert_success(&t.set("SECRET", "s"));
    assert_success(&t.run(&["set", "PUBLIC_URL", "https://example.com", "--plain"]));

    let output = t.run(&["list"]);
    assert_success(&output);
    assert_stdout_contains(&output, "SECRET");
    assert_stdout_contains(&output, "PUBLIC_URL (plain)");
    assert_stdout_excludes(&output, "SECRET (plain)");
}

#[test]
fn test_rm_then_get_fails() {
    let t = Test::init_cli("git");
    assert_success(&t.set("TEMP", "x"));
    assert_success(&t.run(&["rm", "TEMP"]));
    assert_failure(&t.get("TEMP"));
    assert_stdout_contains(&t.run(&["list"]), "no variables");
}

#[test]
fn test_history_on_sql() {
    let t = Test::init_cli("sql");
    assert_success(&t.set("DATABASE_URL", "postgres://x"));
    assert_success(&t.set("DATABASE_URL", "postgres://y"));

    let output = t.run(&["history", "DATABASE_URL"]);
    assert_success(&output);
    let out = stdout(&output);
    assert!(out.contains("v2"), "{}", out);
    assert!(out.contains("v1"), "{}", out);
    assert!(out.contains("alice"), "{}", out);
    assert!(!out.contains("postgres://"), "history must not print values");
    assert!(out.find("v2").unwrap() < out.find("v1").unwrap());
}

#[test]
fn test_audit_on_sql() {
    let t = Test::init_cli("sql");
    assert_success(&t.set("A", "1"));
    assert_failure(&t.get("MISSING"));

    let output = t.run(&["audit"]);
    assert_success(&output);
    assert_stdout_contains(&output, "alice");
    // Failed reads are audited too.
    assert_stderr_contains(&output, "MISSING");
}
