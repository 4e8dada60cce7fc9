//! Error reporting and hints.

use crate::support::*;

#[test]
fn test_not_initialized_hint() {
    let t = Test::new();
    let output = t.run(&["list"]);
    assert_failure(&output);
    assert_stderr_contains(&output, "not initialized");
    assert_stderr_contains(&output, "run: lockbox init");
}

#[test]
fn test_missing_key() {
    let t = Test::init_cli("file");
    let output = t.get("NOPE");
    assert_failure(&output);
    assert_stderr_contains(&output, "NOPE");
}

#[test]
fn test_invalid_key_name() {
    let t = Test::init_cli("file");
    let output = t.set("1BAD", "x");
    assert_failure(&output);
    assert_stderr_contains(&output, "invalid variable name");
}

#[test]
fn test_unknown_environment() {
    let t = Test::init_cli("file");
    let output = t.run(&["-e", "qa", "get", "A"]);
    assert_failure(&output);
    assert_stderr_contains(&output, "unknown environment: qa");
}

#[test]
fn test_history_unsupported_on_file() {
    let t = Test::init_cli("file");
    assert_success(&t.set("A", "1"));
    let output = t.run(&["history", "A"]);
    assert_failure(&output);
    assert_stderr_contains(&output, "does not support history");
}

#[test]
fn test_missing_password_without_terminal() {
    let t = Test::init_cli("file");
    let output = t
        .cmd()
        .env_remove("LOCKBOX_PASSWORD")
        .args(["set", "A", "1"])
        .output()
        .unwrap();
    assert_failure(&output);
    assert_stderr_contains(&output, "LOCKBOX_PASSWORD");
}
