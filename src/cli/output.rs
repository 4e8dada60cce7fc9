//! Shared CLI output helpers.
//!
//! Color scheme (`console` disables styling when NO_COLOR is set or the
//! stream isn't a terminal):
//! - Green: success
//! - Red: errors
//! - Yellow: warnings
//! - Cyan: keys, environments, hints
//! - Dimmed: secondary info

use console::style;
use std::fmt::Display;

/// Print a success message with checkmark.
///
/// Example: `✓ set DATABASE_URL`
pub fn success(msg: &str) {
    println!("{} {}", style("✓").green(), msg);
}

/// Print an error message to stderr.
pub fn error(msg: &str) {
    eprintln!("{} {}", style("✗").red().for_stderr(), msg);
}

/// Print a warning message to stderr.
pub fn warn(msg: &str) {
    eprintln!("{} {}", style("⚠").yellow().for_stderr(), msg);
}

/// Print a hint to stderr.
///
/// Example: `→ run: lockbox init`
pub fn hint(msg: &str) {
    eprintln!("{} {}", style("→").cyan().for_stderr(), style(msg).cyan().for_stderr());
}

pub fn header(title: &str) {
    println!("{}", style(title).bold());
}

/// Print a key-value pair (label dimmed, value bold).
pub fn kv(label: &str, value: impl Display) {
    println!("  {}  {}", style(label).dim(), style(value).bold());
}

pub fn list_item(item: &str) {
    println!("  • {}", item);
}

pub fn dimmed(msg: &str) {
    println!("{}", style(msg).dim());
}

/// Format a variable name.
pub fn key(k: &str) -> String {
    style(k).cyan().to_string()
}

/// Format an environment name.
pub fn env(e: &str) -> String {
    style(e).magenta().to_string()
}
