//! Conflict types.
//!
//! A conflict is one `(environment, key)` whose git-tracked blob diverged on
//! both sides of a merge.

use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

use crate::core::types::{EnvironmentName, VariableKey};
use crate::error::{ConfigError, Error};

/// A detected divergence, decrypted.
///
/// `None` on a side means the variable was deleted there.
#[derive(Clone)]
pub struct Conflict {
    pub environment: EnvironmentName,
    pub key: VariableKey,
    pub base: Option<Zeroizing<Vec<u8>>>,
    pub local: Option<Zeroizing<Vec<u8>>>,
    pub remote: Option<Zeroizing<Vec<u8>>>,
    /// Unix time of the last local commit touching the blob.
    pub local_time: Option<i64>,
    /// Unix time of the last remote commit touching the blob.
    pub remote_time: Option<i64>,
    /// Whether either side stored the value sealed. The resolved value is
    /// written sealed unless both sides were plaintext.
    pub sealed: bool,
}

impl Conflict {
    /// Both sides deleted the variable.
    pub fn both_deleted(&self) -> bool {
        self.local.is_none() && self.remote.is_none()
    }
}

impl fmt::Debug for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = |v: &Option<Zeroizing<Vec<u8>>>| match v {
            Some(v) => format!("[{} bytes]", v.len()),
            None => "deleted".to_string(),
        };
        f.debug_struct("Conflict")
            .field("environment", &self.environment)
            .field("key", &self.key)
            .field("base", &self.base.as_ref().map(|v| v.len()))
            .field("local", &side(&self.local))
            .field("remote", &side(&self.remote))
            .field("local_time", &self.local_time)
            .field("remote_time", &self.remote_time)
            .field("sealed", &self.sealed)
            .finish()
    }
}

/// How to settle conflicts, chosen once per sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Keep the local value.
    Ours,
    /// Keep the remote value.
    Theirs,
    /// Keep whichever side was committed last; ties keep local.
    Newest,
    /// Ask a [`ConflictPrompt`](crate::core::conflict::ConflictPrompt).
    Prompt,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ours => "ours",
            Self::Theirs => "theirs",
            Self::Newest => "newest",
            Self::Prompt => "prompt",
        }
    }

    /// Whether this strategy always produces an answer.
    pub fn is_total(&self) -> bool {
        !matches!(self, Self::Prompt)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "ours" | "local" => Ok(Self::Ours),
            "theirs" | "remote" => Ok(Self::Theirs),
            "newest" => Ok(Self::Newest),
            "prompt" => Ok(Self::Prompt),
            other => Err(ConfigError::InvalidValue {
                field: "strategy",
                reason: format!(
                    "unknown strategy '{}' (expected ours, theirs, newest or prompt)",
                    other
                ),
            }
            .into()),
        }
    }
}

/// The value a conflict settles on.
#[derive(Clone, PartialEq, Eq)]
pub enum Resolution {
    Value(Zeroizing<Vec<u8>>),
    Deleted,
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "Value([{} bytes])", v.len()),
            Self::Deleted => f.write_str("Deleted"),
        }
    }
}

/// What happened to one conflicting key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    KeptLocal,
    KeptRemote,
    /// The prompt supplied a value matching neither side.
    Custom,
    Deleted,
    Unresolved,
    Failed(String),
}

impl Outcome {
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            Self::KeptLocal | Self::KeptRemote | Self::Custom | Self::Deleted
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeptLocal => f.write_str("kept local"),
            Self::KeptRemote => f.write_str("kept remote"),
            Self::Custom => f.write_str("custom value"),
            Self::Deleted => f.write_str("deleted"),
            Self::Unresolved => f.write_str("unresolved"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Per-key line of a [`ResolutionSummary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOutcome {
    pub environment: EnvironmentName,
    pub key: VariableKey,
    pub outcome: Outcome,
}

/// Report of one resolution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionSummary {
    pub resolved_count: usize,
    pub unresolved_count: usize,
    pub outcomes: Vec<KeyOutcome>,
}

impl ResolutionSummary {
    pub fn record(&mut self, environment: &str, key: &str, outcome: Outcome) {
        if outcome.is_resolved() {
            self.resolved_count += 1;
        } else {
            self.unresolved_count += 1;
        }
        self.outcomes.push(KeyOutcome {
            environment: environment.to_string(),
            key: key.to_string(),
            outcome,
        });
    }

    pub fn total(&self) -> usize {
        self.resolved_count + self.unresolved_count
    }

    /// A sync is complete only when every conflict was resolved.
    pub fn is_complete(&self) -> bool {
        self.unresolved_count == 0
    }
}
