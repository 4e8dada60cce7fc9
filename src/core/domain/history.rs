//! Variable history.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

use crate::core::types::{UserName, VariableKey};
use crate::error::{BackendError, Error};

/// Kind of change recorded in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Set,
    Delete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "SET",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "SET" => Ok(Self::Set),
            "DELETE" => Ok(Self::Delete),
            other => Err(BackendError::Corrupt {
                key: "history.change_type".to_string(),
                reason: format!("unknown change type '{}'", other),
            }
            .into()),
        }
    }
}

/// One append-only history row.
///
/// `value` is empty for deletions.
#[derive(Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub key: VariableKey,
    /// Per-key version, starting at 1 and never reused.
    pub version: u64,
    pub value: Zeroizing<Vec<u8>>,
    pub changed_at: DateTime<Utc>,
    pub changed_by: UserName,
    pub change_type: ChangeType,
}

impl fmt::Debug for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryEntry")
            .field("key", &self.key)
            .field("version", &self.version)
            .field("value", &format_args!("[{} bytes]", self.value.len()))
            .field("changed_at", &self.changed_at)
            .field("changed_by", &self.changed_by)
            .field("change_type", &self.change_type)
            .finish()
    }
}
