//! Audit types.
//!
//! One row per store operation, successful or not.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::core::types::{UserName, VariableKey};

/// Store operation recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Get,
    Set,
    Delete,
    List,
    Exists,
    Inspect,
    History,
    Audit,
    Rekey,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Set => "SET",
            Self::Delete => "DELETE",
            Self::List => "LIST",
            Self::Exists => "EXISTS",
            Self::Inspect => "INSPECT",
            Self::History => "HISTORY",
            Self::Audit => "AUDIT",
            Self::Rekey => "REKEY",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single audit log row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    /// Action name as stored (see [`AuditAction::as_str`]).
    pub action: String,
    pub key: Option<VariableKey>,
    pub user: UserName,
    pub success: bool,
    pub error_message: Option<String>,
}

impl fmt::Display for AuditEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.user,
            self.action
        )?;
        if let Some(key) = &self.key {
            write!(f, " {}", key)?;
        }
        match &self.error_message {
            Some(msg) if !self.success => write!(f, " (failed: {})", msg),
            _ if !self.success => write!(f, " (failed)"),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(success: bool, error_message: Option<&str>) -> AuditEntry {
        AuditEntry {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            action: AuditAction::Get.to_string(),
            key: Some("API_KEY".into()),
            user: "alice".into(),
            success,
            error_message: error_message.map(str::to_string),
        }
    }

    #[test]
    fn test_display_success() {
        assert_eq!(
            entry(true, None).to_string(),
            "2024-03-01 12:00:00 alice GET API_KEY"
        );
    }

    #[test]
    fn test_display_failure() {
        assert_eq!(
            entry(false, Some("not found")).to_string(),
            "2024-03-01 12:00:00 alice GET API_KEY (failed: not found)"
        );
    }
}
