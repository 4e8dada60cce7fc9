//! Domain types.

pub mod audit;
mod conflict;
mod history;

pub use audit::{AuditAction, AuditEntry};
pub use conflict::{Conflict, KeyOutcome, Outcome, Resolution, ResolutionSummary, Strategy};
pub use history::{ChangeType, HistoryEntry};
