//! SQLite backend.
//!
//! All environments share one database at `<base>/lockbox.db`. Besides the
//! current value of each variable it keeps an append-only `history` table
//! and an `audit_log` with one row per operation, failed ones included.
//!
//! Every mutation runs in a transaction so a history row and the value it
//! describes are committed together or not at all. History values are
//! always stored sealed, even when the current value was written plain.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::{check_write, not_found, Backend, Capabilities, RekeyPlan, StoredValue};
use crate::core::cipher::MasterKey;
use crate::core::constants;
use crate::core::domain::{AuditAction, AuditEntry, ChangeType, HistoryEntry};
use crate::core::types::{UserName, VariableKey};
use crate::error::{BackendError, Error, Result};

/// Schema version stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Database file name under the data directory.
pub const DATABASE_FILE: &str = "lockbox.db";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS variables (
        environment TEXT NOT NULL,
        key         TEXT NOT NULL,
        value       TEXT NOT NULL,
        updated_at  INTEGER NOT NULL,
        updated_by  TEXT NOT NULL,
        PRIMARY KEY (environment, key)
    );

    CREATE TABLE IF NOT EXISTS history (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        environment TEXT NOT NULL,
        key         TEXT NOT NULL,
        version     INTEGER NOT NULL,
        value       TEXT,
        changed_at  INTEGER NOT NULL,
        changed_by  TEXT NOT NULL,
        change_type TEXT NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_history_version
        ON history(environment, key, version);

    CREATE TABLE IF NOT EXISTS audit_log (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        environment   TEXT NOT NULL,
        timestamp     INTEGER NOT NULL,
        action        TEXT NOT NULL,
        key           TEXT,
        user          TEXT NOT NULL,
        success       INTEGER NOT NULL,
        error_message TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_audit_environment
        ON audit_log(environment);
";

/// Relational backend with history and audit.
pub struct SqlBackend {
    conn: Option<Connection>,
    path: PathBuf,
    environment: String,
    user: UserName,
    key: MasterKey,
}

impl SqlBackend {
    /// Open (or create) `<base>/lockbox.db` and migrate the schema.
    pub fn open(base: &Path, environment: &str, key: MasterKey) -> Result<Self> {
        fs::create_dir_all(base).map_err(|e| BackendError::io(base, e))?;
        let path = base.join(DATABASE_FILE);
        debug!(path = %path.display(), "opening sql backend");

        let conn = Connection::open(&path)?;
        Self::with_connection(conn, path, environment, key)
    }

    #[cfg(test)]
    fn in_memory(environment: &str, key: MasterKey) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, PathBuf::from(":memory:"), environment, key)
    }

    fn with_connection(
        conn: Connection,
        path: PathBuf,
        environment: &str,
        key: MasterKey,
    ) -> Result<Self> {
        migrate_schema(&conn)?;
        Ok(Self {
            conn: Some(conn),
            path,
            environment: environment.to_string(),
            user: constants::current_user(),
            key,
        })
    }

    /// Record `user` as the actor in history and audit rows.
    pub fn with_user(mut self, user: &str) -> Self {
        self.user = user.to_string();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or_else(|| BackendError::Closed.into())
    }

    /// Append an audit row. Failing to audit never fails the operation.
    fn audit<T>(&self, action: AuditAction, key: Option<&str>, result: &Result<T>) {
        let Ok(conn) = self.conn() else {
            return;
        };
        let (success, message) = match result {
            Ok(_) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        };
        let written = conn.execute(
            "INSERT INTO audit_log (environment, timestamp, action, key, user, success, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                self.environment,
                Utc::now().timestamp_millis(),
                action.as_str(),
                key,
                self.user,
                success,
                message
            ],
        );
        if let Err(e) = written {
            warn!(error = %e, action = %action, "failed to write audit row");
        }
    }

    fn read(&self, key: &str) -> Result<Zeroizing<Vec<u8>>> {
        let json: Option<String> = self
            .conn()?
            .query_row(
                "SELECT value FROM variables WHERE environment = ?1 AND key = ?2",
                params![self.environment, key],
                |row| row.get(0),
            )
            .optional()?;
        let json = json.ok_or_else(|| not_found(&self.environment, key))?;
        decode(key, &json)?.open(&self.key)
    }

    fn write(&mut self, key: &str, value: &[u8], encrypt: bool) -> Result<()> {
        check_write(key, value)?;
        let current = encode(key, &StoredValue::new(&self.key, value, encrypt)?)?;
        let archived = encode(key, &StoredValue::new(&self.key, value, true)?)?;
        let now = Utc::now().timestamp_millis();

        let conn = self.conn.as_mut().ok_or(BackendError::Closed)?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO variables (environment, key, value, updated_at, updated_by)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(environment, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at,
                updated_by = excluded.updated_by",
            params![self.environment, key, current, now, self.user],
        )?;
        let version = next_version(&tx, &self.environment, key)?;
        tx.execute(
            "INSERT INTO history (environment, key, version, value, changed_at, changed_by, change_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                self.environment,
                key,
                version,
                archived,
                now,
                self.user,
                ChangeType::Set.as_str()
            ],
        )?;
        tx.commit()?;

        debug!(key = %key, version, bytes = value.len(), "sql backend set");
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let conn = self.conn.as_mut().ok_or(BackendError::Closed)?;
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM variables WHERE environment = ?1 AND key = ?2",
            params![self.environment, key],
        )?;
        if removed == 0 {
            return Err(not_found(&self.environment, key));
        }
        let version = next_version(&tx, &self.environment, key)?;
        tx.execute(
            "INSERT INTO history (environment, key, version, value, changed_at, changed_by, change_type)
             VALUES (?1, ?2, ?3, NULL, ?4, ?5, ?6)",
            params![
                self.environment,
                key,
                version,
                now,
                self.user,
                ChangeType::Delete.as_str()
            ],
        )?;
        tx.commit()?;

        debug!(key = %key, version, "sql backend delete");
        Ok(())
    }

    fn keys(&self) -> Result<Vec<VariableKey>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT key FROM variables WHERE environment = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![self.environment], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn sealed(&self, key: &str) -> Result<bool> {
        let json: Option<String> = self
            .conn()?
            .query_row(
                "SELECT value FROM variables WHERE environment = ?1 AND key = ?2",
                params![self.environment, key],
                |row| row.get(0),
            )
            .optional()?;
        let json = json.ok_or_else(|| not_found(&self.environment, key))?;
        Ok(decode(key, &json)?.is_sealed())
    }

    fn lookup(&self, key: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT 1 FROM variables WHERE environment = ?1 AND key = ?2",
                params![self.environment, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn history(&self, key: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT version, value, changed_at, changed_by, change_type FROM history
             WHERE environment = ?1 AND key = ?2
             ORDER BY version DESC
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![self.environment, key, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(version, value, changed_at, changed_by, change_type)| {
                let value = match value {
                    Some(json) => decode(key, &json)?.open(&self.key)?,
                    None => Zeroizing::new(Vec::new()),
                };
                Ok(HistoryEntry {
                    key: key.to_string(),
                    version: version as u64,
                    value,
                    changed_at: timestamp(key, changed_at)?,
                    changed_by,
                    change_type: change_type.parse()?,
                })
            })
            .collect()
    }

    fn audit_rows(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, action, key, user, success, error_message FROM audit_log
             WHERE environment = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![self.environment, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(ts, action, key, user, success, error_message)| {
                Ok(AuditEntry {
                    timestamp: timestamp("audit_log", ts)?,
                    action,
                    key,
                    user,
                    success,
                    error_message,
                })
            })
            .collect()
    }

    fn stage(&self, next: &MasterKey) -> Result<RekeyPlan> {
        let mut plan = RekeyPlan::new(next);
        let rows = {
            let conn = self.conn()?;
            let mut stmt =
                conn.prepare("SELECT key, value FROM variables WHERE environment = ?1")?;
            let rows = stmt
                .query_map(params![self.environment], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        for (key, json) in rows {
            let value = decode(&key, &json)?;
            if value.is_sealed() {
                plan.count += 1;
            }
            let resealed = value.rekey(&self.key, next)?;
            plan.values.insert(key, resealed);
        }

        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT id, key, value FROM history WHERE environment = ?1 AND value IS NOT NULL",
            )?;
            let rows = stmt
                .query_map(params![self.environment], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        for (id, key, json) in rows {
            let resealed = decode(&key, &json)?.rekey(&self.key, next)?;
            plan.archived.push((id, key, resealed));
        }
        Ok(plan)
    }

    fn commit(&mut self, plan: &RekeyPlan) -> Result<()> {
        let conn = self.conn.as_mut().ok_or(BackendError::Closed)?;
        let tx = conn.transaction()?;
        for (key, value) in &plan.values {
            tx.execute(
                "UPDATE variables SET value = ?3 WHERE environment = ?1 AND key = ?2",
                params![self.environment, key, encode(key, value)?],
            )?;
        }
        for (id, key, value) in &plan.archived {
            tx.execute(
                "UPDATE history SET value = ?2 WHERE id = ?1",
                params![id, encode(key, value)?],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

impl Backend for SqlBackend {
    fn name(&self) -> &'static str {
        "sql"
    }

    fn environment(&self) -> &str {
        &self.environment
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            history: true,
            audit: true,
        }
    }

    fn get(&self, key: &str) -> Result<Zeroizing<Vec<u8>>> {
        let result = self.read(key);
        self.audit(AuditAction::Get, Some(key), &result);
        result
    }

    fn is_sealed(&self, key: &str) -> Result<bool> {
        let result = self.sealed(key);
        self.audit(AuditAction::Inspect, Some(key), &result);
        result
    }

    fn set(&mut self, key: &str, value: &[u8], encrypt: bool) -> Result<()> {
        let result = self.write(key, value, encrypt);
        self.audit(AuditAction::Set, Some(key), &result);
        result
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        let result = self.remove(key);
        self.audit(AuditAction::Delete, Some(key), &result);
        result
    }

    fn list(&self) -> Result<Vec<VariableKey>> {
        let result = self.keys();
        self.audit(AuditAction::List, None, &result);
        result
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let result = self.lookup(key);
        self.audit(AuditAction::Exists, Some(key), &result);
        result
    }

    fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| Error::from(e))?;
            debug!(path = %self.path.display(), "sql backend closed");
        }
        Ok(())
    }

    fn get_history(&self, key: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let result = self.history(key, limit);
        self.audit(AuditAction::History, Some(key), &result);
        result
    }

    fn get_audit_log(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let result = self.audit_rows(limit);
        self.audit(AuditAction::Audit, None, &result);
        result
    }

    fn stage_rekey(&self, next: &MasterKey) -> Result<RekeyPlan> {
        let result = self.stage(next);
        if result.is_err() {
            self.audit(AuditAction::Rekey, None, &result);
        }
        result
    }

    fn commit_rekey(&mut self, plan: RekeyPlan) -> Result<usize> {
        let result = self.commit(&plan).map(|()| plan.count);
        self.audit(AuditAction::Rekey, None, &result);
        if let Ok(count) = result {
            self.key = plan.next;
            info!(environment = %self.environment, count, "sql backend rekeyed");
        }
        result
    }
}

impl Drop for SqlBackend {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn migrate_schema(conn: &Connection) -> Result<()> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(BackendError::Corrupt {
            key: DATABASE_FILE.to_string(),
            reason: format!(
                "schema version {} is newer than supported {}",
                version, SCHEMA_VERSION
            ),
        }
        .into());
    }
    conn.execute_batch(SCHEMA)?;
    if version < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        debug!(from = version, to = SCHEMA_VERSION, "schema migrated");
    }
    Ok(())
}

/// Versions continue across deletes: `max(version) + 1`, starting at 1.
fn next_version(conn: &Connection, environment: &str, key: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) + 1 FROM history WHERE environment = ?1 AND key = ?2",
        params![environment, key],
        |row| row.get(0),
    )?)
}

fn encode(key: &str, value: &StoredValue) -> Result<String> {
    serde_json::to_string(value).map_err(|e| {
        BackendError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn decode(key: &str, json: &str) -> Result<StoredValue> {
    serde_json::from_str(json).map_err(|e| {
        BackendError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn timestamp(key: &str, millis: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
        BackendError::Corrupt {
            key: key.to_string(),
            reason: format!("timestamp {} out of range", millis),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::contract;
    use crate::core::cipher::generate_key;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn backend() -> SqlBackend {
        SqlBackend::in_memory("development", generate_key())
            .unwrap()
            .with_user("alice")
    }

    #[test]
    fn test_contract() {
        let mut b = backend();
        contract::run(&mut b);
    }

    #[test]
    fn test_history_newest_first() {
        let mut b = backend();
        b.set("DATABASE_URL", b"postgres://a", true).unwrap();
        b.set("DATABASE_URL", b"postgres://b", true).unwrap();

        let history = b.get_history("DATABASE_URL", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version, 2);
        assert_eq!(&*history[0].value, b"postgres://b");
        assert_eq!(history[1].version, 1);
        assert_eq!(history[0].changed_by, "alice");
        assert_eq!(history[0].change_type, ChangeType::Set);
    }

    #[test]
    fn test_identical_sets_append_twice() {
        let mut b = backend();
        b.set("K", b"v", true).unwrap();
        b.set("K", b"v", true).unwrap();
        assert_eq!(&*b.get("K").unwrap(), b"v");
        assert_eq!(b.get_history("K", 10).unwrap().len(), 2);
    }

    #[test]
    fn test_history_limit_and_versions_survive_delete() {
        let mut b = backend();
        b.set("K", b"1", true).unwrap();
        b.delete("K").unwrap();
        b.set("K", b"3", true).unwrap();

        let history = b.get_history("K", 2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version, 3);
        assert_eq!(history[1].change_type, ChangeType::Delete);
        assert!(history[1].value.is_empty());
    }

    #[test]
    fn test_plain_value_history_is_sealed() {
        let mut b = backend();
        b.set("PUBLIC", b"visible-value", false).unwrap();
        let conn = b.conn().unwrap();
        let raw: String = conn
            .query_row("SELECT value FROM history", [], |row| row.get(0))
            .unwrap();
        assert!(raw.contains("\"kind\":\"sealed\""));
        assert_eq!(&*b.get_history("PUBLIC", 1).unwrap()[0].value, b"visible-value");
    }

    #[test]
    fn test_audit_records_failures() {
        let mut b = backend();
        b.set("A", b"1", true).unwrap();
        assert!(b.get("MISSING").is_err());
        assert!(b.set("bad-key", b"1", true).is_err());

        let log = b.get_audit_log(10).unwrap();
        assert_eq!(log.len(), 3);

        assert_eq!(log[0].action, "SET");
        assert!(!log[0].success);
        assert!(log[0].error_message.is_some());

        assert_eq!(log[1].action, "GET");
        assert_eq!(log[1].key.as_deref(), Some("MISSING"));
        assert!(!log[1].success);

        assert_eq!(log[2].action, "SET");
        assert!(log[2].success);
        assert_eq!(log[2].user, "alice");

        // Reads without a value are audited as well.
        assert!(!b.exists("NOPE").unwrap());
        assert!(b.is_sealed("MISSING").is_err());
        b.get_history("A", 5).unwrap();

        let log = b.get_audit_log(10).unwrap();
        let actions: Vec<&str> = log.iter().take(4).map(|e| e.action.as_str()).collect();
        assert_eq!(actions, ["HISTORY", "INSPECT", "EXISTS", "AUDIT"]);
        assert!(!log[1].success);
        assert_eq!(log[1].key.as_deref(), Some("MISSING"));
        assert!(log[2].success);
        assert_eq!(log[2].key.as_deref(), Some("NOPE"));
    }

    #[test]
    fn test_environments_are_isolated() {
        let tmp = TempDir::new().unwrap();
        let key = generate_key();
        let mut dev = SqlBackend::open(tmp.path(), "development", key.clone()).unwrap();
        let mut prod = SqlBackend::open(tmp.path(), "production", key).unwrap();

        dev.set("A", b"dev", true).unwrap();
        prod.set("A", b"prod", true).unwrap();

        assert_eq!(&*dev.get("A").unwrap(), b"dev");
        assert_eq!(&*prod.get("A").unwrap(), b"prod");
        assert_eq!(dev.get_history("A", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let key = generate_key();
        {
            let mut b = SqlBackend::open(tmp.path(), "dev", key.clone()).unwrap();
            b.set("A", b"1", true).unwrap();
            b.close().unwrap();
            b.close().unwrap();
        }
        let b = SqlBackend::open(tmp.path(), "dev", key).unwrap();
        assert_eq!(&*b.get("A").unwrap(), b"1");
    }

    #[test]
    fn test_closed_backend_errors() {
        let mut b = backend();
        b.close().unwrap();
        assert_eq!(b.get("A").unwrap_err().kind(), ErrorKind::BackendIo);
    }

    #[test]
    fn test_rekey_includes_history() {
        let tmp = TempDir::new().unwrap();
        let mut b = SqlBackend::open(tmp.path(), "dev", generate_key()).unwrap();
        b.set("A", b"1", true).unwrap();
        b.set("A", b"2", true).unwrap();

        let next = generate_key();
        assert_eq!(b.rekey(&next).unwrap(), 1);
        b.close().unwrap();

        let reopened = SqlBackend::open(tmp.path(), "dev", next).unwrap();
        assert_eq!(&*reopened.get("A").unwrap(), b"2");
        let history = reopened.get_history("A", 10).unwrap();
        assert_eq!(&*history[1].value, b"1");
    }

    #[test]
    fn test_newer_schema_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();
        assert!(migrate_schema(&conn).is_err());
    }
}
