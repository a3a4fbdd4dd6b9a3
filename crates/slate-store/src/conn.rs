use std::path::Path;

use rusqlite::types::Value;
use rusqlite::Connection;
use tracing::info;

use crate::error::StoreError;

/// Pragmas and tuning applied to every physical connection.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Busy timeout in milliseconds (default: 5000).
    pub busy_timeout_ms: u32,
    /// Cache size in KiB (default: 8192 = 8 MB).
    pub cache_size_kib: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            cache_size_kib: 8192,
        }
    }
}

impl StoreConfig {
    fn pragmas(&self) -> String {
        format!(
            "PRAGMA journal_mode = WAL;\
             PRAGMA foreign_keys = ON;\
             PRAGMA busy_timeout = {};\
             PRAGMA cache_size = -{};\
             PRAGMA synchronous = NORMAL;",
            self.busy_timeout_ms, self.cache_size_kib
        )
    }
}

/// Statement failure kinds the executor treats differently: uniqueness
/// violations become an absence signal, closed handles trigger one
/// reconnect-and-retry, everything else rolls back and surfaces.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    #[error("UNIQUE constraint failed: {0}")]
    UniqueViolation(String),

    #[error("cannot operate on a closed connection: {0}")]
    ClosedHandle(String),

    #[error("{0}")]
    Other(String),
}

/// Result of one executed statement.
#[derive(Clone, Debug, Default)]
pub struct ExecResult {
    /// Fetched rows (positional), empty for non-SELECT statements.
    pub rows: Vec<Vec<Value>>,
    pub last_insert_rowid: i64,
    pub changes: usize,
}

/// The physical-connection seam. Exactly one implementation talks to
/// SQLite; tests substitute handles that inject failures.
pub trait ConnectionHandle: Send {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ExecResult, ExecError>;
    fn commit(&mut self) -> Result<(), ExecError>;
    fn rollback(&mut self) -> Result<(), ExecError>;
    /// Total rows changed over the lifetime of this handle.
    fn total_changes(&self) -> u64;
}

/// Factory for fresh physical connections, used on open and on
/// closed-handle recovery.
pub type Opener = Box<dyn Fn() -> Result<Box<dyn ConnectionHandle>, StoreError> + Send + Sync>;

/// `rusqlite`-backed handle.
pub struct SqliteHandle {
    conn: Connection,
    changes: u64,
}

impl SqliteHandle {
    /// Open or create a database file, ensuring the containing directory
    /// exists first.
    pub fn open(path: &Path, config: &StoreConfig) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("create dir: {e}")))?;
        }
        let conn = Connection::open(path).map_err(|e| StoreError::Open(e.to_string()))?;
        conn.execute_batch(&config.pragmas())
            .map_err(|e| StoreError::Open(format!("pragmas: {e}")))?;
        info!(path = %path.display(), "connection opened");
        Ok(Self { conn, changes: 0 })
    }

    /// In-memory database (for testing). Reconnecting to one starts
    /// empty, so recovery paths are exercised with mock handles instead.
    pub fn in_memory(config: &StoreConfig) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open(e.to_string()))?;
        conn.execute_batch(&config.pragmas())
            .map_err(|e| StoreError::Open(format!("pragmas: {e}")))?;
        Ok(Self { conn, changes: 0 })
    }

    fn classify(e: &rusqlite::Error) -> ExecError {
        match e {
            rusqlite::Error::SqliteFailure(err, message) => {
                let detail = message.clone().unwrap_or_else(|| err.to_string());
                if err.code == rusqlite::ErrorCode::ConstraintViolation
                    && detail.contains("UNIQUE constraint failed")
                {
                    ExecError::UniqueViolation(detail)
                } else if err.code == rusqlite::ErrorCode::ApiMisuse {
                    ExecError::ClosedHandle(detail)
                } else {
                    ExecError::Other(detail)
                }
            }
            other => ExecError::Other(other.to_string()),
        }
    }
}

impl ConnectionHandle for SqliteHandle {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ExecResult, ExecError> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| SqliteHandle::classify(&e))?;
        let columns = stmt.column_count();

        if columns == 0 {
            let changes = stmt
                .execute(rusqlite::params_from_iter(params.iter()))
                .map_err(|e| SqliteHandle::classify(&e))?;
            self.changes += changes as u64;
            return Ok(ExecResult {
                rows: Vec::new(),
                last_insert_rowid: self.conn.last_insert_rowid(),
                changes,
            });
        }

        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter()))
            .map_err(|e| SqliteHandle::classify(&e))?;
        let mut fetched = Vec::new();
        while let Some(row) = rows.next().map_err(|e| SqliteHandle::classify(&e))? {
            let mut values = Vec::with_capacity(columns);
            for i in 0..columns {
                values.push(
                    row.get::<_, Value>(i)
                        .map_err(|e| SqliteHandle::classify(&e))?,
                );
            }
            fetched.push(values);
        }
        Ok(ExecResult {
            rows: fetched,
            last_insert_rowid: self.conn.last_insert_rowid(),
            changes: 0,
        })
    }

    fn commit(&mut self) -> Result<(), ExecError> {
        if !self.conn.is_autocommit() {
            self.conn
                .execute_batch("COMMIT")
                .map_err(|e| SqliteHandle::classify(&e))?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), ExecError> {
        if !self.conn.is_autocommit() {
            self.conn
                .execute_batch("ROLLBACK")
                .map_err(|e| SqliteHandle::classify(&e))?;
        }
        Ok(())
    }

    fn total_changes(&self) -> u64 {
        self.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> SqliteHandle {
        SqliteHandle::in_memory(&StoreConfig::default()).unwrap()
    }

    #[test]
    fn pragmas_applied() {
        let h = handle();
        let fk: i32 = h
            .conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn execute_ddl_then_insert_reports_rowid_and_changes() {
        let mut h = handle();
        h.execute("CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT)", &[])
            .unwrap();
        let r = h
            .execute("INSERT INTO t (name) VALUES (?1)", &[Value::Text("a".into())])
            .unwrap();
        assert_eq!(r.changes, 1);
        assert_eq!(r.last_insert_rowid, 1);
        assert_eq!(h.total_changes(), 1);
    }

    #[test]
    fn select_returns_positional_rows() {
        let mut h = handle();
        h.execute("CREATE TABLE t (id INTEGER, name TEXT)", &[]).unwrap();
        h.execute(
            "INSERT INTO t (id, name) VALUES (?1, ?2)",
            &[Value::Integer(7), Value::Text("seven".into())],
        )
        .unwrap();
        let r = h.execute("SELECT * FROM t", &[]).unwrap();
        assert_eq!(r.rows.len(), 1);
        assert_eq!(r.rows[0][0], Value::Integer(7));
        assert_eq!(r.rows[0][1], Value::Text("seven".into()));
    }

    #[test]
    fn unique_violation_classified() {
        let mut h = handle();
        h.execute("CREATE TABLE t (name TEXT UNIQUE)", &[]).unwrap();
        h.execute("INSERT INTO t (name) VALUES (?1)", &[Value::Text("a".into())])
            .unwrap();
        let err = h
            .execute("INSERT INTO t (name) VALUES (?1)", &[Value::Text("a".into())])
            .unwrap_err();
        assert!(matches!(err, ExecError::UniqueViolation(_)), "got: {err}");
    }

    #[test]
    fn syntax_error_is_other() {
        let mut h = handle();
        let err = h.execute("NOT REAL SQL", &[]).unwrap_err();
        assert!(matches!(err, ExecError::Other(_)));
    }

    #[test]
    fn open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("db.sqlite");
        let _ = SqliteHandle::open(&path, &StoreConfig::default()).unwrap();
        assert!(path.exists());
    }
}
