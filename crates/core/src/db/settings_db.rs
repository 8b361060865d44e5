use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::services::scheduler::{TaskRecord, TaskState};
use crate::settings::{ConfigStore, StoreError};

/// Minimum schema version we know how to handle.
///
/// `0` means "no schema yet" (fresh DB).
const MIN_SUPPORTED_SCHEMA_VERSION: i32 = 0;

/// Latest schema version this crate knows about.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Error type for settings database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying SQLite error.
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// The database was created with a newer schema version than we support.
    #[error(
        "Unsupported schema version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedSchemaVersion { found: i32, min_supported: i32, max_supported: i32 },
}

/// Convenience result type for DB operations.
pub type DbResult<T> = Result<T, DbError>;

/// One persisted `(transformer, param) -> value` row.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StoredSetting {
    pub transformer_id: String,
    pub param: String,
    pub value: String,
    pub updated_at: String,
}

/// SQLite-backed settings store and task log.
///
/// The connection sits behind a mutex so the store can be shared with worker
/// threads as a [`ConfigStore`].
#[derive(Debug)]
pub struct SettingsDb {
    conn: Mutex<Connection>,
}

impl SettingsDb {
    /// Open (or create) a settings database at the given path and ensure the schema exists.
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        apply_migrations(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        apply_migrations(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn schema_version(&self) -> DbResult<i32> {
        current_schema_version(&self.conn())
    }

    pub fn get_setting(&self, transformer_id: &str, param: &str) -> DbResult<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM settings WHERE transformer_id = ?1 AND param = ?2",
                params![transformer_id, param],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Insert or replace one setting value.
    pub fn put_setting(&self, transformer_id: &str, param: &str, value: &str) -> DbResult<()> {
        self.conn().execute(
            r#"
            INSERT INTO settings (transformer_id, param, value, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (transformer_id, param)
            DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![transformer_id, param, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// List stored settings, optionally for one transformer, ordered by transformer then param.
    pub fn list_settings(&self, transformer_id: Option<&str>) -> DbResult<Vec<StoredSetting>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT transformer_id, param, value, updated_at
            FROM settings
            WHERE ?1 IS NULL OR transformer_id = ?1
            ORDER BY transformer_id, param
            "#,
        )?;
        let rows = stmt.query_map(params![transformer_id], |row| {
            Ok(StoredSetting {
                transformer_id: row.get(0)?,
                param: row.get(1)?,
                value: row.get(2)?,
                updated_at: row.get(3)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Persist a finished task for later inspection.
    pub fn insert_task_run(&self, record: &TaskRecord) -> DbResult<i64> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO task_runs (label, visible, state, started_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                record.label,
                record.visible,
                state_to_str(record.state),
                record.started_at,
                record.finished_at
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent task runs first.
    pub fn list_task_runs(&self, limit: usize) -> DbResult<Vec<(String, String, String)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT label, state, finished_at
            FROM task_runs
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl ConfigStore for SettingsDb {
    fn get(&self, transformer_id: &str, param: &str) -> Result<Option<String>, StoreError> {
        self.get_setting(transformer_id, param).map_err(|e| StoreError(e.to_string()))
    }

    fn put(&self, transformer_id: &str, param: &str, value: &str) -> Result<(), StoreError> {
        self.put_setting(transformer_id, param, value).map_err(|e| StoreError(e.to_string()))
    }
}

fn state_to_str(state: TaskState) -> &'static str {
    match state {
        TaskState::Created => "created",
        TaskState::Submitted => "submitted",
        TaskState::Running => "running",
        TaskState::Completed => "completed",
        TaskState::Cancelled => "cancelled",
    }
}

/// Apply schema migrations up to `CURRENT_SCHEMA_VERSION`.
///
/// We use `PRAGMA user_version` as the schema version indicator.
fn apply_migrations(conn: &Connection) -> DbResult<()> {
    let mut current_version = current_schema_version(conn)?;

    // Reject DBs created with a newer schema than we support.
    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            found: current_version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current_version == 0 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS settings (
                transformer_id TEXT NOT NULL,
                param          TEXT NOT NULL,
                value          TEXT NOT NULL,
                updated_at     TEXT NOT NULL,
                PRIMARY KEY (transformer_id, param)
            );

            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
        current_version = 1;
    }

    if current_version < 2 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS task_runs (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                label       TEXT NOT NULL,
                visible     INTEGER NOT NULL,
                state       TEXT NOT NULL,
                started_at  TEXT NOT NULL,
                finished_at TEXT NOT NULL
            );

            PRAGMA user_version = 2;
            COMMIT;
            "#,
        )?;
    }

    Ok(())
}

/// Read the SQLite schema version from `PRAGMA user_version`.
fn current_schema_version(conn: &Connection) -> DbResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}
