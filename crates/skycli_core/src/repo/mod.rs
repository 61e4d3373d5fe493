//! Repository layer: lifecycle contract, shared SQLite handle and errors.
//!
//! # Responsibility
//! - Define the `Repository` lifecycle consumed by the registry.
//! - Own one long-lived connection per SQLite-backed repository.
//! - Return semantic errors (`NotFound`, `MissingRequiredTable`) in addition
//!   to DB transport errors.
//!
//! # Invariants
//! - A repository only touches its own tables; cross-entity links are
//!   enforced by foreign keys in the schema.
//! - `init` verifies schema objects and never migrates.
//! - After `close`, every data call fails with `RepoError::Closed`.

use crate::config::ConfigError;
use crate::db::DbError;
use crate::model::ValidationError;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard};

pub mod feed_repo;
pub mod post_repo;
pub mod profile_repo;
pub mod session_repo;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    Validation(ValidationError),
    Db(DbError),
    Config(ConfigError),
    NotFound { entity: &'static str, key: String },
    NoSession,
    InvalidData(String),
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    Closed(&'static str),
    Poisoned(&'static str),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::NotFound { entity, key } => write!(f, "{entity} not found: {key}"),
            Self::NoSession => write!(f, "no active session"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::MissingRequiredTable(table) => write!(
                f,
                "required table `{table}` is missing; run `skycli setup`"
            ),
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "required column `{table}.{column}` is missing; run `skycli setup`"
            ),
            Self::Closed(name) => write!(f, "{name} repository is closed"),
            Self::Poisoned(name) => write!(f, "{name} repository lock is poisoned"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<ConfigError> for RepoError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

/// Lifecycle shared by every repository owned by the registry.
pub trait Repository: Send + Sync {
    /// Stable short name used in logs and registry errors.
    fn name(&self) -> &'static str;

    /// Verifies the schema objects this repository needs. Idempotent.
    fn init(&self) -> RepoResult<()>;

    /// Releases the underlying handle. Idempotent.
    fn close(&self) -> RepoResult<()>;
}

/// Table name plus the columns a repository reads and writes.
pub(crate) type TableSpec = (&'static str, &'static [&'static str]);

/// One owned SQLite connection, shareable across threads.
pub struct SqliteHandle {
    name: &'static str,
    conn: Mutex<Option<Connection>>,
}

impl SqliteHandle {
    pub fn new(name: &'static str, conn: Connection) -> Self {
        Self {
            name,
            conn: Mutex::new(Some(conn)),
        }
    }

    /// Runs `f` with the open connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> RepoResult<T>) -> RepoResult<T> {
        let guard = self.lock()?;
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(RepoError::Closed(self.name)),
        }
    }

    /// Runs `f` with mutable access, needed for transactions.
    pub fn with_conn_mut<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> RepoResult<T>,
    ) -> RepoResult<T> {
        let mut guard = self.lock()?;
        match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(RepoError::Closed(self.name)),
        }
    }

    pub(crate) fn require_schema(&self, tables: &[TableSpec]) -> RepoResult<()> {
        self.with_conn(|conn| {
            for &(table, columns) in tables {
                if !table_exists(conn, table)? {
                    return Err(RepoError::MissingRequiredTable(table));
                }
                for &column in columns {
                    if !table_has_column(conn, table, column)? {
                        return Err(RepoError::MissingRequiredColumn { table, column });
                    }
                }
            }
            Ok(())
        })
    }

    pub fn is_closed(&self) -> bool {
        self.conn.lock().map(|guard| guard.is_none()).unwrap_or(true)
    }

    /// Closes the connection, surfacing SQLite's close error if any.
    pub fn close(&self) -> RepoResult<()> {
        let taken = self.lock()?.take();
        match taken {
            Some(conn) => conn.close().map_err(|(_, err)| RepoError::from(err)),
            None => Ok(()),
        }
    }

    fn lock(&self) -> RepoResult<MutexGuard<'_, Option<Connection>>> {
        self.conn.lock().map_err(|_| RepoError::Poisoned(self.name))
    }
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> RepoResult<uuid::Uuid> {
    uuid::Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

/// Converts a pagination value to SQLite's signed integer.
pub(crate) fn to_sql_count(value: u32) -> i64 {
    i64::from(value)
}
