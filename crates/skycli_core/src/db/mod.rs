//! SQLite connection setup and schema migration entry points.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the cache database.
//! - Apply, inspect and revert schema migrations in deterministic order.
//!
//! # Invariants
//! - Migration progress is tracked in the `schema_migrations` table.
//! - Opening a connection never changes schema; migrations are explicit.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use migrations::{
    applied_migrations, latest_version, migrate_to, migration_status, rollback, run_migrations,
    AppliedMigration, MigrationStatus,
};
pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    MigrationFailed {
        version: u32,
        name: &'static str,
        source: rusqlite::Error,
    },
    InconsistentHistory {
        highest_version: u32,
        recorded_count: u32,
    },
    InvalidScript(&'static str),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "db: {err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "db.migration_status: database schema version {db_version} is not recognized (latest supported {latest_supported})"
            ),
            Self::MigrationFailed {
                version,
                name,
                source,
            } => write!(f, "db.migrate: migration {version} ({name}) failed: {source}"),
            Self::InconsistentHistory {
                highest_version,
                recorded_count,
            } => write!(
                f,
                "db.migration_status: migration history has gaps: highest version {highest_version} but {recorded_count} recorded"
            ),
            Self::InvalidScript(name) => write!(f, "db.migrations: invalid script name `{name}`"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::MigrationFailed { source, .. } => Some(source),
            Self::UnsupportedSchemaVersion { .. }
            | Self::InconsistentHistory { .. }
            | Self::InvalidScript(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
