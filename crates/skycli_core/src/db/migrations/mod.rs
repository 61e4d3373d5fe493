//! Embedded schema migrations and their executor.
//!
//! # Responsibility
//! - Register `NNN_description` scripts in strictly increasing order.
//! - Apply pending scripts, report status, and roll back on request.
//!
//! # Invariants
//! - Recorded versions always form the contiguous prefix `1..=current`.
//! - Each script and its `schema_migrations` record commit in one
//!   transaction, so a failed script leaves the previous version recorded.
//! - Status queries never create or alter schema objects.

use crate::db::{DbError, DbResult};
use log::{error, info};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use std::time::Instant;

const TRACKING_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    applied_at INTEGER NOT NULL
);";

static SCRIPT_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{3})_[a-z0-9_]+$").expect("valid script name regex"));

#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    up: &'static str,
    down: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "001_create_feeds",
        up: include_str!("001_create_feeds.up.sql"),
        down: include_str!("001_create_feeds.down.sql"),
    },
    Migration {
        version: 2,
        name: "002_create_posts",
        up: include_str!("002_create_posts.up.sql"),
        down: include_str!("002_create_posts.down.sql"),
    },
    Migration {
        version: 3,
        name: "003_create_profiles",
        up: include_str!("003_create_profiles.up.sql"),
        down: include_str!("003_create_profiles.down.sql"),
    },
];

/// Read-only snapshot of schema progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStatus {
    pub current_version: u32,
    pub latest_version: u32,
    pub pending_count: u32,
    pub is_up_to_date: bool,
}

impl MigrationStatus {
    fn new(current_version: u32, latest_version: u32) -> Self {
        let pending_count = latest_version.saturating_sub(current_version);
        Self {
            current_version,
            latest_version,
            pending_count,
            is_up_to_date: pending_count == 0,
        }
    }
}

/// One row of the tracking table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: u32,
    pub name: String,
    /// Unix epoch milliseconds.
    pub applied_at: i64,
}

/// Returns every migration known by this binary, ascending.
pub fn migrations() -> &'static [Migration] {
    MIGRATIONS
}

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Applies every pending migration. Returns the number applied.
pub fn run_migrations(conn: &mut Connection) -> DbResult<usize> {
    migrate_to(conn, latest_version())
}

/// Applies pending migrations up to and including `target_version`.
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the database is ahead of this binary or
///   `target_version` is unknown.
/// - `MigrationFailed` when a script fails; earlier scripts stay applied.
pub fn migrate_to(conn: &mut Connection, target_version: u32) -> DbResult<usize> {
    validate_registry(MIGRATIONS)?;
    let latest = latest_version();
    if target_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: target_version,
            latest_supported: latest,
        });
    }

    conn.execute_batch(TRACKING_TABLE_SQL)?;
    let current = recorded_version(conn)?;

    let mut applied = 0;
    for migration in MIGRATIONS
        .iter()
        .filter(|m| m.version > current && m.version <= target_version)
    {
        apply_one(conn, migration)?;
        applied += 1;
    }

    if applied == 0 {
        info!(
            "event=db_migrate module=db status=skip version={}",
            current
        );
    }
    Ok(applied)
}

/// Reports current/latest/pending without mutating the database.
pub fn migration_status(conn: &Connection) -> DbResult<MigrationStatus> {
    validate_registry(MIGRATIONS)?;
    let latest = latest_version();
    let current = if tracking_table_exists(conn)? {
        recorded_version(conn)?
    } else {
        0
    };
    Ok(MigrationStatus::new(current, latest))
}

/// Lists recorded migrations, ascending by version.
pub fn applied_migrations(conn: &Connection) -> DbResult<Vec<AppliedMigration>> {
    if !tracking_table_exists(conn)? {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT version, name, applied_at FROM schema_migrations ORDER BY version ASC;",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(AppliedMigration {
            version: row.get(0)?,
            name: row.get(1)?,
            applied_at: row.get(2)?,
        })
    })?;

    let mut applied = Vec::new();
    for row in rows {
        applied.push(row?);
    }
    Ok(applied)
}

/// Reverts migrations above `target_version`, newest first.
///
/// Returns the number reverted. A target at or above the current version is
/// a no-op.
pub fn rollback(conn: &mut Connection, target_version: u32) -> DbResult<usize> {
    validate_registry(MIGRATIONS)?;
    if !tracking_table_exists(conn)? {
        return Ok(0);
    }

    let current = recorded_version(conn)?;

    let mut reverted = 0;
    for migration in MIGRATIONS
        .iter()
        .rev()
        .filter(|m| m.version > target_version && m.version <= current)
    {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.down)
            .map_err(|err| DbError::MigrationFailed {
                version: migration.version,
                name: migration.name,
                source: err,
            })?;
        tx.execute(
            "DELETE FROM schema_migrations WHERE version = ?1;",
            [migration.version],
        )?;
        tx.commit()?;

        info!(
            "event=db_rollback module=db status=ok version={} name={}",
            migration.version, migration.name
        );
        reverted += 1;
    }
    Ok(reverted)
}

fn apply_one(conn: &mut Connection, migration: &Migration) -> DbResult<()> {
    let started_at = Instant::now();
    let tx = conn.transaction()?;

    if let Err(err) = tx.execute_batch(migration.up) {
        error!(
            "event=db_migrate module=db status=error version={} name={} duration_ms={} error_code=migration_failed error={}",
            migration.version,
            migration.name,
            started_at.elapsed().as_millis(),
            err
        );
        return Err(DbError::MigrationFailed {
            version: migration.version,
            name: migration.name,
            source: err,
        });
    }

    tx.execute(
        "INSERT INTO schema_migrations (version, name, applied_at)
         VALUES (?1, ?2, CAST(strftime('%s', 'now') AS INTEGER) * 1000);",
        params![migration.version, migration.name],
    )?;
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok version={} name={} duration_ms={}",
        migration.version,
        migration.name,
        started_at.elapsed().as_millis()
    );
    Ok(())
}

fn tracking_table_exists(conn: &Connection) -> DbResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations';",
            [],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Highest recorded version. A version above `latest_version()` wins over
/// any gap in the history.
fn recorded_version(conn: &Connection) -> DbResult<u32> {
    let (count, max): (u32, u32) = conn.query_row(
        "SELECT COUNT(*), COALESCE(MAX(version), 0) FROM schema_migrations;",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let latest = latest_version();
    if max > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: max,
            latest_supported: latest,
        });
    }
    // Versions start at 1, so a gap-free history has exactly `max` rows.
    if count != max {
        return Err(DbError::InconsistentHistory {
            highest_version: max,
            recorded_count: count,
        });
    }
    Ok(max)
}

fn validate_registry(migrations: &[Migration]) -> DbResult<()> {
    let mut expected = 1;
    for migration in migrations {
        let captures = SCRIPT_NAME_RE
            .captures(migration.name)
            .ok_or(DbError::InvalidScript(migration.name))?;
        let prefix: u32 = captures[1]
            .parse()
            .map_err(|_| DbError::InvalidScript(migration.name))?;
        if prefix != migration.version || migration.version != expected {
            return Err(DbError::InvalidScript(migration.name));
        }
        expected += 1;
    }
    Ok(())
}
