//! Persistence readiness checks run before any other persistence call.
//!
//! # Responsibility
//! - Create the config directory and cache database on first use.
//! - On later runs, only verify that the schema is current.
//! - Provide the explicit `setup` upgrade path for operators.
//!
//! # Invariants
//! - The steady-state branch opens the database read-only in effect: it
//!   queries migration status and never applies migrations.
//! - A database behind the binary is a blocking error naming `skycli setup`.

use crate::config::{ConfigPaths, PathError};
use crate::db::{migration_status, open_db, run_migrations, DbError, MigrationStatus};
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub type BootstrapResult<T> = Result<T, BootstrapError>;

#[derive(Debug)]
pub enum BootstrapError {
    Path(PathError),
    Inspect { path: PathBuf, source: io::Error },
    Db(DbError),
    PendingMigrations {
        current: u32,
        latest: u32,
        pending: u32,
    },
}

impl Display for BootstrapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(err) => write!(f, "bootstrap: {err}"),
            Self::Inspect { path, source } => write!(
                f,
                "bootstrap: failed to inspect `{}`: {source}",
                path.display()
            ),
            Self::Db(err) => write!(f, "bootstrap: {err}"),
            Self::PendingMigrations {
                current,
                latest,
                pending,
            } => write!(
                f,
                "database has {pending} pending migrations (current: v{current}, latest: v{latest}); run `skycli setup` to update"
            ),
        }
    }
}

impl Error for BootstrapError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Path(err) => Some(err),
            Self::Inspect { source, .. } => Some(source),
            Self::Db(err) => Some(err),
            Self::PendingMigrations { .. } => None,
        }
    }
}

impl From<PathError> for BootstrapError {
    fn from(value: PathError) -> Self {
        Self::Path(value)
    }
}

impl From<DbError> for BootstrapError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

/// Which bootstrap branch ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Directory and database were both created; `applied` migrations ran.
    FirstRun { applied: usize },
    /// Directory existed but the database file did not.
    DatabaseCreated { applied: usize },
    /// Everything existed and the schema is current.
    Ready(MigrationStatus),
}

/// Result of the explicit `setup` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupReport {
    pub config_dir: PathBuf,
    pub database_path: PathBuf,
    pub created_dir: bool,
    pub created_database: bool,
    pub version_before: u32,
    pub version_after: u32,
    pub applied: usize,
}

/// Makes sure the config directory and a current database exist.
///
/// # Errors
/// - `Path` when the config path is a file or cannot be created.
/// - `Db` when opening, migrating or inspecting the database fails.
/// - `PendingMigrations` when an existing database is behind this binary.
pub fn ensure_persistence_ready(paths: &ConfigPaths) -> BootstrapResult<BootstrapOutcome> {
    let started_at = Instant::now();
    let result = ensure_ready_inner(paths);
    match &result {
        Ok(outcome) => info!(
            "event=bootstrap module=bootstrap status=ok outcome={} duration_ms={}",
            outcome_label(outcome),
            started_at.elapsed().as_millis()
        ),
        Err(BootstrapError::PendingMigrations {
            current, latest, ..
        }) => warn!(
            "event=bootstrap module=bootstrap status=error error_code=pending_migrations current={} latest={}",
            current, latest
        ),
        Err(err) => error!(
            "event=bootstrap module=bootstrap status=error error_code=bootstrap_failed error={}",
            err
        ),
    }
    result
}

fn ensure_ready_inner(paths: &ConfigPaths) -> BootstrapResult<BootstrapOutcome> {
    let config_dir = paths.config_dir();
    match std::fs::metadata(config_dir) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            paths.ensure_config_dir()?;
            let applied = create_database(&paths.cache_db_path())?;
            return Ok(BootstrapOutcome::FirstRun { applied });
        }
        Err(err) => {
            return Err(BootstrapError::Inspect {
                path: config_dir.to_path_buf(),
                source: err,
            })
        }
        Ok(meta) if !meta.is_dir() => {
            return Err(PathError::NotADirectory(config_dir.to_path_buf()).into());
        }
        Ok(_) => {}
    }

    let db_path = paths.cache_db_path();
    if !db_path.exists() {
        let applied = create_database(&db_path)?;
        return Ok(BootstrapOutcome::DatabaseCreated { applied });
    }

    let conn = open_db(&db_path)?;
    let status = migration_status(&conn)?;
    if !status.is_up_to_date {
        return Err(BootstrapError::PendingMigrations {
            current: status.current_version,
            latest: status.latest_version,
            pending: status.pending_count,
        });
    }
    Ok(BootstrapOutcome::Ready(status))
}

/// Creates (or upgrades) everything, applying all pending migrations.
pub fn run_setup(paths: &ConfigPaths) -> BootstrapResult<SetupReport> {
    let config_dir = paths.config_dir().to_path_buf();
    let database_path = paths.cache_db_path();
    let created_dir = !config_dir.is_dir();
    paths.ensure_config_dir()?;

    let created_database = !database_path.exists();
    let mut conn = open_db(&database_path)?;
    let version_before = migration_status(&conn)?.current_version;
    let applied = run_migrations(&mut conn)?;
    let version_after = migration_status(&conn)?.current_version;

    info!(
        "event=setup module=bootstrap status=ok created_dir={} created_database={} version_before={} version_after={} applied={}",
        created_dir, created_database, version_before, version_after, applied
    );
    Ok(SetupReport {
        config_dir,
        database_path,
        created_dir,
        created_database,
        version_before,
        version_after,
        applied,
    })
}

fn create_database(path: &Path) -> BootstrapResult<usize> {
    let mut conn = open_db(path)?;
    Ok(run_migrations(&mut conn)?)
}

fn outcome_label(outcome: &BootstrapOutcome) -> &'static str {
    match outcome {
        BootstrapOutcome::FirstRun { .. } => "first_run",
        BootstrapOutcome::DatabaseCreated { .. } => "database_created",
        BootstrapOutcome::Ready(_) => "ready",
    }
}
