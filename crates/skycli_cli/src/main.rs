//! `skycli` command front end over `skycli_core`.
//!
//! # Responsibility
//! - Parse commands and route them to core persistence operations.
//! - Start file logging once the config directory exists.
//!
//! # Invariants
//! - Only `setup` and `logout` create the config directory.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use skycli_core::config::Config;
use skycli_core::db::migrations::migrations as known_migrations;
use skycli_core::db::{applied_migrations, migration_status, open_db, rollback};
use skycli_core::logging::{resolve_log_level, LOG_LEVEL_ENV};
use skycli_core::{init_logging, run_setup, ConfigPaths, Registry, RegistryConfig, TokenCipher};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "skycli", version)]
#[command(about = "Local cache and session management for skycli", long_about = None)]
struct Cli {
    /// Use this directory instead of the platform config directory
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the config directory and apply pending migrations
    Setup,
    /// Show session and schema status
    Status,
    /// List applied and pending migrations
    Migrations,
    /// Revert migrations above a version
    Rollback {
        #[arg(long)]
        to: u32,
    },
    /// Remove the stored session
    Logout,
}

impl Commands {
    fn label(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Status => "status",
            Self::Migrations => "migrations",
            Self::Rollback { .. } => "rollback",
            Self::Logout => "logout",
        }
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let paths = match cli.config_dir {
        Some(dir) => ConfigPaths::at(dir),
        None => ConfigPaths::resolve().context("failed to resolve config directory")?,
    };
    start_logging(&paths);

    let command = cli.command.label();
    info!("event=cli_command module=cli status=start command={}", command);
    let result = match cli.command {
        Commands::Setup => setup(&paths),
        Commands::Status => status(&paths),
        Commands::Migrations => list_migrations(&paths),
        Commands::Rollback { to } => rollback_to(&paths, to),
        Commands::Logout => logout(paths),
    };
    match &result {
        Ok(()) => info!("event=cli_command module=cli status=ok command={}", command),
        Err(err) => error!(
            "event=cli_command module=cli status=error command={} error={:#}",
            command, err
        ),
    }
    result
}

/// Logging is best effort; a failure is reported but never fatal.
///
/// Skipped while the config directory is missing. Calling again after the
/// directory appears starts it; repeat calls are no-ops.
fn start_logging(paths: &ConfigPaths) {
    let log_dir = match file_log_dir(paths) {
        Ok(Some(dir)) => dir,
        Ok(None) => return,
        Err(err) => {
            eprintln!("warning: logging disabled: {err}");
            return;
        }
    };
    let level = resolve_log_level(std::env::var(LOG_LEVEL_ENV).ok().as_deref());
    if let Err(err) = init_logging(&level, &log_dir) {
        eprintln!("warning: logging disabled: {err}");
    }
}

/// Absolute log directory, or `None` when the config directory is missing.
/// Never touches the filesystem beyond the existence check.
fn file_log_dir(paths: &ConfigPaths) -> std::io::Result<Option<PathBuf>> {
    if !paths.config_dir().is_dir() {
        return Ok(None);
    }
    std::path::absolute(paths.log_dir()).map(Some)
}

fn setup(paths: &ConfigPaths) -> Result<()> {
    let report = run_setup(paths).context("setup failed")?;
    start_logging(paths);
    if report.created_dir {
        println!("created {}", report.config_dir.display());
    }
    if report.created_database {
        println!("created {}", report.database_path.display());
    }
    println!(
        "schema v{} -> v{} ({} migration(s) applied)",
        report.version_before, report.version_after, report.applied
    );
    Ok(())
}

fn status(paths: &ConfigPaths) -> Result<()> {
    println!("config dir: {}", paths.config_dir().display());

    let config = Config::load(paths).context("failed to load config")?;
    match &config.session {
        Some(session) => println!("session: {} ({})", session.handle, session.did),
        None => println!("session: logged out"),
    }

    let db_path = paths.cache_db_path();
    if !db_path.exists() {
        println!("database: missing; run `skycli setup`");
        return Ok(());
    }
    let conn = open_db(&db_path).context("failed to open database")?;
    let status = migration_status(&conn)?;
    println!(
        "database: v{} of v{} ({} pending)",
        status.current_version, status.latest_version, status.pending_count
    );
    if !status.is_up_to_date {
        println!("run `skycli setup` to apply pending migrations");
    }
    Ok(())
}

fn list_migrations(paths: &ConfigPaths) -> Result<()> {
    let db_path = paths.cache_db_path();
    if !db_path.exists() {
        bail!(
            "database `{}` does not exist; run `skycli setup`",
            db_path.display()
        );
    }
    let conn = open_db(&db_path).context("failed to open database")?;
    let applied = applied_migrations(&conn)?;

    for migration in known_migrations() {
        match applied.iter().find(|row| row.version == migration.version) {
            Some(row) => println!("[x] {} (applied_at={})", migration.name, row.applied_at),
            None => println!("[ ] {}", migration.name),
        }
    }
    Ok(())
}

fn rollback_to(paths: &ConfigPaths, target: u32) -> Result<()> {
    let db_path = paths.cache_db_path();
    if !db_path.exists() {
        bail!("database `{}` does not exist", db_path.display());
    }
    let mut conn = open_db(&db_path).context("failed to open database")?;
    let reverted = rollback(&mut conn, target)
        .with_context(|| format!("rollback to v{target} failed"))?;
    let status = migration_status(&conn)?;
    println!(
        "reverted {reverted} migration(s); schema is now v{}",
        status.current_version
    );
    Ok(())
}

fn logout(paths: ConfigPaths) -> Result<()> {
    let registry = Registry::new(RegistryConfig::new(paths, TokenCipher::from_env()));
    registry.init()?;

    let session = registry.session_repo()?;
    let was_logged_in = session.has_valid_session();
    session.delete_session()?;
    registry.close()?;

    if was_logged_in {
        println!("logged out");
    } else {
        println!("no active session");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::file_log_dir;
    use skycli_core::{run_setup, ConfigPaths};

    #[test]
    fn missing_config_dir_skips_file_logging_without_creating_it() {
        let root = tempfile::tempdir().unwrap();
        let paths = ConfigPaths::at(root.path().join("cfg"));

        assert!(file_log_dir(&paths).unwrap().is_none());
        assert!(!paths.config_dir().exists());

        let report = run_setup(&paths).unwrap();
        assert!(report.created_dir);
        let log_dir = file_log_dir(&paths).unwrap().unwrap();
        assert!(log_dir.is_absolute());
        assert!(log_dir.starts_with(paths.config_dir()));
    }
}
