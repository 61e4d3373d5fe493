//! Platform-specific locations for configuration and cache files.
//!
//! # Responsibility
//! - Resolve the per-user configuration directory from the environment.
//! - Derive the config document and cache database paths beneath it.
//! - Create the directory with owner-only permissions.
//!
//! # Invariants
//! - `ConfigPaths` holds no state beyond the resolved directory.
//! - Only `ensure_config_dir` touches the file system, and only to create
//!   directories.

use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};

pub const APP_NAME: &str = "skycli";
pub const CONFIG_FILE_NAME: &str = ".config.json";
pub const CACHE_DB_FILE_NAME: &str = "cache.db";
pub const LOG_DIR_NAME: &str = "logs";

#[cfg(windows)]
const APP_DATA_ENV: &str = "APPDATA";

pub type PathResult<T> = Result<T, PathError>;

#[derive(Debug)]
pub enum PathError {
    MissingEnv(&'static str),
    HomeDirUnavailable,
    NotADirectory(PathBuf),
    CreateDir { path: PathBuf, source: io::Error },
}

impl Display for PathError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEnv(name) => {
                write!(f, "paths.config_dir: {name} environment variable not set")
            }
            Self::HomeDirUnavailable => {
                write!(f, "paths.config_dir: unable to determine home directory")
            }
            Self::NotADirectory(path) => write!(
                f,
                "paths.config_dir: config path exists but is not a directory: {}",
                path.display()
            ),
            Self::CreateDir { path, source } => write!(
                f,
                "paths.ensure_config_dir: failed to create `{}`: {source}",
                path.display()
            ),
        }
    }
}

impl Error for PathError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CreateDir { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Resolved on-disk layout rooted at the configuration directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    config_dir: PathBuf,
}

impl ConfigPaths {
    /// Resolves the configuration directory for the current platform.
    ///
    /// - Unix: `$HOME/.skycli`
    /// - Windows: `%APPDATA%\skycli`
    ///
    /// # Errors
    /// - `MissingEnv` when `APPDATA` is unset or empty on Windows.
    /// - `HomeDirUnavailable` when the home directory cannot be found.
    pub fn resolve() -> PathResult<Self> {
        Ok(Self {
            config_dir: platform_config_dir()?,
        })
    }

    /// Pins the layout to an explicit directory.
    pub fn at(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    pub fn cache_db_path(&self) -> PathBuf {
        self.config_dir.join(CACHE_DB_FILE_NAME)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.config_dir.join(LOG_DIR_NAME)
    }

    /// Creates the configuration directory (recursively) if absent.
    ///
    /// New directories are created with mode `0700` on Unix. Existing
    /// directories are left untouched.
    ///
    /// # Errors
    /// - `NotADirectory` when the path exists as a file.
    /// - `CreateDir` when creation fails.
    pub fn ensure_config_dir(&self) -> PathResult<()> {
        let path = self.config_dir.as_path();
        if path.is_dir() {
            return Ok(());
        }
        if path.exists() {
            return Err(PathError::NotADirectory(path.to_path_buf()));
        }

        match create_private_dir(path) {
            Ok(()) => {
                info!(
                    "event=config_dir_create module=paths status=ok path={}",
                    path.display()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=config_dir_create module=paths status=error path={} error={}",
                    path.display(),
                    err
                );
                Err(PathError::CreateDir {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }
}

#[cfg(windows)]
fn platform_config_dir() -> PathResult<PathBuf> {
    match std::env::var_os(APP_DATA_ENV) {
        Some(base) if !base.is_empty() => Ok(PathBuf::from(base).join(APP_NAME)),
        _ => Err(PathError::MissingEnv(APP_DATA_ENV)),
    }
}

#[cfg(not(windows))]
fn platform_config_dir() -> PathResult<PathBuf> {
    let home = dirs::home_dir().ok_or(PathError::HomeDirUnavailable)?;
    Ok(home.join(format!(".{APP_NAME}")))
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> io::Result<()> {
    std::fs::create_dir_all(path)
}
