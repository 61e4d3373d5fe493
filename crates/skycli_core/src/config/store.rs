//! Typed configuration document persisted as `<config-dir>/.config.json`.
//!
//! # Responsibility
//! - Load/save the session metadata document.
//! - Keep tokens encrypted at rest through `TokenCipher`.
//!
//! # Invariants
//! - A missing file loads as the default (logged-out) document.
//! - Saved files are owner read/write only.
//! - Setters store only ciphertext; plaintext never outlives the call.
//! - Unknown JSON fields are ignored for forward compatibility.

use super::crypto::{CryptoError, TokenCipher};
use super::paths::{ConfigPaths, PathError};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug)]
pub enum ConfigError {
    Path(PathError),
    Read { path: PathBuf, source: io::Error },
    Parse(serde_json::Error),
    Serialize(serde_json::Error),
    Write { path: PathBuf, source: io::Error },
    Crypto(CryptoError),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(err) => write!(f, "{err}"),
            Self::Read { path, source } => {
                write!(f, "config.read: `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "config.parse: {err}"),
            Self::Serialize(err) => write!(f, "config.serialize: {err}"),
            Self::Write { path, source } => {
                write!(f, "config.write: `{}`: {source}", path.display())
            }
            Self::Crypto(err) => write!(f, "{err}"),
            Self::Invalid(message) => write!(f, "config.validate: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Path(err) => Some(err),
            Self::Read { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Serialize(err) => Some(err),
            Self::Write { source, .. } => Some(source),
            Self::Crypto(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<PathError> for ConfigError {
    fn from(value: PathError) -> Self {
        Self::Path(value)
    }
}

impl From<CryptoError> for ConfigError {
    fn from(value: CryptoError) -> Self {
        Self::Crypto(value)
    }
}

/// Root configuration document. No session means logged out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,
}

/// Persisted session metadata with encrypted tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub did: String,
    #[serde(default, rename = "serviceUrl")]
    pub service_url: String,
    #[serde(default, rename = "encryptedAccessToken")]
    pub encrypted_access: String,
    #[serde(default, rename = "encryptedRefreshToken")]
    pub encrypted_refresh: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl SessionConfig {
    pub fn new(
        handle: impl Into<String>,
        did: impl Into<String>,
        service_url: impl Into<String>,
    ) -> Self {
        Self {
            handle: handle.into(),
            did: did.into(),
            service_url: service_url.into(),
            ..Self::default()
        }
    }

    /// Decrypts the access token; empty when none is stored.
    pub fn access_token(&self, cipher: &TokenCipher) -> ConfigResult<String> {
        decrypt_if_present(cipher, &self.encrypted_access)
    }

    /// Decrypts the refresh token; empty when none is stored.
    pub fn refresh_token(&self, cipher: &TokenCipher) -> ConfigResult<String> {
        decrypt_if_present(cipher, &self.encrypted_refresh)
    }

    pub fn set_access_token(&mut self, cipher: &TokenCipher, token: &str) -> ConfigResult<()> {
        self.encrypted_access = cipher.encrypt(token)?;
        Ok(())
    }

    pub fn set_refresh_token(&mut self, cipher: &TokenCipher, token: &str) -> ConfigResult<()> {
        self.encrypted_refresh = cipher.encrypt(token)?;
        Ok(())
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.did.trim().is_empty() {
            return Err(ConfigError::Invalid("session.did must not be empty".into()));
        }
        if self.handle.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "session.handle must not be empty".into(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Loads the document at `paths.config_file()`.
    ///
    /// # Errors
    /// - `Read` for I/O failures other than not-found.
    /// - `Parse` for malformed JSON.
    /// - `Invalid` when a present session lacks its identity fields.
    pub fn load(paths: &ConfigPaths) -> ConfigResult<Self> {
        Self::load_from(&paths.config_file())
    }

    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        };

        let config: Self = serde_json::from_slice(&bytes).map_err(ConfigError::Parse)?;
        if let Some(session) = &config.session {
            session.validate()?;
        }
        Ok(config)
    }

    /// Writes the document, creating the configuration directory if needed.
    ///
    /// Overwrites prior content; there is no temp-file swap. A session that
    /// `load` would reject is refused with `Invalid` before anything is written.
    pub fn save(&self, paths: &ConfigPaths) -> ConfigResult<()> {
        if let Some(session) = &self.session {
            session.validate()?;
        }
        paths.ensure_config_dir()?;
        let path = paths.config_file();
        let data = serde_json::to_vec_pretty(self).map_err(ConfigError::Serialize)?;

        match write_private_file(&path, &data) {
            Ok(()) => {
                info!(
                    "event=config_save module=config status=ok has_session={}",
                    self.session.is_some()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=config_save module=config status=error error_code=config_write_failed error={}",
                    err
                );
                Err(ConfigError::Write { path, source: err })
            }
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }
}

fn decrypt_if_present(cipher: &TokenCipher, encrypted: &str) -> ConfigResult<String> {
    if encrypted.is_empty() {
        return Ok(String::new());
    }
    Ok(cipher.decrypt(encrypted)?)
}

#[cfg(unix)]
fn write_private_file(path: &Path, data: &[u8]) -> io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn write_private_file(path: &Path, data: &[u8]) -> io::Result<()> {
    std::fs::write(path, data)
}

#[cfg(test)]
mod tests {
    use super::{Config, ConfigError, SessionConfig};
    use crate::config::crypto::{KeyMaterial, TokenCipher};
    use crate::config::paths::ConfigPaths;

    fn cipher() -> TokenCipher {
        TokenCipher::new(&KeyMaterial::Secret("config-tests".to_string()))
    }

    #[test]
    fn missing_file_loads_logged_out_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&ConfigPaths::at(dir.path())).unwrap();
        assert_eq!(config, Config::default());
        assert!(!config.is_logged_in());
    }

    #[test]
    fn save_then_load_preserves_session_and_encrypts_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ConfigPaths::at(dir.path().join("cfg"));
        let cipher = cipher();

        let mut session = SessionConfig::new("alice.test", "did:plc:alice", "https://bsky.social");
        session.set_access_token(&cipher, "access-1").unwrap();
        session.set_refresh_token(&cipher, "refresh-1").unwrap();
        let config = Config {
            session: Some(session),
        };
        config.save(&paths).unwrap();

        let raw = std::fs::read_to_string(paths.config_file()).unwrap();
        assert!(!raw.contains("access-1"));
        assert!(!raw.contains("refresh-1"));
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["session"]["serviceUrl"], "https://bsky.social");
        assert!(json["session"]["encryptedAccessToken"].is_string());
        assert!(json["session"].get("email").is_none());

        let loaded = Config::load(&paths).unwrap();
        let loaded_session = loaded.session.unwrap();
        assert_eq!(loaded_session.access_token(&cipher).unwrap(), "access-1");
        assert_eq!(loaded_session.refresh_token(&cipher).unwrap(), "refresh-1");
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let paths = ConfigPaths::at(dir.path());
        Config::default().save(&paths).unwrap();

        let mode = std::fs::metadata(paths.config_file())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ConfigPaths::at(dir.path());
        std::fs::write(
            paths.config_file(),
            r#"{"theme":"dark","session":{"handle":"a","did":"did:plc:a","extra":1}}"#,
        )
        .unwrap();

        let config = Config::load(&paths).unwrap();
        let session = config.session.unwrap();
        assert_eq!(session.handle, "a");
        assert_eq!(session.access_token(&cipher()).unwrap(), "");
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ConfigPaths::at(dir.path());
        std::fs::write(paths.config_file(), "{not json").unwrap();

        assert!(matches!(
            Config::load(&paths).unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn session_with_blank_did_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ConfigPaths::at(dir.path().join("cfg"));
        let config = Config {
            session: Some(SessionConfig::new("alice.test", "  ", "https://bsky.social")),
        };

        assert!(matches!(
            config.save(&paths).unwrap_err(),
            ConfigError::Invalid(_)
        ));
        assert!(!paths.config_file().exists());
    }

    #[test]
    fn session_without_did_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ConfigPaths::at(dir.path());
        std::fs::write(paths.config_file(), r#"{"session":{"handle":"a"}}"#).unwrap();

        assert!(matches!(
            Config::load(&paths).unwrap_err(),
            ConfigError::Invalid(_)
        ));
    }
}
