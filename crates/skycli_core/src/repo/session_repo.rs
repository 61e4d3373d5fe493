//! File-backed session repository over the config document.
//!
//! # Responsibility
//! - Expose the single stored session as a decrypted `SessionRecord`.
//! - Persist session changes through `Config::save`, encrypting tokens.
//!
//! # Invariants
//! - At most one session exists; saving replaces it.
//! - The in-memory document only changes after the file write succeeds.
//! - Plaintext tokens are never logged.

use super::{RepoError, RepoResult, Repository};
use crate::config::{Config, ConfigPaths, SessionConfig, TokenCipher};
use crate::model::session::SessionRecord;
use log::info;
use std::sync::{Mutex, MutexGuard};

pub struct SessionRepository {
    paths: ConfigPaths,
    cipher: TokenCipher,
    config: Mutex<Config>,
}

impl SessionRepository {
    /// Loads the current config document from `paths`.
    pub fn open(paths: ConfigPaths, cipher: TokenCipher) -> RepoResult<Self> {
        let config = Config::load(&paths)?;
        Ok(Self {
            paths,
            cipher,
            config: Mutex::new(config),
        })
    }

    /// Returns the stored session with decrypted tokens, if any.
    pub fn session(&self) -> RepoResult<Option<SessionRecord>> {
        let config = self.lock()?;
        let Some(stored) = config.session.as_ref() else {
            return Ok(None);
        };
        Ok(Some(SessionRecord {
            did: stored.did.clone(),
            handle: stored.handle.clone(),
            service_url: stored.service_url.clone(),
            email: stored.email.clone(),
            access_token: stored.access_token(&self.cipher)?,
            refresh_token: stored.refresh_token(&self.cipher)?,
        }))
    }

    /// Replaces the stored session with `record`.
    pub fn save_session(&self, record: &SessionRecord) -> RepoResult<()> {
        let mut stored = SessionConfig::new(
            record.handle.as_str(),
            record.did.as_str(),
            record.service_url.as_str(),
        );
        stored.email = record.email.clone();
        stored.set_access_token(&self.cipher, &record.access_token)?;
        stored.set_refresh_token(&self.cipher, &record.refresh_token)?;

        self.update(|config| {
            config.session = Some(stored);
            Ok(())
        })?;
        info!("event=session_save module=repo.session status=ok");
        Ok(())
    }

    /// Removes the stored session. Deleting when logged out is not an error.
    pub fn delete_session(&self) -> RepoResult<()> {
        self.update(|config| {
            config.session = None;
            Ok(())
        })?;
        info!("event=session_delete module=repo.session status=ok");
        Ok(())
    }

    pub fn access_token(&self) -> RepoResult<String> {
        let config = self.lock()?;
        let stored = config.session.as_ref().ok_or(RepoError::NoSession)?;
        Ok(stored.access_token(&self.cipher)?)
    }

    pub fn refresh_token(&self) -> RepoResult<String> {
        let config = self.lock()?;
        let stored = config.session.as_ref().ok_or(RepoError::NoSession)?;
        Ok(stored.refresh_token(&self.cipher)?)
    }

    /// Re-encrypts both tokens of the current session and saves.
    pub fn update_tokens(&self, access_token: &str, refresh_token: &str) -> RepoResult<()> {
        self.update(|config| {
            let stored = config.session.as_mut().ok_or(RepoError::NoSession)?;
            stored.set_access_token(&self.cipher, access_token)?;
            stored.set_refresh_token(&self.cipher, refresh_token)?;
            Ok(())
        })?;
        info!("event=session_tokens_update module=repo.session status=ok");
        Ok(())
    }

    /// True when a session with a stored access token exists.
    ///
    /// Does not decrypt; a token encrypted under another key still counts.
    pub fn has_valid_session(&self) -> bool {
        self.lock()
            .map(|config| {
                config
                    .session
                    .as_ref()
                    .is_some_and(|stored| !stored.encrypted_access.is_empty())
            })
            .unwrap_or(false)
    }

    pub fn did(&self) -> RepoResult<String> {
        self.read_field(|stored| stored.did.clone())
    }

    pub fn handle(&self) -> RepoResult<String> {
        self.read_field(|stored| stored.handle.clone())
    }

    pub fn service_url(&self) -> RepoResult<String> {
        self.read_field(|stored| stored.service_url.clone())
    }

    fn read_field(&self, f: impl FnOnce(&SessionConfig) -> String) -> RepoResult<String> {
        let config = self.lock()?;
        config.session.as_ref().map(f).ok_or(RepoError::NoSession)
    }

    /// Applies `f` to a copy of the document, saves it, then swaps it in.
    fn update(&self, f: impl FnOnce(&mut Config) -> RepoResult<()>) -> RepoResult<()> {
        let mut config = self.lock()?;
        let mut next = config.clone();
        f(&mut next)?;
        next.save(&self.paths)?;
        *config = next;
        Ok(())
    }

    fn lock(&self) -> RepoResult<MutexGuard<'_, Config>> {
        self.config
            .lock()
            .map_err(|_| RepoError::Poisoned("session"))
    }
}

impl Repository for SessionRepository {
    fn name(&self) -> &'static str {
        "session"
    }

    fn init(&self) -> RepoResult<()> {
        self.paths
            .ensure_config_dir()
            .map_err(|err| RepoError::Config(err.into()))
    }

    fn close(&self) -> RepoResult<()> {
        Ok(())
    }
}
