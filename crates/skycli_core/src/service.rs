//! Remote session service handle.
//!
//! # Responsibility
//! - Hold the access/refresh token pair for the remote social service.
//! - Report token expiry from the JWT `exp` claim.
//!
//! # Invariants
//! - No network I/O happens here; login and refresh calls live elsewhere.
//! - `close()` clears every credential and leaves the handle unauthenticated.
//! - Token values never appear in logs or `Debug` output.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use log::debug;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const DEFAULT_SERVICE_URL: &str = "https://bsky.social";
pub const REFRESH_WINDOW_MS: i64 = 5 * 60 * 1000;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    EmptyAccessToken,
    Close(String),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyAccessToken => write!(f, "service.set_tokens: access token is empty"),
            Self::Close(message) => write!(f, "service.close: {message}"),
        }
    }
}

impl Error for ServiceError {}

/// Authenticated-handle contract consumed by command logic.
pub trait SessionService: Send + Sync {
    fn name(&self) -> &'static str;
    fn base_url(&self) -> &str;
    fn is_authenticated(&self) -> bool;
    fn set_tokens(&self, access_token: &str, refresh_token: &str) -> ServiceResult<()>;
    fn access_token(&self) -> Option<String>;
    fn refresh_token(&self) -> Option<String>;
    /// Access token expiry in epoch milliseconds, when the token carries one.
    fn token_expiry(&self) -> Option<i64>;
    /// True when the expiry is known and falls within the refresh window.
    fn needs_refresh(&self, now_ms: i64) -> bool;
    fn close(&self) -> ServiceResult<()>;
}

#[derive(Default)]
struct Credentials {
    access_token: String,
    refresh_token: String,
    expires_at_ms: Option<i64>,
}

pub struct RemoteSession {
    base_url: String,
    credentials: Mutex<Credentials>,
}

impl RemoteSession {
    /// Creates an unauthenticated handle; blank `base_url` means the default.
    pub fn new(base_url: &str) -> Self {
        let base_url = if base_url.trim().is_empty() {
            DEFAULT_SERVICE_URL
        } else {
            base_url
        };
        Self {
            base_url: base_url.to_string(),
            credentials: Mutex::new(Credentials::default()),
        }
    }

    fn credentials(&self) -> MutexGuard<'_, Credentials> {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Debug for RemoteSession {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

impl SessionService for RemoteSession {
    fn name(&self) -> &'static str {
        "bluesky"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn is_authenticated(&self) -> bool {
        !self.credentials().access_token.is_empty()
    }

    fn set_tokens(&self, access_token: &str, refresh_token: &str) -> ServiceResult<()> {
        if access_token.is_empty() {
            return Err(ServiceError::EmptyAccessToken);
        }
        let expires_at_ms = parse_jwt_expiry(access_token);
        let mut credentials = self.credentials();
        credentials.access_token = access_token.to_string();
        credentials.refresh_token = refresh_token.to_string();
        credentials.expires_at_ms = expires_at_ms;
        debug!(
            "event=service_tokens_set module=service status=ok has_expiry={}",
            expires_at_ms.is_some()
        );
        Ok(())
    }

    fn access_token(&self) -> Option<String> {
        let credentials = self.credentials();
        (!credentials.access_token.is_empty()).then(|| credentials.access_token.clone())
    }

    fn refresh_token(&self) -> Option<String> {
        let credentials = self.credentials();
        (!credentials.refresh_token.is_empty()).then(|| credentials.refresh_token.clone())
    }

    fn token_expiry(&self) -> Option<i64> {
        self.credentials().expires_at_ms
    }

    fn needs_refresh(&self, now_ms: i64) -> bool {
        self.token_expiry()
            .is_some_and(|expires_at| expires_at.saturating_sub(now_ms) <= REFRESH_WINDOW_MS)
    }

    fn close(&self) -> ServiceResult<()> {
        *self.credentials() = Credentials::default();
        debug!("event=service_close module=service status=ok");
        Ok(())
    }
}

#[derive(Deserialize)]
struct JwtClaims {
    exp: Option<i64>,
}

/// Reads the `exp` claim (epoch seconds) and returns it in milliseconds.
fn parse_jwt_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: JwtClaims = serde_json::from_slice(&bytes).ok()?;
    claims.exp.map(|seconds| seconds.saturating_mul(1000))
}
