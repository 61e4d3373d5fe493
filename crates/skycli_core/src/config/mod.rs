//! Configuration directory layout, token encryption and the config document.
//!
//! # Responsibility
//! - Resolve on-disk locations (`paths`).
//! - Protect session tokens at rest (`crypto`).
//! - Load/save the session metadata document (`store`).
//!
//! # Invariants
//! - Tokens are never written to disk in plaintext.
//! - Directory and file permissions are owner-only on Unix.

pub mod crypto;
pub mod paths;
pub mod store;

pub use crypto::{CryptoError, CryptoResult, KeyMaterial, TokenCipher, SECRET_ENV};
pub use paths::{ConfigPaths, PathError, PathResult, APP_NAME};
pub use store::{Config, ConfigError, ConfigResult, SessionConfig};
