//! Local persistence and session security for the `skycli` command line.
//!
//! Command handlers go through [`Registry`]; everything else here is the
//! machinery it owns: config layout, token encryption, the config document,
//! schema migrations, bootstrap checks and the cached-entity repositories.

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod registry;
pub mod repo;
pub mod service;

pub use bootstrap::{
    ensure_persistence_ready, run_setup, BootstrapError, BootstrapOutcome, BootstrapResult,
    SetupReport,
};
pub use config::{
    Config, ConfigError, ConfigPaths, CryptoError, KeyMaterial, PathError, SessionConfig,
    TokenCipher,
};
pub use db::{DbError, DbResult, MigrationStatus};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::feed::{Feed, FeedId};
pub use model::post::{Post, PostId};
pub use model::profile::{Profile, ProfileId, DEFAULT_PROFILE_TTL};
pub use model::session::SessionRecord;
pub use registry::{Registry, RegistryConfig, RegistryError, RegistryResult};
pub use repo::{RepoError, RepoResult, Repository};
pub use service::{RemoteSession, SessionService, DEFAULT_SERVICE_URL};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
