//! Process-wide owner of repository and service handles.
//!
//! # Responsibility
//! - Run the persistence bootstrap, then build every repository exactly once.
//! - Prime the remote session handle from a stored session.
//! - Hand out shared `Arc` handles and release everything on `close`.
//!
//! # Invariants
//! - `initialized` flips false -> true once per successful `init`, and back
//!   to false only through `close`.
//! - A failed `init` leaves the registry uninitialized; components built by
//!   that attempt are dropped, which closes their connections.
//! - `close` visits every component even when some fail.

use crate::bootstrap::{ensure_persistence_ready, BootstrapError};
use crate::config::{ConfigPaths, PathError, TokenCipher};
use crate::repo::feed_repo::FeedRepository;
use crate::repo::post_repo::PostRepository;
use crate::repo::profile_repo::ProfileRepository;
use crate::repo::session_repo::SessionRepository;
use crate::repo::{RepoError, Repository};
use crate::service::{RemoteSession, SessionService};
use log::{error, info, warn};
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Builds the session service for a base URL (blank means default).
pub type ServiceFactory = Arc<dyn Fn(&str) -> Arc<dyn SessionService> + Send + Sync>;

static GLOBAL: OnceCell<Registry> = OnceCell::new();

#[derive(Debug)]
pub enum RegistryError {
    Path(PathError),
    Bootstrap(BootstrapError),
    Component {
        component: &'static str,
        source: RepoError,
    },
    NotInitialized(&'static str),
    ComponentUnavailable(&'static str),
    Close(Vec<CloseFailure>),
    Poisoned,
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(err) => write!(f, "registry.config: {err}"),
            Self::Bootstrap(err) => write!(f, "registry.init: {err}"),
            Self::Component { component, source } => {
                write!(f, "registry.init: {component} repository: {source}")
            }
            Self::NotInitialized(component) => {
                write!(f, "registry.{component}: registry not initialized")
            }
            Self::ComponentUnavailable(component) => {
                write!(f, "registry.{component}: component not available")
            }
            Self::Close(failures) => {
                write!(f, "registry.close: {} component(s) failed", failures.len())?;
                for failure in failures {
                    write!(f, "; {failure}")?;
                }
                Ok(())
            }
            Self::Poisoned => write!(f, "registry: state lock is poisoned"),
        }
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Path(err) => Some(err),
            Self::Bootstrap(err) => Some(err),
            Self::Component { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<PathError> for RegistryError {
    fn from(value: PathError) -> Self {
        Self::Path(value)
    }
}

impl From<BootstrapError> for RegistryError {
    fn from(value: BootstrapError) -> Self {
        Self::Bootstrap(value)
    }
}

/// One component whose `close` failed.
#[derive(Debug)]
pub struct CloseFailure {
    pub component: &'static str,
    pub error: Box<dyn Error + Send + Sync>,
}

impl Display for CloseFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.component, self.error)
    }
}

/// Inputs the registry needs; tests build this against a temp directory.
#[derive(Clone)]
pub struct RegistryConfig {
    paths: ConfigPaths,
    cipher: TokenCipher,
    service_factory: ServiceFactory,
}

impl RegistryConfig {
    pub fn new(paths: ConfigPaths, cipher: TokenCipher) -> Self {
        Self {
            paths,
            cipher,
            service_factory: Arc::new(|base_url: &str| -> Arc<dyn SessionService> {
                Arc::new(RemoteSession::new(base_url))
            }),
        }
    }

    /// Resolves paths and key material from the process environment.
    pub fn from_env() -> RegistryResult<Self> {
        Ok(Self::new(ConfigPaths::resolve()?, TokenCipher::from_env()))
    }

    pub fn with_service_factory(
        mut self,
        factory: impl Fn(&str) -> Arc<dyn SessionService> + Send + Sync + 'static,
    ) -> Self {
        self.service_factory = Arc::new(factory);
        self
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }
}

impl Debug for RegistryConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("paths", &self.paths)
            .field("cipher", &self.cipher)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistryState {
    initialized: bool,
    service: Option<Arc<dyn SessionService>>,
    session: Option<Arc<SessionRepository>>,
    feed: Option<Arc<FeedRepository>>,
    post: Option<Arc<PostRepository>>,
    profile: Option<Arc<ProfileRepository>>,
}

pub struct Registry {
    config: RegistryConfig,
    state: RwLock<RegistryState>,
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Lazily constructed process-wide registry using environment config.
    ///
    /// Construction only resolves paths; call `init` before using handles.
    pub fn global() -> RegistryResult<&'static Registry> {
        GLOBAL.get_or_try_init(|| RegistryConfig::from_env().map(Registry::new))
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.read().map(|state| state.initialized).unwrap_or(false)
    }

    /// Bootstraps persistence and builds every component. Idempotent.
    ///
    /// # Errors
    /// - `Bootstrap` when the directory or schema is not ready.
    /// - `Component` naming the first repository that failed to open or init.
    pub fn init(&self) -> RegistryResult<()> {
        let mut state = self.write()?;
        if state.initialized {
            return Ok(());
        }

        let started_at = Instant::now();
        info!("event=registry_init module=registry status=start");
        match self.build() {
            Ok(built) => {
                *state = built;
                info!(
                    "event=registry_init module=registry status=ok duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=registry_init module=registry status=error duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn build(&self) -> RegistryResult<RegistryState> {
        let paths = &self.config.paths;
        ensure_persistence_ready(paths)?;
        let db_path = paths.cache_db_path();

        let session = init_component(
            "session",
            SessionRepository::open(paths.clone(), self.config.cipher.clone()),
        )?;
        let feed = init_component(
            "feed",
            FeedRepository::open(&db_path).map_err(RepoError::from),
        )?;
        let post = init_component(
            "post",
            PostRepository::open(&db_path).map_err(RepoError::from),
        )?;
        let profile = init_component(
            "profile",
            ProfileRepository::open(&db_path).map_err(RepoError::from),
        )?;

        let base_url = session.service_url().unwrap_or_default();
        let service = (self.config.service_factory)(base_url.as_str());
        prime_service(&session, service.as_ref());

        Ok(RegistryState {
            initialized: true,
            service: Some(service),
            session: Some(session),
            feed: Some(feed),
            post: Some(post),
            profile: Some(profile),
        })
    }

    /// Closes every component, collecting failures, and resets to
    /// uninitialized regardless of the outcome.
    pub fn close(&self) -> RegistryResult<()> {
        let mut state = self.write()?;
        let mut failures = Vec::new();

        if let Some(service) = state.service.take() {
            if let Err(err) = service.close() {
                failures.push(CloseFailure {
                    component: service.name(),
                    error: Box::new(err),
                });
            }
        }

        let repos: Vec<Arc<dyn Repository>> = [
            state.session.take().map(|repo| repo as Arc<dyn Repository>),
            state.feed.take().map(|repo| repo as Arc<dyn Repository>),
            state.post.take().map(|repo| repo as Arc<dyn Repository>),
            state.profile.take().map(|repo| repo as Arc<dyn Repository>),
        ]
        .into_iter()
        .flatten()
        .collect();
        failures.extend(close_repositories(&repos));
        state.initialized = false;

        if failures.is_empty() {
            info!("event=registry_close module=registry status=ok");
            return Ok(());
        }
        error!(
            "event=registry_close module=registry status=error failed={}",
            failures.len()
        );
        Err(RegistryError::Close(failures))
    }

    pub fn service(&self) -> RegistryResult<Arc<dyn SessionService>> {
        self.component("service", |state| state.service.as_ref())
    }

    pub fn session_repo(&self) -> RegistryResult<Arc<SessionRepository>> {
        self.component("session_repo", |state| state.session.as_ref())
    }

    pub fn feed_repo(&self) -> RegistryResult<Arc<FeedRepository>> {
        self.component("feed_repo", |state| state.feed.as_ref())
    }

    pub fn post_repo(&self) -> RegistryResult<Arc<PostRepository>> {
        self.component("post_repo", |state| state.post.as_ref())
    }

    pub fn profile_repo(&self) -> RegistryResult<Arc<ProfileRepository>> {
        self.component("profile_repo", |state| state.profile.as_ref())
    }

    fn component<T: ?Sized>(
        &self,
        name: &'static str,
        pick: impl FnOnce(&RegistryState) -> Option<&Arc<T>>,
    ) -> RegistryResult<Arc<T>> {
        let state = self.read()?;
        if !state.initialized {
            return Err(RegistryError::NotInitialized(name));
        }
        pick(&*state)
            .cloned()
            .ok_or(RegistryError::ComponentUnavailable(name))
    }

    fn read(&self) -> RegistryResult<RwLockReadGuard<'_, RegistryState>> {
        self.state.read().map_err(|_| RegistryError::Poisoned)
    }

    fn write(&self) -> RegistryResult<RwLockWriteGuard<'_, RegistryState>> {
        self.state.write().map_err(|_| RegistryError::Poisoned)
    }
}

fn init_component<R: Repository>(
    component: &'static str,
    opened: Result<R, RepoError>,
) -> RegistryResult<Arc<R>> {
    let repo = opened.map_err(|source| RegistryError::Component { component, source })?;
    repo.init()
        .map_err(|source| RegistryError::Component { component, source })?;
    Ok(Arc::new(repo))
}

/// Loads stored tokens into `service`. Failures leave it unauthenticated.
fn prime_service(session: &SessionRepository, service: &dyn SessionService) {
    if !session.has_valid_session() {
        return;
    }

    let primed = session
        .access_token()
        .map_err(|err| err.to_string())
        .and_then(|access| {
            let refresh = session.refresh_token().unwrap_or_default();
            service
                .set_tokens(&access, &refresh)
                .map_err(|err| err.to_string())
        });
    match primed {
        Ok(()) => info!("event=service_prime module=registry status=ok"),
        Err(err) => warn!(
            "event=service_prime module=registry status=error error_code=session_unusable error={}",
            err
        ),
    }
}

/// Closes each repository in order and returns every failure.
pub(crate) fn close_repositories(repos: &[Arc<dyn Repository>]) -> Vec<CloseFailure> {
    repos
        .iter()
        .filter_map(|repo| {
            repo.close().err().map(|err| CloseFailure {
                component: repo.name(),
                error: Box::new(err),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{close_repositories, RegistryError};
    use crate::repo::{RepoError, RepoResult, Repository};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeRepo {
        name: &'static str,
        fail: bool,
        closes: AtomicUsize,
    }

    impl FakeRepo {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail,
                closes: AtomicUsize::new(0),
            })
        }
    }

    impl Repository for FakeRepo {
        fn name(&self) -> &'static str {
            self.name
        }

        fn init(&self) -> RepoResult<()> {
            Ok(())
        }

        fn close(&self) -> RepoResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RepoError::Closed(self.name));
            }
            Ok(())
        }
    }

    #[test]
    fn close_visits_every_repository_and_reports_single_failure() {
        let first = FakeRepo::new("first", false);
        let broken = FakeRepo::new("broken", true);
        let last = FakeRepo::new("last", false);
        let repos = vec![
            first.clone() as Arc<dyn Repository>,
            broken.clone() as Arc<dyn Repository>,
            last.clone() as Arc<dyn Repository>,
        ];

        let failures = close_repositories(&repos);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].component, "broken");
        for repo in [&first, &broken, &last] {
            assert_eq!(repo.closes.load(Ordering::SeqCst), 1);
        }

        let message = RegistryError::Close(failures).to_string();
        assert!(message.contains("1 component(s) failed"));
        assert!(message.contains("broken"));
    }
}
