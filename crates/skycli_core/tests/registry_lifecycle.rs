use skycli_core::config::{ConfigPaths, KeyMaterial, TokenCipher};
use skycli_core::db::{migrate_to, open_db};
use skycli_core::repo::session_repo::SessionRepository;
use skycli_core::service::{ServiceError, ServiceResult};
use skycli_core::{
    BootstrapError, Registry, RegistryConfig, RegistryError, RemoteSession, RepoError,
    SessionRecord, SessionService,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn cipher() -> TokenCipher {
    TokenCipher::new(&KeyMaterial::Secret("registry-tests".to_string()))
}

fn registry_at(paths: &ConfigPaths) -> Registry {
    Registry::new(RegistryConfig::new(paths.clone(), cipher()))
}

/// Service whose close always fails.
struct FailingService;

impl SessionService for FailingService {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn base_url(&self) -> &str {
        ""
    }

    fn is_authenticated(&self) -> bool {
        false
    }

    fn set_tokens(&self, _access_token: &str, _refresh_token: &str) -> ServiceResult<()> {
        Ok(())
    }

    fn access_token(&self) -> Option<String> {
        None
    }

    fn refresh_token(&self) -> Option<String> {
        None
    }

    fn token_expiry(&self) -> Option<i64> {
        None
    }

    fn needs_refresh(&self, _now_ms: i64) -> bool {
        false
    }

    fn close(&self) -> ServiceResult<()> {
        Err(ServiceError::Close("boom".to_string()))
    }
}

fn store_session(paths: &ConfigPaths, cipher: TokenCipher) {
    SessionRepository::open(paths.clone(), cipher)
        .unwrap()
        .save_session(&SessionRecord {
            did: "did:plc:alice".to_string(),
            handle: "alice.test".to_string(),
            service_url: "https://pds.example".to_string(),
            email: None,
            access_token: "access-1".to_string(),
            refresh_token: "refresh-1".to_string(),
        })
        .unwrap();
}

#[test]
fn accessors_fail_before_init() {
    let root = tempfile::tempdir().unwrap();
    let registry = registry_at(&ConfigPaths::at(root.path()));

    assert!(!registry.is_initialized());
    assert!(matches!(
        registry.feed_repo(),
        Err(RegistryError::NotInitialized("feed_repo"))
    ));
    assert!(matches!(
        registry.service(),
        Err(RegistryError::NotInitialized("service"))
    ));
}

#[test]
fn second_init_returns_same_instances() {
    let root = tempfile::tempdir().unwrap();
    let registry = registry_at(&ConfigPaths::at(root.path().join("cfg")));

    registry.init().unwrap();
    let feed = registry.feed_repo().unwrap();
    let session = registry.session_repo().unwrap();
    registry.init().unwrap();

    assert!(registry.is_initialized());
    assert!(Arc::ptr_eq(&feed, &registry.feed_repo().unwrap()));
    assert!(Arc::ptr_eq(&session, &registry.session_repo().unwrap()));
    assert!(!registry.service().unwrap().is_authenticated());
}

#[test]
fn close_resets_and_releases_handles() {
    let root = tempfile::tempdir().unwrap();
    let registry = registry_at(&ConfigPaths::at(root.path()));
    registry.init().unwrap();
    let posts = registry.post_repo().unwrap();

    registry.close().unwrap();
    assert!(!registry.is_initialized());
    assert!(matches!(
        registry.post_repo(),
        Err(RegistryError::NotInitialized(_))
    ));
    assert!(matches!(posts.list(), Err(RepoError::Closed("post"))));

    registry.init().unwrap();
    assert!(!Arc::ptr_eq(&posts, &registry.post_repo().unwrap()));
    registry.close().unwrap();
}

#[test]
fn stored_session_primes_service() {
    let root = tempfile::tempdir().unwrap();
    let paths = ConfigPaths::at(root.path());
    store_session(&paths, cipher());

    let seen_urls = Arc::new(Mutex::new(Vec::new()));
    let built = Arc::new(AtomicUsize::new(0));
    let config = {
        let seen_urls = Arc::clone(&seen_urls);
        let built = Arc::clone(&built);
        RegistryConfig::new(paths.clone(), cipher()).with_service_factory(move |url: &str| {
            seen_urls.lock().unwrap().push(url.to_string());
            built.fetch_add(1, Ordering::SeqCst);
            Arc::new(RemoteSession::new(url)) as Arc<dyn SessionService>
        })
    };
    let registry = Registry::new(config);
    registry.init().unwrap();
    registry.init().unwrap();

    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert_eq!(*seen_urls.lock().unwrap(), ["https://pds.example"]);
    let service = registry.service().unwrap();
    assert!(service.is_authenticated());
    assert_eq!(service.access_token().as_deref(), Some("access-1"));
    assert_eq!(service.refresh_token().as_deref(), Some("refresh-1"));

    registry.close().unwrap();
    assert!(!service.is_authenticated());
}

#[test]
fn undecryptable_session_is_not_fatal() {
    let root = tempfile::tempdir().unwrap();
    let paths = ConfigPaths::at(root.path());
    store_session(
        &paths,
        TokenCipher::new(&KeyMaterial::Secret("another-key".to_string())),
    );

    let registry = registry_at(&paths);
    registry.init().unwrap();
    assert!(registry.session_repo().unwrap().has_valid_session());
    assert!(!registry.service().unwrap().is_authenticated());
}

#[test]
fn pending_migrations_block_init() {
    let root = tempfile::tempdir().unwrap();
    let paths = ConfigPaths::at(root.path());
    let mut conn = open_db(paths.cache_db_path()).unwrap();
    migrate_to(&mut conn, 2).unwrap();
    drop(conn);

    let registry = registry_at(&paths);
    let err = registry.init().unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Bootstrap(BootstrapError::PendingMigrations { pending: 1, .. })
    ));
    assert!(err.to_string().contains("skycli setup"));
    assert!(!registry.is_initialized());
}

#[test]
fn init_failure_names_the_repository() {
    let root = tempfile::tempdir().unwrap();
    let paths = ConfigPaths::at(root.path());
    let conn = open_db(paths.cache_db_path()).unwrap();
    // History claims every version while the tables are missing.
    conn.execute_batch(
        "CREATE TABLE schema_migrations (
            version INTEGER PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        );
        INSERT INTO schema_migrations VALUES (1, '001_create_feeds', 0);
        INSERT INTO schema_migrations VALUES (2, '002_create_posts', 0);
        INSERT INTO schema_migrations VALUES (3, '003_create_profiles', 0);",
    )
    .unwrap();
    drop(conn);

    let registry = registry_at(&paths);
    match registry.init().unwrap_err() {
        RegistryError::Component { component, source } => {
            assert_eq!(component, "feed");
            assert!(matches!(source, RepoError::MissingRequiredTable("feeds")));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!registry.is_initialized());
}

#[test]
fn failing_component_close_still_closes_the_rest() {
    let root = tempfile::tempdir().unwrap();
    let config = RegistryConfig::new(ConfigPaths::at(root.path()), cipher())
        .with_service_factory(|_url: &str| Arc::new(FailingService) as Arc<dyn SessionService>);
    let registry = Registry::new(config);
    registry.init().unwrap();
    let feed = registry.feed_repo().unwrap();

    match registry.close().unwrap_err() {
        RegistryError::Close(failures) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].component, "failing");
            assert!(failures[0].error.to_string().contains("boom"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!registry.is_initialized());
    assert!(matches!(feed.list(), Err(RepoError::Closed("feed"))));
    assert!(matches!(
        registry.service(),
        Err(RegistryError::NotInitialized("service"))
    ));
}

#[test]
fn global_registry_is_a_single_instance() {
    let (Ok(first), Ok(second)) = (Registry::global(), Registry::global()) else {
        // No resolvable home directory in this environment.
        return;
    };

    assert!(std::ptr::eq(first, second));
    assert_eq!(first.config().paths(), second.config().paths());
    assert!(first
        .config()
        .paths()
        .cache_db_path()
        .starts_with(first.config().paths().config_dir()));
    assert!(!first.is_initialized());
}
