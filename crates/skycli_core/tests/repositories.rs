use rusqlite::Connection;
use skycli_core::db::{open_db_in_memory, run_migrations};
use skycli_core::repo::feed_repo::FeedRepository;
use skycli_core::repo::post_repo::PostRepository;
use skycli_core::repo::profile_repo::ProfileRepository;
use skycli_core::{Feed, Post, Profile, RepoError, Repository};
use std::time::Duration;

fn migrated_file(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("cache.db");
    let mut conn = skycli_core::db::open_db(&path).unwrap();
    run_migrations(&mut conn).unwrap();
    path
}

fn migrated_memory() -> Connection {
    let mut conn = open_db_in_memory().unwrap();
    run_migrations(&mut conn).unwrap();
    conn
}

#[test]
fn init_requires_migrated_schema() {
    let feeds = FeedRepository::new(open_db_in_memory().unwrap());
    assert!(matches!(
        feeds.init(),
        Err(RepoError::MissingRequiredTable("feeds"))
    ));

    let profiles = ProfileRepository::new(migrated_memory());
    profiles.init().unwrap();
    profiles.init().unwrap();
}

#[test]
fn feed_save_get_list_delete() {
    let repo = FeedRepository::new(migrated_memory());
    repo.init().unwrap();

    let mut older = Feed::new("Home", "timeline");
    older.created_at = 1_000;
    repo.save(&mut older).unwrap();
    let mut newer = Feed::new("Alice", "did:plc:alice").with_param("filter", "posts_no_replies");
    newer.created_at = 2_000;
    newer.is_local = true;
    repo.save(&mut newer).unwrap();

    let loaded = repo.get(newer.id).unwrap().unwrap();
    assert_eq!(loaded, newer);
    assert_eq!(loaded.params.get("filter").map(String::as_str), Some("posts_no_replies"));

    let names: Vec<String> = repo.list().unwrap().into_iter().map(|f| f.name).collect();
    assert_eq!(names, ["Alice", "Home"]);

    newer.name = "Alice (renamed)".to_string();
    repo.save(&mut newer).unwrap();
    assert_eq!(repo.get(newer.id).unwrap().unwrap().name, "Alice (renamed)");
    assert_eq!(repo.list().unwrap().len(), 2);

    repo.delete(older.id).unwrap();
    assert!(repo.get(older.id).unwrap().is_none());
    assert!(matches!(
        repo.delete(older.id),
        Err(RepoError::NotFound { entity: "feed", .. })
    ));
}

#[test]
fn feed_validation_runs_before_write() {
    let repo = FeedRepository::new(migrated_memory());
    let mut feed = Feed::new("   ", "timeline");
    assert!(matches!(repo.save(&mut feed), Err(RepoError::Validation(_))));
    assert!(repo.list().unwrap().is_empty());
}

#[test]
fn posts_upsert_by_uri_and_page_by_feed() {
    let dir = tempfile::tempdir().unwrap();
    let path = migrated_file(&dir);
    let feeds = FeedRepository::open(&path).unwrap();
    let posts = PostRepository::open(&path).unwrap();
    posts.init().unwrap();

    let mut feed = Feed::new("Home", "timeline");
    feeds.save(&mut feed).unwrap();

    let mut batch: Vec<Post> = (0..5)
        .map(|i| {
            Post::new(
                feed.id,
                format!("at://did:plc:a/app.bsky.feed.post/{i}"),
                "did:plc:a",
                format!("post {i}"),
                1_000 + i,
            )
        })
        .collect();
    posts.batch_save(&mut batch).unwrap();
    assert_eq!(posts.count_by_feed(feed.id).unwrap(), 5);

    let page = posts.query_by_feed(feed.id, 2, 1).unwrap();
    let texts: Vec<&str> = page.iter().map(|p| p.text.as_str()).collect();
    assert_eq!(texts, ["post 3", "post 2"]);

    let mut edited = Post::new(
        feed.id,
        "at://did:plc:a/app.bsky.feed.post/0",
        "did:plc:a",
        "edited",
        1_000,
    );
    posts.save(&mut edited).unwrap();
    assert_eq!(edited.id, batch[0].id);
    assert_eq!(posts.count_by_feed(feed.id).unwrap(), 5);
    assert_eq!(posts.get(batch[0].id).unwrap().unwrap().text, "edited");
    assert_eq!(posts.list().unwrap()[0].text, "post 4");
}

#[test]
fn refetched_post_takes_new_indexed_at_and_author() {
    let dir = tempfile::tempdir().unwrap();
    let path = migrated_file(&dir);
    let feeds = FeedRepository::open(&path).unwrap();
    let posts = PostRepository::open(&path).unwrap();
    let mut feed = Feed::new("Home", "timeline");
    feeds.save(&mut feed).unwrap();

    let uri = "at://did:plc:a/app.bsky.feed.post/old";
    let mut old = Post::new(feed.id, uri, "did:plc:a", "old", 1_000);
    let mut newer = Post::new(
        feed.id,
        "at://did:plc:b/app.bsky.feed.post/new",
        "did:plc:b",
        "newer",
        2_000,
    );
    posts.save(&mut old).unwrap();
    posts.save(&mut newer).unwrap();
    assert_eq!(posts.list().unwrap()[0].text, "newer");

    let mut refetched = Post::new(feed.id, uri, "did:plc:moved", "old", 3_000);
    posts.save(&mut refetched).unwrap();
    assert_eq!(refetched.id, old.id);

    let stored = posts.get_by_uri(uri).unwrap().unwrap();
    assert_eq!(stored.indexed_at, 3_000);
    assert_eq!(stored.author_did, "did:plc:moved");
    assert_eq!(posts.list().unwrap()[0].uri, uri);
    assert_eq!(posts.query_by_feed(feed.id, 1, 0).unwrap()[0].uri, uri);
}

#[test]
fn post_requires_existing_feed_and_batch_is_atomic() {
    let dir = tempfile::tempdir().unwrap();
    let path = migrated_file(&dir);
    let feeds = FeedRepository::open(&path).unwrap();
    let posts = PostRepository::open(&path).unwrap();

    let mut orphan = Post::new(uuid::Uuid::new_v4(), "at://x/1", "did:plc:x", "", 1);
    assert!(matches!(posts.save(&mut orphan), Err(RepoError::Db(_))));

    let mut feed = Feed::new("Home", "timeline");
    feeds.save(&mut feed).unwrap();
    let mut batch = vec![
        Post::new(feed.id, "at://x/2", "did:plc:x", "ok", 2),
        Post::new(uuid::Uuid::new_v4(), "at://x/3", "did:plc:x", "orphan", 3),
    ];
    assert!(posts.batch_save(&mut batch).is_err());
    assert_eq!(posts.count_by_feed(feed.id).unwrap(), 0);
}

#[test]
fn deleting_feed_cascades_to_posts() {
    let dir = tempfile::tempdir().unwrap();
    let path = migrated_file(&dir);
    let feeds = FeedRepository::open(&path).unwrap();
    let posts = PostRepository::open(&path).unwrap();

    let mut feed = Feed::new("Home", "timeline");
    feeds.save(&mut feed).unwrap();
    let mut post = Post::new(feed.id, "at://x/1", "did:plc:x", "hi", 1);
    posts.save(&mut post).unwrap();

    feeds.delete(feed.id).unwrap();
    assert!(posts.get(post.id).unwrap().is_none());
}

#[test]
fn profiles_upsert_by_did_and_expire() {
    let repo = ProfileRepository::new(migrated_memory());
    repo.init().unwrap();
    assert!(repo.get_by_did("did:plc:nobody").unwrap().is_none());

    let mut alice = Profile::new("did:plc:alice", "alice.test", r#"{"displayName":"Alice"}"#);
    repo.save(&mut alice).unwrap();
    assert!(alice.fetched_at > 0);
    assert!(repo
        .get_fresh_by_did("did:plc:alice", Duration::ZERO)
        .unwrap()
        .is_some());

    let mut renamed = Profile::new("did:plc:alice", "alice.new", "{}");
    repo.save(&mut renamed).unwrap();
    assert_eq!(renamed.id, alice.id);
    assert_eq!(repo.list().unwrap().len(), 1);
    assert_eq!(repo.get(alice.id).unwrap().unwrap().handle, "alice.new");

    let mut stale = Profile::new("did:plc:bob", "bob.test", "{}");
    stale.fetched_at = 1_000;
    repo.save(&mut stale).unwrap();
    assert_eq!(stale.fetched_at, 1_000);
    assert_eq!(repo.list().unwrap()[0].did, "did:plc:alice");

    let removed = repo
        .delete_stale(Duration::from_secs(60), renamed.fetched_at)
        .unwrap();
    assert_eq!(removed, 1);
    assert!(repo.get_by_did("did:plc:bob").unwrap().is_none());

    repo.delete_by_did("did:plc:alice").unwrap();
    assert!(matches!(
        repo.delete_by_did("did:plc:alice"),
        Err(RepoError::NotFound {
            entity: "profile",
            ..
        })
    ));
}

#[test]
fn closed_repository_rejects_calls() {
    let repo = PostRepository::new(migrated_memory());
    repo.close().unwrap();
    repo.close().unwrap();
    assert!(matches!(repo.list(), Err(RepoError::Closed("post"))));
}
