//! Post repository over the `posts` table.
//!
//! # Invariants
//! - `uri` is the natural key: saving an existing URI updates that row and
//!   adopts its stored `id`/`created_at`.
//! - `feed_id` must reference an existing feed (foreign key).
//! - Batch writes are all-or-nothing.

use super::{parse_uuid, to_sql_count, RepoError, RepoResult, Repository, SqliteHandle, TableSpec};
use crate::db::{open_db, DbResult};
use crate::model::feed::FeedId;
use crate::model::now_epoch_ms;
use crate::model::post::{Post, PostId};
use rusqlite::{params, Connection, OptionalExtension, Row, Statement};
use std::path::Path;

const POST_SCHEMA: &[TableSpec] = &[(
    "posts",
    &[
        "id",
        "created_at",
        "updated_at",
        "uri",
        "author_did",
        "text",
        "feed_id",
        "indexed_at",
    ],
)];

const POST_SELECT_SQL: &str = "SELECT
    id,
    created_at,
    updated_at,
    uri,
    author_did,
    text,
    feed_id,
    indexed_at
FROM posts";

const POST_UPSERT_SQL: &str =
    "INSERT INTO posts (id, created_at, updated_at, uri, author_did, text, feed_id, indexed_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
     ON CONFLICT(uri) DO UPDATE SET
        updated_at = excluded.updated_at,
        author_did = excluded.author_did,
        text = excluded.text,
        feed_id = excluded.feed_id,
        indexed_at = excluded.indexed_at
     RETURNING id, created_at;";

pub struct PostRepository {
    handle: SqliteHandle,
}

impl PostRepository {
    /// Opens a dedicated connection to the cache database at `path`.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        Ok(Self::new(open_db(path)?))
    }

    pub fn new(conn: Connection) -> Self {
        Self {
            handle: SqliteHandle::new("post", conn),
        }
    }

    pub fn get(&self, id: PostId) -> RepoResult<Option<Post>> {
        self.handle.with_conn(|conn| {
            conn.query_row(
                &format!("{POST_SELECT_SQL} WHERE id = ?1;"),
                [id.to_string()],
                |row| Ok(parse_post_row(row)),
            )
            .optional()?
            .transpose()
        })
    }

    pub fn get_by_uri(&self, uri: &str) -> RepoResult<Option<Post>> {
        self.handle.with_conn(|conn| {
            conn.query_row(
                &format!("{POST_SELECT_SQL} WHERE uri = ?1;"),
                [uri],
                |row| Ok(parse_post_row(row)),
            )
            .optional()?
            .transpose()
        })
    }

    /// Lists every cached post, most recently indexed first.
    pub fn list(&self) -> RepoResult<Vec<Post>> {
        self.handle.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{POST_SELECT_SQL} ORDER BY indexed_at DESC, id ASC;"
            ))?;
            collect_posts(&mut stmt, [])
        })
    }

    /// Upserts one post by `uri`.
    pub fn save(&self, post: &mut Post) -> RepoResult<()> {
        post.validate()?;
        let now = now_epoch_ms();
        self.handle.with_conn(|conn| {
            let mut stmt = conn.prepare(POST_UPSERT_SQL)?;
            upsert_with(&mut stmt, post, now)
        })
    }

    /// Upserts many posts inside one transaction.
    pub fn batch_save(&self, posts: &mut [Post]) -> RepoResult<()> {
        if posts.is_empty() {
            return Ok(());
        }
        for post in posts.iter() {
            post.validate()?;
        }

        let now = now_epoch_ms();
        self.handle.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(POST_UPSERT_SQL)?;
                for post in posts.iter_mut() {
                    upsert_with(&mut stmt, post, now)?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Pages through one feed's posts, most recently indexed first.
    pub fn query_by_feed(&self, feed_id: FeedId, limit: u32, offset: u32) -> RepoResult<Vec<Post>> {
        self.handle.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{POST_SELECT_SQL}
                 WHERE feed_id = ?1
                 ORDER BY indexed_at DESC, id ASC
                 LIMIT ?2 OFFSET ?3;"
            ))?;
            collect_posts(
                &mut stmt,
                params![feed_id.to_string(), to_sql_count(limit), to_sql_count(offset)],
            )
        })
    }

    pub fn count_by_feed(&self, feed_id: FeedId) -> RepoResult<u64> {
        self.handle.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM posts WHERE feed_id = ?1;",
                [feed_id.to_string()],
                |row| row.get(0),
            )?;
            u64::try_from(count)
                .map_err(|_| RepoError::InvalidData(format!("negative post count `{count}`")))
        })
    }

    pub fn delete(&self, id: PostId) -> RepoResult<()> {
        let changed = self.handle.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM posts WHERE id = ?1;", [id.to_string()])?)
        })?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "post",
                key: id.to_string(),
            });
        }
        Ok(())
    }
}

impl Repository for PostRepository {
    fn name(&self) -> &'static str {
        "post"
    }

    fn init(&self) -> RepoResult<()> {
        self.handle.require_schema(POST_SCHEMA)
    }

    fn close(&self) -> RepoResult<()> {
        self.handle.close()
    }
}

fn upsert_with(stmt: &mut Statement<'_>, post: &mut Post, now: i64) -> RepoResult<()> {
    let (stored_id, stored_created_at): (String, i64) = stmt.query_row(
        params![
            post.id.to_string(),
            post.created_at,
            now,
            post.uri.as_str(),
            post.author_did.as_str(),
            post.text.as_str(),
            post.feed_id.to_string(),
            post.indexed_at,
        ],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    post.id = parse_uuid(&stored_id, "posts.id")?;
    post.created_at = stored_created_at;
    post.updated_at = now;
    Ok(())
}

fn collect_posts(stmt: &mut Statement<'_>, params: impl rusqlite::Params) -> RepoResult<Vec<Post>> {
    let mut rows = stmt.query(params)?;
    let mut posts = Vec::new();
    while let Some(row) = rows.next()? {
        posts.push(parse_post_row(row)?);
    }
    Ok(posts)
}

fn parse_post_row(row: &Row<'_>) -> RepoResult<Post> {
    let id_text: String = row.get("id")?;
    let feed_text: String = row.get("feed_id")?;
    Ok(Post {
        id: parse_uuid(&id_text, "posts.id")?,
        uri: row.get("uri")?,
        author_did: row.get("author_did")?,
        text: row.get("text")?,
        feed_id: parse_uuid(&feed_text, "posts.feed_id")?,
        indexed_at: row.get("indexed_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
