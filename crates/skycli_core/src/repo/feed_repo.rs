//! Feed repository over the `feeds` table.
//!
//! # Invariants
//! - Writes call `Feed::validate()` before SQL mutations.
//! - `params` round-trips as a JSON object.

use super::{
    bool_to_int, parse_uuid, RepoError, RepoResult, Repository, SqliteHandle, TableSpec,
};
use crate::db::{open_db, DbResult};
use crate::model::feed::{Feed, FeedId};
use crate::model::now_epoch_ms;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;

const FEED_SCHEMA: &[TableSpec] = &[(
    "feeds",
    &[
        "id",
        "created_at",
        "updated_at",
        "name",
        "source",
        "params",
        "is_local",
    ],
)];

const FEED_SELECT_SQL: &str = "SELECT
    id,
    created_at,
    updated_at,
    name,
    source,
    params,
    is_local
FROM feeds";

pub struct FeedRepository {
    handle: SqliteHandle,
}

impl FeedRepository {
    /// Opens a dedicated connection to the cache database at `path`.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        Ok(Self::new(open_db(path)?))
    }

    pub fn new(conn: Connection) -> Self {
        Self {
            handle: SqliteHandle::new("feed", conn),
        }
    }

    pub fn get(&self, id: FeedId) -> RepoResult<Option<Feed>> {
        self.handle.with_conn(|conn| {
            conn.query_row(
                &format!("{FEED_SELECT_SQL} WHERE id = ?1;"),
                [id.to_string()],
                |row| Ok(parse_feed_row(row)),
            )
            .optional()?
            .transpose()
        })
    }

    /// Lists every feed, newest first.
    pub fn list(&self) -> RepoResult<Vec<Feed>> {
        self.handle.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("{FEED_SELECT_SQL} ORDER BY created_at DESC, id ASC;"))?;
            let mut rows = stmt.query([])?;
            let mut feeds = Vec::new();
            while let Some(row) = rows.next()? {
                feeds.push(parse_feed_row(row)?);
            }
            Ok(feeds)
        })
    }

    /// Inserts or updates `feed` by id and bumps `updated_at`.
    pub fn save(&self, feed: &mut Feed) -> RepoResult<()> {
        feed.validate()?;
        let params_json = serde_json::to_string(&feed.params)
            .map_err(|err| RepoError::InvalidData(format!("feed params: {err}")))?;
        let updated_at = now_epoch_ms();

        self.handle.with_conn(|conn| {
            conn.execute(
                "INSERT INTO feeds (id, created_at, updated_at, name, source, params, is_local)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    updated_at = excluded.updated_at,
                    name = excluded.name,
                    source = excluded.source,
                    params = excluded.params,
                    is_local = excluded.is_local;",
                params![
                    feed.id.to_string(),
                    feed.created_at,
                    updated_at,
                    feed.name.as_str(),
                    feed.source.as_str(),
                    params_json,
                    bool_to_int(feed.is_local),
                ],
            )?;
            Ok(())
        })?;

        feed.updated_at = updated_at;
        Ok(())
    }

    /// Deletes a feed; its cached posts go with it via `ON DELETE CASCADE`.
    pub fn delete(&self, id: FeedId) -> RepoResult<()> {
        let changed = self.handle.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM feeds WHERE id = ?1;", [id.to_string()])?)
        })?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "feed",
                key: id.to_string(),
            });
        }
        Ok(())
    }
}

impl Repository for FeedRepository {
    fn name(&self) -> &'static str {
        "feed"
    }

    fn init(&self) -> RepoResult<()> {
        self.handle.require_schema(FEED_SCHEMA)
    }

    fn close(&self) -> RepoResult<()> {
        self.handle.close()
    }
}

fn parse_feed_row(row: &Row<'_>) -> RepoResult<Feed> {
    let id_text: String = row.get("id")?;
    let params_text: String = row.get("params")?;
    let params: BTreeMap<String, String> = serde_json::from_str(&params_text).map_err(|err| {
        RepoError::InvalidData(format!("invalid feeds.params for `{id_text}`: {err}"))
    })?;

    let is_local = match row.get::<_, i64>("is_local")? {
        0 => false,
        1 => true,
        other => {
            return Err(RepoError::InvalidData(format!(
                "invalid is_local value `{other}` in feeds.is_local"
            )));
        }
    };

    Ok(Feed {
        id: parse_uuid(&id_text, "feeds.id")?,
        name: row.get("name")?,
        source: row.get("source")?,
        params,
        is_local,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
