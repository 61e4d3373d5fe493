//! Profile cache repository over the `profiles` table.
//!
//! # Invariants
//! - One row per `did`; saving a known DID updates that row in place.
//! - Saving with `fetched_at == 0` stamps the current time.
//! - A zero TTL passed to staleness helpers means the one-hour default.

use super::{parse_uuid, RepoError, RepoResult, Repository, SqliteHandle, TableSpec};
use crate::db::{open_db, DbResult};
use crate::model::now_epoch_ms;
use crate::model::profile::{effective_ttl, Profile, ProfileId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;

const PROFILE_SCHEMA: &[TableSpec] = &[(
    "profiles",
    &[
        "id",
        "created_at",
        "updated_at",
        "did",
        "handle",
        "data_json",
        "fetched_at",
    ],
)];

const PROFILE_SELECT_SQL: &str = "SELECT
    id,
    created_at,
    updated_at,
    did,
    handle,
    data_json,
    fetched_at
FROM profiles";

pub struct ProfileRepository {
    handle: SqliteHandle,
}

impl ProfileRepository {
    /// Opens a dedicated connection to the cache database at `path`.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        Ok(Self::new(open_db(path)?))
    }

    pub fn new(conn: Connection) -> Self {
        Self {
            handle: SqliteHandle::new("profile", conn),
        }
    }

    pub fn get(&self, id: ProfileId) -> RepoResult<Option<Profile>> {
        self.handle.with_conn(|conn| {
            conn.query_row(
                &format!("{PROFILE_SELECT_SQL} WHERE id = ?1;"),
                [id.to_string()],
                |row| Ok(parse_profile_row(row)),
            )
            .optional()?
            .transpose()
        })
    }

    /// Looks a profile up by DID; `None` when it was never cached.
    pub fn get_by_did(&self, did: &str) -> RepoResult<Option<Profile>> {
        self.handle.with_conn(|conn| {
            conn.query_row(
                &format!("{PROFILE_SELECT_SQL} WHERE did = ?1;"),
                [did],
                |row| Ok(parse_profile_row(row)),
            )
            .optional()?
            .transpose()
        })
    }

    /// Returns the cached profile only while it is younger than `ttl`.
    pub fn get_fresh_by_did(&self, did: &str, ttl: Duration) -> RepoResult<Option<Profile>> {
        let now = now_epoch_ms();
        Ok(self
            .get_by_did(did)?
            .filter(|profile| profile.is_fresh(ttl, now)))
    }

    /// Lists cached profiles, most recently fetched first.
    pub fn list(&self) -> RepoResult<Vec<Profile>> {
        self.handle.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{PROFILE_SELECT_SQL} ORDER BY fetched_at DESC, id ASC;"
            ))?;
            let mut rows = stmt.query([])?;
            let mut profiles = Vec::new();
            while let Some(row) = rows.next()? {
                profiles.push(parse_profile_row(row)?);
            }
            Ok(profiles)
        })
    }

    /// Upserts `profile` by DID and adopts the stored row identity.
    pub fn save(&self, profile: &mut Profile) -> RepoResult<()> {
        profile.validate()?;
        let now = now_epoch_ms();
        if profile.fetched_at == 0 {
            profile.fetched_at = now;
        }

        let (stored_id, stored_created_at): (String, i64) = self.handle.with_conn(|conn| {
            Ok(conn.query_row(
                "INSERT INTO profiles (id, created_at, updated_at, did, handle, data_json, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(did) DO UPDATE SET
                    updated_at = excluded.updated_at,
                    handle = excluded.handle,
                    data_json = excluded.data_json,
                    fetched_at = excluded.fetched_at
                 RETURNING id, created_at;",
                params![
                    profile.id.to_string(),
                    profile.created_at,
                    now,
                    profile.did.as_str(),
                    profile.handle.as_str(),
                    profile.data_json.as_str(),
                    profile.fetched_at,
                ],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?)
        })?;

        profile.id = parse_uuid(&stored_id, "profiles.id")?;
        profile.created_at = stored_created_at;
        profile.updated_at = now;
        Ok(())
    }

    pub fn delete(&self, id: ProfileId) -> RepoResult<()> {
        let changed = self.handle.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM profiles WHERE id = ?1;", [id.to_string()])?)
        })?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "profile",
                key: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn delete_by_did(&self, did: &str) -> RepoResult<()> {
        let changed = self.handle.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM profiles WHERE did = ?1;", [did])?)
        })?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "profile",
                key: did.to_string(),
            });
        }
        Ok(())
    }

    /// Deletes profiles fetched at or before `now_ms - ttl`. Returns the count.
    pub fn delete_stale(&self, ttl: Duration, now_ms: i64) -> RepoResult<usize> {
        let ttl_ms = i64::try_from(effective_ttl(ttl).as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_ms.saturating_sub(ttl_ms);
        self.handle.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM profiles WHERE fetched_at <= ?1;",
                [cutoff],
            )?)
        })
    }
}

impl Repository for ProfileRepository {
    fn name(&self) -> &'static str {
        "profile"
    }

    fn init(&self) -> RepoResult<()> {
        self.handle.require_schema(PROFILE_SCHEMA)
    }

    fn close(&self) -> RepoResult<()> {
        self.handle.close()
    }
}

fn parse_profile_row(row: &Row<'_>) -> RepoResult<Profile> {
    let id_text: String = row.get("id")?;
    Ok(Profile {
        id: parse_uuid(&id_text, "profiles.id")?,
        did: row.get("did")?,
        handle: row.get("handle")?,
        data_json: row.get("data_json")?,
        fetched_at: row.get("fetched_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
