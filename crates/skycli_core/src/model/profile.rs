//! Cached actor profile with TTL-based freshness.
//!
//! # Invariants
//! - `did` is the lookup key; one row per DID.
//! - A zero TTL means [`DEFAULT_PROFILE_TTL`].

use super::{now_epoch_ms, require_non_blank, ValidationError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub type ProfileId = Uuid;

pub const DEFAULT_PROFILE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub did: String,
    pub handle: String,
    /// Full remote profile payload, kept opaque.
    pub data_json: String,
    /// When the payload was fetched, epoch milliseconds. `0` means unset.
    pub fetched_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Profile {
    pub fn new(
        did: impl Into<String>,
        handle: impl Into<String>,
        data_json: impl Into<String>,
    ) -> Self {
        let now = now_epoch_ms();
        Self {
            id: Uuid::new_v4(),
            did: did.into(),
            handle: handle.into(),
            data_json: data_json.into(),
            fetched_at: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns whether the cached payload is younger than `ttl` at `now_ms`.
    pub fn is_fresh(&self, ttl: Duration, now_ms: i64) -> bool {
        let ttl_ms = i64::try_from(effective_ttl(ttl).as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_sub(self.fetched_at) < ttl_ms
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_blank("profile", "did", &self.did)?;
        require_non_blank("profile", "handle", &self.handle)
    }
}

pub(crate) fn effective_ttl(ttl: Duration) -> Duration {
    if ttl.is_zero() {
        DEFAULT_PROFILE_TTL
    } else {
        ttl
    }
}
