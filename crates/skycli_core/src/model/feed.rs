//! Feed record: a named local or remote timeline definition.

use super::{now_epoch_ms, require_non_blank, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub type FeedId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub id: FeedId,
    pub name: String,
    /// Source selector, e.g. `timeline` or an author DID.
    pub source: String,
    /// Free-form query parameters, persisted as a JSON object.
    pub params: BTreeMap<String, String>,
    pub is_local: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Feed {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        let now = now_epoch_ms();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            source: source.into(),
            params: BTreeMap::new(),
            is_local: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_blank("feed", "name", &self.name)?;
        require_non_blank("feed", "source", &self.source)
    }
}
