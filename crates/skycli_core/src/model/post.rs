//! Cached post, always attached to exactly one feed.

use super::feed::FeedId;
use super::{now_epoch_ms, require_non_blank, ValidationError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PostId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    /// Remote `at://` URI; unique across the cache.
    pub uri: String,
    pub author_did: String,
    pub text: String,
    pub feed_id: FeedId,
    /// When the remote service indexed the post, epoch milliseconds.
    pub indexed_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Post {
    pub fn new(
        feed_id: FeedId,
        uri: impl Into<String>,
        author_did: impl Into<String>,
        text: impl Into<String>,
        indexed_at: i64,
    ) -> Self {
        let now = now_epoch_ms();
        Self {
            id: Uuid::new_v4(),
            uri: uri.into(),
            author_did: author_did.into(),
            text: text.into(),
            feed_id,
            indexed_at,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_blank("post", "uri", &self.uri)?;
        require_non_blank("post", "author_did", &self.author_did)
    }
}
