//! Domain records cached in the local store.
//!
//! # Responsibility
//! - Define the feed/post/profile rows and the in-memory session record.
//! - Provide validation shared by every repository write path.
//!
//! # Invariants
//! - Timestamps are Unix epoch milliseconds.
//! - Identifiers are UUID v4 generated at construction time.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod feed;
pub mod post;
pub mod profile;
pub mod session;

/// Field-level validation failure for a domain record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub record: &'static str,
    pub field: &'static str,
    pub message: &'static str,
}

impl ValidationError {
    pub(crate) fn new(record: &'static str, field: &'static str, message: &'static str) -> Self {
        Self {
            record,
            field,
            message,
        }
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}.{}: {}", self.record, self.field, self.message)
    }
}

impl Error for ValidationError {}

/// Current wall-clock time in epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

pub(crate) fn require_non_blank(
    record: &'static str,
    field: &'static str,
    value: &str,
) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(record, field, "must not be blank"));
    }
    Ok(())
}
