//! Decrypted session view handed to command logic.
//!
//! Plaintext tokens only live in this in-memory record; the persisted form
//! is `config::SessionConfig`.

use std::fmt::{Debug, Formatter};

#[derive(Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub did: String,
    pub handle: String,
    pub service_url: String,
    pub email: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
}

impl Debug for SessionRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("did", &self.did)
            .field("handle", &self.handle)
            .field("service_url", &self.service_url)
            .field("email", &self.email)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}
