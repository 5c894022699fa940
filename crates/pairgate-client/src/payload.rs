//! Upstream payload shapes and normalizing accessors.
//!
//! Backends are loose about field names: a session carries its id in
//! `id` or `sessionId`, and a pairing response keys the new session on
//! `sessionId` or `cleanNumber`. Each shape is modeled with optional
//! fields plus an accessor that picks the first present one; entries
//! with neither field are rejected by the caller.

use serde::Deserialize;

/// Body of `GET <backend>/sessions`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionListing {
    #[serde(default)]
    pub sessions: Vec<SessionEntry>,
}

impl SessionListing {
    /// Normalized session ids, skipping entries that carry neither
    /// identifier field.
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions
            .iter()
            .filter_map(|s| s.session_id().map(str::to_string))
            .collect()
    }
}

/// One session as reported by a backend.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
}

impl SessionEntry {
    /// The session identifier, whichever field the backend used.
    pub fn session_id(&self) -> Option<&str> {
        self.id.as_deref().or(self.session_id.as_deref())
    }
}

/// Body of a successful pairing response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PairOutcome {
    #[serde(default)]
    pub ok: bool,
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default, rename = "cleanNumber")]
    pub clean_number: Option<String>,
}

impl PairOutcome {
    /// The key under which the new session should be indexed, whichever
    /// field the backend used.
    pub fn session_key(&self) -> Option<&str> {
        self.session_id.as_deref().or(self.clean_number.as_deref())
    }
}
