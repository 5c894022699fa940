//! The session index — an advisory `sessionId → backendId` map.
//!
//! Entries are routing hints, not ground truth: they are inserted on
//! pairing success and probe discovery, removed on delete success or an
//! observed backend 404, and may be overwritten by later probes.
//! Mutations are point operations with last-writer-wins semantics.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;
use tracing::debug;

/// Serializable summary of the index for the health surface.
#[derive(Debug, Clone, Serialize)]
pub struct IndexInfo {
    pub size: usize,
    pub entries: HashMap<String, String>,
}

/// Concurrent session → backend hint map.
#[derive(Debug, Default)]
pub struct SessionIndex {
    entries: RwLock<HashMap<String, String>>,
}

impl SessionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the hint for a session.
    pub fn insert(&self, session_id: &str, backend_id: &str) {
        let mut entries = self.entries.write().expect("session index lock");
        let previous = entries.insert(session_id.to_string(), backend_id.to_string());
        if previous.as_deref() != Some(backend_id) {
            debug!(session_id, backend_id, "session index updated");
        }
    }

    /// Resolve the hint for a session, if any.
    pub fn lookup(&self, session_id: &str) -> Option<String> {
        self.entries
            .read()
            .expect("session index lock")
            .get(session_id)
            .cloned()
    }

    /// Drop the hint for a session; returns whether one existed.
    pub fn remove(&self, session_id: &str) -> bool {
        let removed = self
            .entries
            .write()
            .expect("session index lock")
            .remove(session_id)
            .is_some();
        if removed {
            debug!(session_id, "session index entry removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("session index lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full copy of the mapping, for diagnostics.
    pub fn info(&self) -> IndexInfo {
        let entries = self.entries.read().expect("session index lock").clone();
        IndexInfo {
            size: entries.len(),
            entries,
        }
    }
}
