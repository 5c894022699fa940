//! Least-loaded backend selection with round-robin tie-breaking.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use pairgate_registry::{BackendStatus, ServerRegistry};
use tracing::debug;

use crate::error::SelectError;

/// The backend chosen for one request.
#[derive(Debug, Clone)]
pub struct SelectedBackend {
    pub id: String,
    pub url: String,
    /// The count the choice was based on.
    pub session_count: usize,
}

/// Chooses a backend for each pairing request.
///
/// The cursor is shared across all selections in the process; ties
/// resolve deterministically relative to the registry's fixed ordering.
pub struct Selector {
    registry: Arc<ServerRegistry>,
    cursor: AtomicUsize,
}

impl Selector {
    pub fn new(registry: Arc<ServerRegistry>) -> Self {
        Self {
            registry,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Current cursor value, for diagnostics.
    pub fn cursor_position(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Pick the least-loaded active backend.
    ///
    /// The cascade: enumerate active backends (classifying the global
    /// condition if there are none), gather current session counts in
    /// parallel (a failed count excludes that backend from this round
    /// without touching its health), drop backends at capacity, then
    /// take the minimum — ties go to the round-robin cursor.
    pub async fn select_optimal_backend(&self) -> Result<SelectedBackend, SelectError> {
        let active = self.registry.active_backends();
        if active.is_empty() {
            return Err(self.classify_no_active());
        }

        let max = self.registry.max_sessions();
        let counts = join_all(active.iter().map(|backend| {
            let registry = self.registry.clone();
            let id = backend.id.clone();
            async move { registry.session_count(&id).await }
        }))
        .await;

        // A count failure stands in as "infinitely loaded": the backend
        // cannot win this selection, and any health consequence was
        // already applied by the count path itself.
        let mut survivors: Vec<(usize, usize)> = Vec::with_capacity(active.len());
        for (pos, result) in counts.into_iter().enumerate() {
            match result {
                Ok(count) if count < max => survivors.push((pos, count)),
                Ok(count) => {
                    debug!(backend = %active[pos].id, count, max, "backend at capacity, skipped");
                }
                Err(e) => {
                    debug!(backend = %active[pos].id, error = %e, "session count unavailable, skipped");
                }
            }
        }

        if survivors.is_empty() {
            return Err(SelectError::AllFull { max });
        }

        let min = survivors.iter().map(|&(_, c)| c).min().expect("non-empty survivors");
        let ties: Vec<usize> = survivors
            .iter()
            .filter(|&&(_, c)| c == min)
            .map(|&(pos, _)| pos)
            .collect();

        let pos = if ties.len() == 1 {
            ties[0]
        } else {
            let turn = self.cursor.fetch_add(1, Ordering::Relaxed);
            ties[turn % ties.len()]
        };

        let chosen = &active[pos];
        debug!(backend = %chosen.id, session_count = min, ties = ties.len(), "backend selected");
        Ok(SelectedBackend {
            id: chosen.id.clone(),
            url: chosen.url.clone(),
            session_count: min,
        })
    }

    /// Classify the fleet-wide condition when nothing is active.
    fn classify_no_active(&self) -> SelectError {
        let all = self.registry.all_backends();
        let max = self.registry.max_sessions();
        if !all.is_empty() && all.iter().all(|b| b.status == BackendStatus::Full) {
            SelectError::AllFull { max }
        } else if !all.is_empty() && all.iter().all(|b| b.status == BackendStatus::Unhealthy) {
            SelectError::AllUnavailable
        } else {
            SelectError::NoActiveServers
        }
    }
}
