//! The server registry — authoritative in-memory record of the fleet.
//!
//! Backends are created once from configuration and never destroyed;
//! ids are positional (`server-1..N`) and that ordering also anchors
//! round-robin fairness in the balancer. Each backend's mutable state
//! sits behind its own lock; probe I/O happens with no lock held.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use pairgate_client::{FetchError, UpstreamClient};
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, TtlCache};
use crate::error::{RegistryError, RegistryResult};
use crate::index::{IndexInfo, SessionIndex};
use crate::types::{
    now_ms, BackendCounters, BackendSnapshot, BackendStatus, DeleteOutcome, FleetTotals,
    SessionLocation, StatusPatch,
};

/// Mutable per-backend record. Mutated only under the backend's lock.
struct BackendState {
    status: BackendStatus,
    session_count: usize,
    sessions: HashSet<String>,
    last_checked: Option<u64>,
    response_time_ms: u64,
    last_error: Option<String>,
    health_checks: u64,
    failures: u64,
    deleted_sessions: u64,
}

/// One configured backend: immutable identity plus locked state.
struct Backend {
    id: String,
    url: String,
    /// Whether `/pair/<n>` paths get the upstream's trailing slash.
    pair_trailing_slash: bool,
    created_at: u64,
    state: RwLock<BackendState>,
}

impl Backend {
    fn new(id: String, url: String) -> Self {
        Self {
            id,
            url,
            pair_trailing_slash: true,
            created_at: now_ms(),
            // Assume healthy until a probe says otherwise.
            state: RwLock::new(BackendState {
                status: BackendStatus::Healthy,
                session_count: 0,
                sessions: HashSet::new(),
                last_checked: None,
                response_time_ms: 0,
                last_error: None,
                health_checks: 0,
                failures: 0,
                deleted_sessions: 0,
            }),
        }
    }

    fn snapshot(&self) -> BackendSnapshot {
        let state = self.state.read().expect("backend lock");
        let mut sessions: Vec<String> = state.sessions.iter().cloned().collect();
        sessions.sort();
        BackendSnapshot {
            id: self.id.clone(),
            url: self.url.clone(),
            status: state.status,
            is_active: state.status.is_active(),
            session_count: state.session_count,
            sessions,
            last_checked: state.last_checked,
            response_time_ms: state.response_time_ms,
            last_error: state.last_error.clone(),
            counters: BackendCounters {
                health_checks: state.health_checks,
                failures: state.failures,
                deleted_sessions: state.deleted_sessions,
                created_at: self.created_at,
            },
        }
    }
}

/// The fleet registry plus session index and count cache.
pub struct ServerRegistry {
    backends: Vec<Arc<Backend>>,
    by_id: HashMap<String, usize>,
    index: SessionIndex,
    counts: TtlCache<usize>,
    client: UpstreamClient,
    max_sessions: usize,
}

impl ServerRegistry {
    /// Build the registry from canonicalized backend URLs.
    ///
    /// Ids are assigned positionally: `server-1`, `server-2`, …
    pub fn new(
        urls: &[String],
        client: UpstreamClient,
        max_sessions: usize,
        count_cache_ttl: Duration,
    ) -> Self {
        let backends: Vec<Arc<Backend>> = urls
            .iter()
            .enumerate()
            .map(|(i, url)| Arc::new(Backend::new(format!("server-{}", i + 1), url.clone())))
            .collect();
        let by_id = backends
            .iter()
            .enumerate()
            .map(|(i, b)| (b.id.clone(), i))
            .collect();

        info!(backends = backends.len(), max_sessions, "server registry initialized");

        Self {
            backends,
            by_id,
            index: SessionIndex::new(),
            counts: TtlCache::new(count_cache_ttl),
            client,
            max_sessions,
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    // ── Read surface ───────────────────────────────────────────────

    /// Snapshots of every backend, in configured order.
    pub fn all_backends(&self) -> Vec<BackendSnapshot> {
        self.backends.iter().map(|b| b.snapshot()).collect()
    }

    /// Snapshots of backends eligible for new traffic, in configured
    /// order.
    pub fn active_backends(&self) -> Vec<BackendSnapshot> {
        self.backends
            .iter()
            .map(|b| b.snapshot())
            .filter(|s| s.is_active)
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<BackendSnapshot> {
        self.by_id.get(id).map(|&i| self.backends[i].snapshot())
    }

    pub fn backend_ids(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.id.clone()).collect()
    }

    /// Whether `/pair` forwarding to this backend appends the trailing
    /// slash the upstream expects.
    pub fn pair_trailing_slash(&self, id: &str) -> bool {
        self.by_id
            .get(id)
            .map(|&i| self.backends[i].pair_trailing_slash)
            .unwrap_or(true)
    }

    fn url_of(&self, id: &str) -> RegistryResult<String> {
        self.by_id
            .get(id)
            .map(|&i| self.backends[i].url.clone())
            .ok_or_else(|| RegistryError::UnknownBackend(id.to_string()))
    }

    // ── Status updates ─────────────────────────────────────────────

    /// Apply a status transition plus optional state patch.
    ///
    /// Always bumps `health_checks` and `last_checked`; bumps `failures`
    /// only on a transition into `Unhealthy`. The backend's cached
    /// session count is invalidated unconditionally, even for
    /// status-preserving updates.
    pub fn update_status(
        &self,
        id: &str,
        status: BackendStatus,
        patch: StatusPatch,
    ) -> RegistryResult<BackendSnapshot> {
        let backend = self
            .by_id
            .get(id)
            .map(|&i| &self.backends[i])
            .ok_or_else(|| RegistryError::UnknownBackend(id.to_string()))?;

        let previous = {
            let mut state = backend.state.write().expect("backend lock");
            let previous = state.status;
            state.last_checked = Some(now_ms());
            state.health_checks += 1;
            if status == BackendStatus::Unhealthy && previous != BackendStatus::Unhealthy {
                state.failures += 1;
            }
            state.status = status;

            if let Some(count) = patch.session_count {
                state.session_count = count;
            }
            if let Some(sessions) = patch.sessions {
                state.sessions = sessions.into_iter().collect();
            }
            if let Some(rt) = patch.response_time_ms {
                state.response_time_ms = rt;
            }
            match patch.error {
                Some(message) => state.last_error = Some(message),
                None if status != BackendStatus::Unhealthy => state.last_error = None,
                None => {}
            }
            previous
        };

        self.counts.remove(&count_cache_key(id));

        if previous != status {
            match status {
                BackendStatus::Unhealthy => warn!(backend = id, from = ?previous, "backend marked unhealthy"),
                _ => info!(backend = id, from = ?previous, to = ?status, "backend status changed"),
            }
        }

        Ok(backend.snapshot())
    }

    /// Operator override: force a backend back to `Healthy`.
    pub fn reset_to_healthy(&self, id: &str) -> RegistryResult<BackendSnapshot> {
        self.update_status(id, BackendStatus::Healthy, StatusPatch::default())
    }

    // ── Session inventory ──────────────────────────────────────────

    /// Current session count for a backend — the selection hot path.
    ///
    /// Serves the cached count when fresh; otherwise probes the
    /// backend's session listing and refreshes everything it touches.
    pub async fn session_count(&self, id: &str) -> RegistryResult<usize> {
        if let Some(count) = self.counts.get(&count_cache_key(id)) {
            return Ok(count);
        }
        self.refresh_sessions(id).await
    }

    /// Probe `GET <url>/sessions` and fold the listing into the
    /// registry: session set, session index, count cache, and status
    /// bookkeeping (`Full` at capacity, else `Healthy`).
    ///
    /// Refused/timeout transport failures drive the backend `Unhealthy`
    /// before the error is surfaced.
    pub async fn refresh_sessions(&self, id: &str) -> RegistryResult<usize> {
        let url = self.url_of(id)?;

        match self.client.fetch_sessions(&url).await {
            Ok((listing, elapsed_ms)) => {
                let session_ids = listing.session_ids();
                let dropped = listing.sessions.len() - session_ids.len();
                if dropped > 0 {
                    warn!(backend = id, dropped, "session entries without an id ignored");
                }

                let count = session_ids.len();
                let status = if count >= self.max_sessions {
                    BackendStatus::Full
                } else {
                    BackendStatus::Healthy
                };
                self.update_status(
                    id,
                    status,
                    StatusPatch {
                        session_count: Some(count),
                        sessions: Some(session_ids.clone()),
                        response_time_ms: Some(elapsed_ms),
                        error: None,
                    },
                )?;
                for session_id in &session_ids {
                    self.index.insert(session_id, id);
                }
                // After update_status, which invalidates the key.
                self.counts.set(&count_cache_key(id), count);
                debug!(backend = id, count, elapsed_ms, "session listing refreshed");
                Ok(count)
            }
            Err(FetchError::Transport(err)) => {
                if err.kind.is_refused_or_timeout() {
                    self.update_status(id, BackendStatus::Unhealthy, StatusPatch::error(err.to_string()))?;
                }
                Err(RegistryError::Transport(err))
            }
            Err(FetchError::Status { status, .. }) => Err(RegistryError::UpstreamStatus {
                backend_id: id.to_string(),
                status,
                body: String::new(),
            }),
            Err(FetchError::Decode { message, .. }) => Err(RegistryError::Listing {
                backend_id: id.to_string(),
                message,
            }),
        }
    }

    /// Record a pairing success: the new session is hinted to its
    /// backend. The session count is left to the next probe.
    pub fn record_pairing(&self, backend_id: &str, session_id: &str) -> RegistryResult<()> {
        if !self.by_id.contains_key(backend_id) {
            return Err(RegistryError::UnknownBackend(backend_id.to_string()));
        }
        self.index.insert(session_id, backend_id);
        debug!(backend = backend_id, session_id, "pairing recorded in session index");
        Ok(())
    }

    // ── Session lookup ─────────────────────────────────────────────

    /// Locate the backend owning a session.
    ///
    /// Resolution is three-stage: index hint, in-memory inventory scan
    /// (repairing the index), then a sequential probe of every backend.
    /// First match wins; `cached` is false only for probe discovery.
    pub async fn find_session_backend(&self, session_id: &str) -> Option<SessionLocation> {
        // Stage 1: the index hint, if it names a known backend.
        if let Some(backend_id) = self.index.lookup(session_id) {
            match self.by_id.get(&backend_id) {
                Some(&i) => {
                    return Some(SessionLocation {
                        backend_id,
                        url: self.backends[i].url.clone(),
                        cached: true,
                    });
                }
                None => {
                    // A hint to a backend that does not exist cannot be
                    // served and cannot self-heal; drop it.
                    self.index.remove(session_id);
                }
            }
        }

        // Stage 2: last-observed inventories, repairing the index.
        for backend in &self.backends {
            let known = backend
                .state
                .read()
                .expect("backend lock")
                .sessions
                .contains(session_id);
            if known {
                self.index.insert(session_id, &backend.id);
                return Some(SessionLocation {
                    backend_id: backend.id.clone(),
                    url: backend.url.clone(),
                    cached: true,
                });
            }
        }

        // Stage 3: probe each backend in order until one reports it.
        for backend in &self.backends {
            match self.refresh_sessions(&backend.id).await {
                Ok(_) => {
                    let found = backend
                        .state
                        .read()
                        .expect("backend lock")
                        .sessions
                        .contains(session_id);
                    if found {
                        return Some(SessionLocation {
                            backend_id: backend.id.clone(),
                            url: backend.url.clone(),
                            cached: false,
                        });
                    }
                }
                Err(e) => {
                    debug!(backend = %backend.id, error = %e, "probe during session lookup failed");
                }
            }
        }

        None
    }

    // ── Deletion ───────────────────────────────────────────────────

    /// Delete a session on its backend and clean up local state.
    ///
    /// On upstream 404 the local state is still cleaned (the index
    /// entry was stale) and the 404 is surfaced. Transport failures
    /// surface unchanged, with the usual health transition on
    /// refused/timeout.
    pub async fn delete_session(
        &self,
        backend_id: &str,
        session_id: &str,
    ) -> RegistryResult<DeleteOutcome> {
        let url = self.url_of(backend_id)?;

        let resp = match self.client.logout(&url, session_id).await {
            Ok(resp) => resp,
            Err(err) => {
                if err.kind.is_refused_or_timeout() {
                    self.update_status(
                        backend_id,
                        BackendStatus::Unhealthy,
                        StatusPatch::error(err.to_string()),
                    )?;
                }
                return Err(RegistryError::Transport(err));
            }
        };

        if resp.status.is_success() {
            let new_count = self.cleanup_deleted(backend_id, session_id, true);
            info!(backend = backend_id, session_id, new_count, "session deleted");
            return Ok(DeleteOutcome {
                backend_id: backend_id.to_string(),
                new_session_count: new_count,
                upstream_status: resp.status.as_u16(),
            });
        }

        let body = String::from_utf8_lossy(&resp.body).into_owned();
        if resp.status.as_u16() == 404 {
            // The backend does not know this session; our local view was
            // stale either way.
            self.cleanup_deleted(backend_id, session_id, false);
            debug!(backend = backend_id, session_id, "session unknown upstream, local state cleaned");
        }
        Err(RegistryError::UpstreamStatus {
            backend_id: backend_id.to_string(),
            status: resp.status.as_u16(),
            body,
        })
    }

    /// Remove a session from local state; returns the new count.
    fn cleanup_deleted(&self, backend_id: &str, session_id: &str, count_deletion: bool) -> usize {
        let new_count = match self.by_id.get(backend_id) {
            Some(&i) => {
                let mut state = self.backends[i].state.write().expect("backend lock");
                state.sessions.remove(session_id);
                state.session_count = state.session_count.saturating_sub(1);
                if count_deletion {
                    state.deleted_sessions += 1;
                }
                state.session_count
            }
            None => 0,
        };
        self.index.remove(session_id);
        self.counts.remove(&count_cache_key(backend_id));
        new_count
    }

    // ── Aggregates ─────────────────────────────────────────────────

    /// Fleet totals from last-known counts (no probing).
    pub fn totals(&self) -> FleetTotals {
        let snapshots = self.all_backends();
        FleetTotals {
            total_backends: snapshots.len(),
            active_backends: snapshots.iter().filter(|s| s.is_active).count(),
            full_backends: snapshots
                .iter()
                .filter(|s| s.status == BackendStatus::Full)
                .count(),
            unhealthy_backends: snapshots
                .iter()
                .filter(|s| s.status == BackendStatus::Unhealthy)
                .count(),
            total_sessions: snapshots.iter().map(|s| s.session_count).sum(),
            capacity: snapshots.len() * self.max_sessions,
        }
    }

    /// Per-backend counters plus index and cache statistics.
    pub fn stats(&self) -> (Vec<BackendSnapshot>, IndexInfo, CacheStats) {
        (self.all_backends(), self.index.info(), self.counts.stats())
    }

    /// Session-index summary.
    pub fn index_info(&self) -> IndexInfo {
        self.index.info()
    }
}

fn count_cache_key(backend_id: &str) -> String {
    format!("sessions_{backend_id}")
}
