//! Domain types for the backend fleet.

use serde::Serialize;

/// Unique, stable identifier of a configured backend (`server-<n>`).
pub type BackendId = String;

// ── Status ─────────────────────────────────────────────────────────

/// Selectable state of a backend. Only `Healthy` is eligible for new
/// traffic; `Full` and `Unhealthy` are routing constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStatus {
    Healthy,
    Full,
    Unhealthy,
}

impl BackendStatus {
    /// Derived activity flag: a backend accepts new sessions iff healthy.
    pub fn is_active(self) -> bool {
        matches!(self, BackendStatus::Healthy)
    }
}

// ── Snapshots ──────────────────────────────────────────────────────

/// Monotonic per-backend counters.
#[derive(Debug, Clone, Serialize)]
pub struct BackendCounters {
    pub health_checks: u64,
    pub failures: u64,
    pub deleted_sessions: u64,
    /// Unix timestamp (ms) when the backend record was created.
    pub created_at: u64,
}

/// Point-in-time view of one backend, safe to serialize.
#[derive(Debug, Clone, Serialize)]
pub struct BackendSnapshot {
    pub id: BackendId,
    pub url: String,
    pub status: BackendStatus,
    /// Derived: `status == healthy`.
    pub is_active: bool,
    /// Last observed session count.
    pub session_count: usize,
    /// Last observed session ids, sorted for stable output.
    pub sessions: Vec<String>,
    /// Unix timestamp (ms) of the most recent probe or forced update.
    pub last_checked: Option<u64>,
    /// Duration (ms) of the last successful probe; 0 if unknown.
    pub response_time_ms: u64,
    pub last_error: Option<String>,
    pub counters: BackendCounters,
}

/// Partial update applied alongside a status change.
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
    pub session_count: Option<usize>,
    pub sessions: Option<Vec<String>>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
}

impl StatusPatch {
    /// A patch carrying only an error message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

// ── Operation results ──────────────────────────────────────────────

/// Where a session was found, and whether the answer came from cached
/// state (index or in-memory inventory) or a fresh probe.
#[derive(Debug, Clone, Serialize)]
pub struct SessionLocation {
    pub backend_id: BackendId,
    pub url: String,
    pub cached: bool,
}

/// Result of a successful session deletion.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub backend_id: BackendId,
    pub new_session_count: usize,
    pub upstream_status: u16,
}

/// Fleet-wide aggregates built from last-known state.
#[derive(Debug, Clone, Serialize)]
pub struct FleetTotals {
    pub total_backends: usize,
    pub active_backends: usize,
    pub full_backends: usize,
    pub unhealthy_backends: usize,
    pub total_sessions: usize,
    /// Fleet capacity: backends × per-backend session cap.
    pub capacity: usize,
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
