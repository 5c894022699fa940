//! Health monitor — the periodic probe loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;
use pairgate_registry::{BackendSnapshot, BackendStatus, RegistryError, ServerRegistry, StatusPatch};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Errors from targeted monitor operations.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("unknown backend: {0}")]
    UnknownBackend(String),
}

/// Serializable monitor state for the health surface.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub enabled: bool,
    pub interval_ms: u64,
    pub sweeps: u64,
    pub last_sweep: Option<u64>,
}

/// The running sweep task plus its shutdown signal.
struct MonitorSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Periodically probes every backend's session listing.
pub struct HealthMonitor {
    registry: Arc<ServerRegistry>,
    interval: Duration,
    enabled: Arc<AtomicBool>,
    sweeps: Arc<AtomicU64>,
    /// Unix ms of the last completed sweep; 0 = never.
    last_sweep_ms: Arc<AtomicU64>,
    slot: Mutex<Option<MonitorSlot>>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<ServerRegistry>, interval: Duration) -> Self {
        Self {
            registry,
            interval,
            enabled: Arc::new(AtomicBool::new(false)),
            sweeps: Arc::new(AtomicU64::new(0)),
            last_sweep_ms: Arc::new(AtomicU64::new(0)),
            slot: Mutex::new(None),
        }
    }

    /// Start the sweep loop: one immediate sweep, then one per interval.
    ///
    /// Idempotent — a second start while running logs a warning and does
    /// nothing.
    pub fn start(&self) {
        let mut slot = self.slot.lock().expect("monitor slot lock");
        if slot.is_some() {
            warn!("health monitor already running, start ignored");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.enabled.store(true, Ordering::Release);

        let registry = self.registry.clone();
        let interval = self.interval;
        let sweeps = self.sweeps.clone();
        let last_sweep_ms = self.last_sweep_ms.clone();
        let handle = tokio::spawn(async move {
            run_sweep_loop(registry, interval, sweeps, last_sweep_ms, shutdown_rx).await;
        });

        *slot = Some(MonitorSlot {
            handle,
            shutdown_tx,
        });
        info!(interval_ms = self.interval.as_millis() as u64, "health monitor started");
    }

    /// Stop scheduling sweeps.
    ///
    /// A sweep already in flight runs to completion or timeout; only
    /// future scheduling is prevented.
    pub fn stop(&self) {
        let mut slot = self.slot.lock().expect("monitor slot lock");
        if let Some(running) = slot.take() {
            let _ = running.shutdown_tx.send(true);
            // The loop breaks at its next scheduling point; the task is
            // left to finish any probes it already started.
            drop(running.handle);
            self.enabled.store(false, Ordering::Release);
            info!("health monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Probe one backend now and return its updated record.
    pub async fn check_server(&self, id: &str) -> Result<BackendSnapshot, MonitorError> {
        if self.registry.get(id).is_none() {
            return Err(MonitorError::UnknownBackend(id.to_string()));
        }
        probe_backend(&self.registry, id).await;
        self.registry
            .get(id)
            .ok_or_else(|| MonitorError::UnknownBackend(id.to_string()))
    }

    pub fn status(&self) -> MonitorStatus {
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        MonitorStatus {
            enabled: self.is_running(),
            interval_ms: self.interval.as_millis() as u64,
            sweeps: self.sweeps.load(Ordering::Relaxed),
            last_sweep: (last != 0).then_some(last),
        }
    }
}

/// The sweep loop: sweep, then wait for the interval or shutdown.
async fn run_sweep_loop(
    registry: Arc<ServerRegistry>,
    interval: Duration,
    sweeps: Arc<AtomicU64>,
    last_sweep_ms: Arc<AtomicU64>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        sweep_fleet(&registry).await;
        sweeps.fetch_add(1, Ordering::Relaxed);
        last_sweep_ms.store(now_ms(), Ordering::Relaxed);

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                debug!("health monitor loop shutting down");
                break;
            }
        }
    }
}

/// Probe every backend in parallel. Individual failures never abort the
/// sweep.
async fn sweep_fleet(registry: &Arc<ServerRegistry>) {
    let ids = registry.backend_ids();
    debug!(backends = ids.len(), "health sweep starting");
    join_all(ids.iter().map(|id| probe_backend(registry, id))).await;
}

/// One probe: refresh the backend's session listing, driving any
/// failure to `Unhealthy`.
///
/// Refused/timeout transport failures are already transitioned by the
/// registry's refresh path; every other failure (non-200, bad payload,
/// odd transport) is the monitor's to record.
async fn probe_backend(registry: &Arc<ServerRegistry>, id: &str) {
    match registry.refresh_sessions(id).await {
        Ok(count) => {
            debug!(backend = id, count, "health probe ok");
        }
        Err(RegistryError::Transport(t)) if t.kind.is_refused_or_timeout() => {
            debug!(backend = id, error = %t, "health probe transport failure");
        }
        Err(e) => {
            warn!(backend = id, error = %e, "health probe failed");
            let _ = registry.update_status(id, BackendStatus::Unhealthy, StatusPatch::error(e.to_string()));
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
