//! pairgate-health — periodic probing of the backend fleet.
//!
//! The monitor owns one background task that sweeps every backend's
//! session listing in parallel: an immediate sweep at start, then one
//! per interval until stopped. Sweep results drive the registry's
//! status transitions (healthy / full / unhealthy) and refresh the
//! session index as a side effect of each listing.
//!
//! `stop()` prevents further scheduling; a sweep already in flight runs
//! to completion or timeout.

pub mod monitor;

pub use monitor::{HealthMonitor, MonitorError, MonitorStatus};
