//! pairgate-registry — the in-memory model of the backend fleet.
//!
//! Three pieces live here:
//!
//! - the **server registry**: one record per configured backend (status,
//!   counters, last-observed session inventory), mutated under a
//!   per-backend lock;
//! - the **session index**: an advisory `sessionId → backendId` map used
//!   as a routing hint — stale entries are tolerated and self-heal;
//! - the **TTL cache** for per-backend session counts, the hot path of
//!   load-balancer selection.
//!
//! No lock is ever held across a network call: callers snapshot the
//! state they need, perform I/O, then reacquire to apply the result.

pub mod cache;
pub mod error;
pub mod index;
pub mod registry;
pub mod types;

pub use cache::{CacheStats, TtlCache};
pub use error::{RegistryError, RegistryResult};
pub use index::{IndexInfo, SessionIndex};
pub use registry::ServerRegistry;
pub use types::{
    BackendSnapshot, BackendStatus, DeleteOutcome, FleetTotals, SessionLocation, StatusPatch,
};
