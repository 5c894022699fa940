//! pairgate-client — outbound HTTP plumbing for the gateway.
//!
//! One-shot HTTP/1.1 requests against backend origins with a hard
//! per-request timeout, plus the transport-error taxonomy the routing
//! core keys health transitions on, and tolerant decoders for the
//! upstream payload shapes.
//!
//! All HTTP status codes are returned as successful responses; only
//! transport-level failures (connect, timeout, mid-flight abort) surface
//! as errors.

pub mod client;
pub mod error;
pub mod payload;

pub use client::{ProxyRequest, UpstreamClient, UpstreamResponse};
pub use error::{FetchError, TransportError, TransportKind};
pub use payload::{PairOutcome, SessionEntry, SessionListing};
