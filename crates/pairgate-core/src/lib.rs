//! pairgate-core — configuration and input validation for the gateway.
//!
//! The gateway is configured entirely through the environment (the fleet
//! is fixed; there is no discovery). This crate owns the typed
//! configuration, backend-URL canonicalization, and the edge validation
//! rules for pair numbers and session identifiers.

pub mod config;
pub mod validate;

pub use config::GatewayConfig;
pub use validate::{validate_pair_number, validate_session_id, ValidationError};
