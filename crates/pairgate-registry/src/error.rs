//! Error types for registry operations.

use pairgate_client::TransportError;
use thiserror::Error;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur while operating on the fleet.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("backend {backend_id} answered {status}")]
    UpstreamStatus {
        backend_id: String,
        status: u16,
        body: String,
    },

    #[error("invalid session listing from {backend_id}: {message}")]
    Listing { backend_id: String, message: String },
}

impl RegistryError {
    /// The upstream HTTP status carried by this error, if any.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            RegistryError::UpstreamStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
