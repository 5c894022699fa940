//! Balancer error types.

use pairgate_client::TransportError;
use thiserror::Error;

/// Why no backend could be selected. These map to 503 at the edge and
/// are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("all backends are at session capacity ({max}/{max})")]
    AllFull { max: usize },

    #[error("all backends are unavailable")]
    AllUnavailable,

    #[error("no active backends available")]
    NoActiveServers,
}

impl SelectError {
    /// Stable machine-readable code for the API surface.
    pub fn code(self) -> &'static str {
        match self {
            SelectError::AllFull { .. } => "ALL_FULL",
            SelectError::AllUnavailable => "ALL_UNAVAILABLE",
            SelectError::NoActiveServers => "NO_ACTIVE_SERVERS",
        }
    }
}

/// Failure of a forwarded request after selection and retries.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error(transparent)]
    Select(#[from] SelectError),

    #[error(transparent)]
    Transport(TransportError),
}
