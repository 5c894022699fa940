//! Transport-error taxonomy.
//!
//! Failures are classified from the HTTP client's native error kinds
//! rather than matched on error-message strings. Only `Refused`,
//! `Timeout`, and `Aborted` are evidence that a backend is down; `Other`
//! covers local mistakes (bad URL, handshake issues) that say nothing
//! about backend health.

use thiserror::Error;

/// Classification of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// TCP connect was refused.
    Refused,
    /// The per-request timeout elapsed.
    Timeout,
    /// The connection died mid-flight (reset, aborted, incomplete message).
    Aborted,
    /// Anything else: bad URL, handshake failure, local I/O error.
    Other,
}

impl TransportKind {
    /// Whether this failure should drive the backend `Unhealthy` when it
    /// occurs on a forwarded request.
    pub fn marks_backend_unhealthy(self) -> bool {
        !matches!(self, TransportKind::Other)
    }

    /// Whether this failure carries connection-refused or timeout
    /// semantics (the classes that flip health state on probe paths).
    pub fn is_refused_or_timeout(self) -> bool {
        matches!(self, TransportKind::Refused | TransportKind::Timeout)
    }
}

/// A transport-level failure on an outbound call.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TransportKind::Other, message)
    }

    /// The request-level timeout elapsed.
    pub fn timed_out(url: &str) -> Self {
        Self::new(TransportKind::Timeout, format!("request to {url} timed out"))
    }

    /// Classify a socket-level error from `TcpStream::connect` or I/O.
    pub fn from_io(url: &str, err: &std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::ConnectionRefused => TransportKind::Refused,
            std::io::ErrorKind::TimedOut => TransportKind::Timeout,
            std::io::ErrorKind::ConnectionAborted | std::io::ErrorKind::ConnectionReset => {
                TransportKind::Aborted
            }
            _ => TransportKind::Other,
        };
        Self::new(kind, format!("{url}: {err}"))
    }

    /// Classify an error surfaced by the HTTP/1.1 connection.
    pub fn from_hyper(url: &str, err: &hyper::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportKind::Timeout
        } else if err.is_canceled() || err.is_incomplete_message() || err.is_closed() {
            TransportKind::Aborted
        } else {
            TransportKind::Other
        };
        Self::new(kind, format!("{url}: {err}"))
    }
}

/// Failure fetching and decoding a backend's session listing.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("invalid session listing from {url}: {message}")]
    Decode { url: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_refused_classifies_as_refused() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = TransportError::from_io("http://a:1", &io);
        assert_eq!(err.kind, TransportKind::Refused);
        assert!(err.kind.marks_backend_unhealthy());
        assert!(err.kind.is_refused_or_timeout());
    }

    #[test]
    fn io_reset_classifies_as_aborted() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = TransportError::from_io("http://a:1", &io);
        assert_eq!(err.kind, TransportKind::Aborted);
        assert!(err.kind.marks_backend_unhealthy());
        assert!(!err.kind.is_refused_or_timeout());
    }

    #[test]
    fn unknown_io_is_other_and_harmless_to_health() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = TransportError::from_io("http://a:1", &io);
        assert_eq!(err.kind, TransportKind::Other);
        assert!(!err.kind.marks_backend_unhealthy());
    }

    #[test]
    fn timeout_constructor_names_the_url() {
        let err = TransportError::timed_out("http://a:1/sessions");
        assert_eq!(err.kind, TransportKind::Timeout);
        assert!(err.to_string().contains("http://a:1/sessions"));
    }
}
