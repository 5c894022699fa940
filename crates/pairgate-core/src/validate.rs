//! Edge validation for client-supplied identifiers.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Validation failures surfaced as HTTP 400 at the edge.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("pair number must be 6-15 digits")]
    InvalidPairNumber,

    #[error("session id must be 10-100 characters of [A-Za-z0-9_-]")]
    InvalidSessionId,
}

/// Validate a phone number for pairing: digits only, 6 to 15 characters.
pub fn validate_pair_number(raw: &str) -> Result<(), ValidationError> {
    let ok = (6..=15).contains(&raw.len()) && raw.bytes().all(|b| b.is_ascii_digit());
    if ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidPairNumber)
    }
}

fn session_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{10,100}$").expect("session id pattern"))
}

/// Validate a session identifier against the upstream id alphabet.
pub fn validate_session_id(raw: &str) -> Result<(), ValidationError> {
    if session_id_pattern().is_match(raw) {
        Ok(())
    } else {
        Err(ValidationError::InvalidSessionId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_number_accepts_digit_runs() {
        assert!(validate_pair_number("336123").is_ok());
        assert!(validate_pair_number("33612345678").is_ok());
        assert!(validate_pair_number("123456789012345").is_ok());
    }

    #[test]
    fn pair_number_rejects_bad_lengths() {
        assert_eq!(validate_pair_number("12345"), Err(ValidationError::InvalidPairNumber));
        assert_eq!(
            validate_pair_number("1234567890123456"),
            Err(ValidationError::InvalidPairNumber)
        );
        assert_eq!(validate_pair_number(""), Err(ValidationError::InvalidPairNumber));
    }

    #[test]
    fn pair_number_rejects_non_digits() {
        assert_eq!(validate_pair_number("+33612345"), Err(ValidationError::InvalidPairNumber));
        assert_eq!(validate_pair_number("33 612 345"), Err(ValidationError::InvalidPairNumber));
        assert_eq!(validate_pair_number("336abc78"), Err(ValidationError::InvalidPairNumber));
    }

    #[test]
    fn session_id_accepts_upstream_alphabet() {
        assert!(validate_session_id("sess-abc_123").is_ok());
        assert!(validate_session_id(&"a".repeat(100)).is_ok());
    }

    #[test]
    fn session_id_rejects_short_long_and_foreign_chars() {
        assert_eq!(validate_session_id("short"), Err(ValidationError::InvalidSessionId));
        assert_eq!(
            validate_session_id(&"a".repeat(101)),
            Err(ValidationError::InvalidSessionId)
        );
        assert_eq!(
            validate_session_id("sess.abc.123"),
            Err(ValidationError::InvalidSessionId)
        );
        assert_eq!(
            validate_session_id("sess/abc/123"),
            Err(ValidationError::InvalidSessionId)
        );
    }
}
