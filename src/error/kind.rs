//! The closed classification tag carried by every [`DatabaseError`](super::DatabaseError).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What went wrong, as a machine-readable tag.
///
/// The kind is fixed when the error is constructed. Retry decisions look at
/// nothing else: a policy retries an error iff its kind is in the policy's
/// retryable set.
///
/// # Examples
///
/// ```rust
/// use dbretry::ErrorKind;
///
/// assert!(ErrorKind::Connection.is_transient());
/// assert!(!ErrorKind::NotFound.is_transient());
/// assert_eq!(ErrorKind::NotFound.as_str(), "not_found");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network or database connectivity failure.
    Connection,
    /// Query execution failure.
    Query,
    /// Caller input failed validation.
    Validation,
    /// A data integrity constraint was violated.
    Integrity,
    /// The requested resource does not exist.
    NotFound,
    /// A uniqueness constraint was violated.
    Duplicate,
    /// Transaction lifecycle failure (begin, commit, rollback).
    Transaction,
    /// A time budget ran out.
    DeadlineExceeded,
    /// A circuit breaker rejected the call without running it.
    CircuitOpen,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 9] = [
        ErrorKind::Connection,
        ErrorKind::Query,
        ErrorKind::Validation,
        ErrorKind::Integrity,
        ErrorKind::NotFound,
        ErrorKind::Duplicate,
        ErrorKind::Transaction,
        ErrorKind::DeadlineExceeded,
        ErrorKind::CircuitOpen,
    ];

    /// Stable snake_case name, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Query => "query",
            ErrorKind::Validation => "validation",
            ErrorKind::Integrity => "integrity",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::Transaction => "transaction",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::CircuitOpen => "circuit_open",
        }
    }

    /// Whether this kind is retryable under the default policy.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::Connection
                | ErrorKind::Query
                | ErrorKind::Transaction
                | ErrorKind::DeadlineExceeded
        )
    }

    /// The kinds retried by default.
    pub fn transient() -> impl Iterator<Item = ErrorKind> {
        Self::ALL.into_iter().filter(|kind| kind.is_transient())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown kind name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown error kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for ErrorKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds_match_default_table() {
        let transient: Vec<_> = ErrorKind::transient().collect();
        assert_eq!(
            transient,
            vec![
                ErrorKind::Connection,
                ErrorKind::Query,
                ErrorKind::Transaction,
                ErrorKind::DeadlineExceeded,
            ]
        );
    }

    #[test]
    fn test_names_parse_back() {
        for kind in ErrorKind::ALL {
            assert_eq!(kind.as_str().parse::<ErrorKind>(), Ok(kind));
        }
        assert!("timeout".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn test_serde_uses_snake_case_names() {
        let json = serde_json::to_string(&ErrorKind::NotFound).unwrap();
        assert_eq!(json, "\"not_found\"");
        let kind: ErrorKind = serde_json::from_str("\"deadline_exceeded\"").unwrap();
        assert_eq!(kind, ErrorKind::DeadlineExceeded);
    }

    #[test]
    fn test_circuit_open_is_not_transient() {
        assert!(!ErrorKind::CircuitOpen.is_transient());
        assert_eq!(ErrorKind::CircuitOpen.to_string(), "circuit_open");
    }
}
