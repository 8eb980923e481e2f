//! Error types for retry configuration.

use std::time::Duration;

use thiserror::Error;

/// A retry policy was given parameters it cannot honor.
///
/// Raised when the policy is built, never when it is used.
///
/// # Examples
///
/// ```rust
/// use dbretry::{PolicyError, RetryPolicy};
///
/// let err = RetryPolicy::builder().max_attempts(0).build().unwrap_err();
/// assert_eq!(err, PolicyError::ZeroAttempts);
/// assert_eq!(err.field(), "max_attempts");
/// ```
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    /// `max_attempts` must allow at least the initial attempt.
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,
    /// `base_delay` must be positive.
    #[error("base_delay must be positive")]
    ZeroBaseDelay,
    /// `max_delay` must not be below `base_delay`.
    #[error("max_delay ({max_delay:?}) must be greater than or equal to base_delay ({base_delay:?})")]
    MaxDelayBelowBase {
        /// The configured base delay.
        base_delay: Duration,
        /// The configured cap.
        max_delay: Duration,
    },
    /// `jitter` must lie in `[0, 1]`.
    #[error("jitter must be within [0, 1], got {0}")]
    JitterOutOfRange(f64),
    /// A present `timeout` must be non-zero.
    #[error("timeout must be positive when set")]
    ZeroTimeout,
}

impl PolicyError {
    /// Name of the offending policy field.
    pub fn field(&self) -> &'static str {
        match self {
            PolicyError::ZeroAttempts => "max_attempts",
            PolicyError::ZeroBaseDelay => "base_delay",
            PolicyError::MaxDelayBelowBase { .. } => "max_delay",
            PolicyError::JitterOutOfRange(_) => "jitter",
            PolicyError::ZeroTimeout => "timeout",
        }
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;
    use crate::error::{DatabaseError, ErrorKind};

    #[test]
    fn test_policy_error_display() {
        let err = PolicyError::MaxDelayBelowBase {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(1),
        };
        let display = err.to_string();
        assert!(display.contains("max_delay (1s)"));
        assert!(display.contains("base_delay (2s)"));
        assert_eq!(
            PolicyError::JitterOutOfRange(1.5).to_string(),
            "jitter must be within [0, 1], got 1.5"
        );
    }

    #[test]
    fn test_policy_error_becomes_validation_error() {
        let err: DatabaseError = PolicyError::JitterOutOfRange(2.0).into();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.details()["model"], "RetryPolicy");
        assert_eq!(
            err.details()["field_errors"]["jitter"][0],
            "jitter must be within [0, 1], got 2"
        );
    }
}
