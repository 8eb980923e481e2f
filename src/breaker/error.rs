//! Error types for circuit breaker configuration.

use thiserror::Error;

/// A circuit breaker was given parameters it cannot honor.
///
/// # Examples
///
/// ```rust
/// use dbretry::breaker::{BreakerConfig, BreakerConfigError, CircuitBreaker};
///
/// let err = CircuitBreaker::new("db", BreakerConfig::default().with_failure_threshold(0))
///     .unwrap_err();
/// assert_eq!(err, BreakerConfigError::ZeroFailureThreshold);
/// assert_eq!(err.field(), "failure_threshold");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BreakerConfigError {
    /// At least one failure must be needed to open the circuit.
    #[error("failure_threshold must be at least 1")]
    ZeroFailureThreshold,
    /// The circuit must stay open for some time before admitting trial calls.
    #[error("recovery_timeout must be positive")]
    ZeroRecoveryTimeout,
    /// Half-open must admit at least one trial call.
    #[error("half_open_max_calls must be at least 1")]
    ZeroHalfOpenCalls,
    /// A present `call_timeout` must be non-zero.
    #[error("call_timeout must be positive when set")]
    ZeroCallTimeout,
}

impl BreakerConfigError {
    /// Name of the offending setting.
    pub fn field(&self) -> &'static str {
        match self {
            BreakerConfigError::ZeroFailureThreshold => "failure_threshold",
            BreakerConfigError::ZeroRecoveryTimeout => "recovery_timeout",
            BreakerConfigError::ZeroHalfOpenCalls => "half_open_max_calls",
            BreakerConfigError::ZeroCallTimeout => "call_timeout",
        }
    }
}
