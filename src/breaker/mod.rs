//! Circuit breakers for database dependencies.
//!
//! Retrying helps with blips; a breaker helps when a dependency is down.
//! After enough consecutive failures it opens and rejects calls outright,
//! then lets a few trial calls through once `recovery_timeout` has passed.
//!
//! # Quick Start
//!
//! ```rust
//! use dbretry::breaker::{circuit_breaker, BreakerConfig};
//! use dbretry::{retry, DatabaseError, ErrorKind, RetryPolicy};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let breaker = circuit_breaker(
//!     "quickstart-db",
//!     BreakerConfig::default()
//!         .with_failure_threshold(2)
//!         .with_excluded_kinds([ErrorKind::NotFound]),
//! )
//! .unwrap();
//! let policy = RetryPolicy::builder()
//!     .max_attempts(5)
//!     .base_delay(Duration::from_millis(1))
//!     .build()
//!     .unwrap();
//!
//! let err = retry(&policy, || {
//!     breaker.call(|| async { Err::<(), _>(DatabaseError::new(ErrorKind::Connection, "refused")) })
//! })
//! .await
//! .unwrap_err();
//!
//! // Two failures open the circuit; the third attempt is rejected and ends the loop.
//! assert_eq!(err.kind(), ErrorKind::CircuitOpen);
//! assert_eq!(err.retry_attempts(), Some(3));
//! # });
//! ```
//!
//! # Composition
//!
//! - `retry(policy, || breaker.call(op))`: every attempt goes through the
//!   breaker, and an open circuit stops the retry loop.
//! - `breaker.call(|| retry(policy, op))`: the whole retry sequence counts as
//!   one call.

mod circuit;
mod error;
mod registry;

pub use circuit::{
    BreakerConfig, CircuitBreaker, CircuitState, CircuitStats, DEFAULT_FAILURE_THRESHOLD,
    DEFAULT_HALF_OPEN_MAX_CALLS, DEFAULT_RECOVERY_TIMEOUT,
};
pub use error::BreakerConfigError;
pub use registry::{circuit_breaker, BreakerRegistry};
