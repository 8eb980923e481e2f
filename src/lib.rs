//! # dbretry
//!
//! Retry policies with exponential backoff and jitter, paired with a
//! structured error taxonomy for database operations.
//!
//! ## Philosophy
//!
//! - Failures carry a closed [`ErrorKind`]; retry decisions look at the kind
//!   and nothing else.
//! - [`RetryPolicy`] is immutable data, validated when built.
//! - [`retry`] is the one place that sleeps and loops. It returns either the
//!   operation's value or exactly one error, annotated with how many attempts
//!   were made and how long they took.
//! - A [`CircuitBreaker`](breaker::CircuitBreaker) stops calling a dependency
//!   that keeps failing, and composes with [`retry`].
//!
//! ## Quick Example
//!
//! ```rust
//! use dbretry::error::{ConnectionFields, DatabaseError};
//! use dbretry::{retry, RetryPolicy};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .base_delay(Duration::from_millis(1))
//!     .jitter(0.0)
//!     .build()
//!     .unwrap();
//!
//! let result: Result<(), DatabaseError> = retry(&policy, || async {
//!     Err(DatabaseError::connection(
//!         "connection refused",
//!         ConnectionFields::new().param("host", "db").param("password", "hunter2"),
//!     ))
//! })
//! .await;
//!
//! let err = result.unwrap_err();
//! assert_eq!(err.retry_attempts(), Some(3));
//! assert_eq!(err.details()["connection_params"]["password"], "***");
//! # });
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod breaker;
pub mod config;
pub mod error;
pub mod retry;
pub mod testing;

// Re-exports
pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use config::{initialize_default_policy, ConfigError, RetrySettings};
pub use error::{DatabaseError, ErrorKind, StructuredError};
pub use retry::{
    configure_default, get_default, retry, retry_default, retry_with, retry_with_hooks,
    set_default, PolicyError, PolicyOverrides, PolicyRegistry, RetryEvent, RetryPolicy,
    Retryable,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{DatabaseError, ErrorKind};
    pub use crate::retry::{
        retry, retry_default, retry_with, PolicyOverrides, RetryPolicy, Retryable,
    };
}
