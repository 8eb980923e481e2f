//! Retry policies and the retry executor.
//!
//! - **Pure core**: [`RetryPolicy`] is just data. It computes delays and makes
//!   retry decisions, and is validated once when built.
//! - **Imperative shell**: [`retry`] drives an async operation under a policy,
//!   sleeping between attempts and logging each retry.
//! - **Shared default**: [`PolicyRegistry`] holds the policy used when the
//!   caller doesn't bring one.
//!
//! # Quick Start
//!
//! ```rust
//! use dbretry::{retry, DatabaseError, ErrorKind, RetryPolicy};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .base_delay(Duration::from_millis(1))
//!     .build()
//!     .unwrap();
//!
//! let err = retry(&policy, || async {
//!     Err::<(), _>(DatabaseError::new(ErrorKind::NotFound, "no such user"))
//! })
//! .await
//! .unwrap_err();
//!
//! // NotFound is not transient: one attempt, then out.
//! assert_eq!(err.retry_attempts(), Some(1));
//! # });
//! ```
//!
//! # Backoff
//!
//! The delay after failed attempt `n` is `base_delay * 2^(n-1)`, capped at
//! `max_delay`, then multiplied by a random factor in `[1 - jitter, 1 + jitter]`.
//!
//! # Error Types
//!
//! - [`PolicyError`]: a policy was built with values it cannot honor
//! - [`DatabaseError`](crate::DatabaseError): what operations fail with and
//!   what the executor returns

mod error;
mod executor;
mod policy;
mod registry;

pub use error::PolicyError;
pub use executor::{retry, retry_default, retry_with, retry_with_hooks, RetryEvent};
pub use policy::{
    PolicyDescription, PolicyOverrides, RetryPolicy, RetryPolicyBuilder, Retryable,
    DEFAULT_BASE_DELAY, DEFAULT_JITTER, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY,
};
pub use registry::{configure_default, get_default, set_default, PolicyRegistry};
