//! Testing utilities for code that retries database operations.
//!
//! Includes a scripted operation for driving the executor through a fixed
//! sequence of outcomes, an assertion macro for error kinds, and (with the
//! `proptest` feature) strategies for generating kinds and valid policies.
//!
//! # Examples
//!
//! ```rust
//! use dbretry::testing::ScriptedOperation;
//! use dbretry::{assert_error_kind, retry, DatabaseError, ErrorKind, RetryPolicy};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let script = ScriptedOperation::new([
//!     Err(DatabaseError::new(ErrorKind::Connection, "reset")),
//!     Err(DatabaseError::new(ErrorKind::Duplicate, "exists")),
//! ]);
//! let policy = RetryPolicy::builder()
//!     .base_delay(Duration::from_millis(1))
//!     .build()
//!     .unwrap();
//!
//! let result: Result<(), _> = retry(&policy, script.operation()).await;
//!
//! assert_error_kind!(result, ErrorKind::Duplicate);
//! assert_eq!(script.calls(), 2);
//! # });
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{DatabaseError, ErrorKind};

/// An operation that replays a fixed list of outcomes, one per call.
///
/// Once the script runs out every further call fails with a `Query` error
/// saying so, which makes over-invocation visible in test failures.
#[derive(Debug)]
pub struct ScriptedOperation<T> {
    outcomes: Arc<Mutex<VecDeque<Result<T, DatabaseError>>>>,
    calls: Arc<AtomicU32>,
}

impl<T> ScriptedOperation<T> {
    /// Script the given outcomes in order.
    pub fn new(outcomes: impl IntoIterator<Item = Result<T, DatabaseError>>) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(outcomes.into_iter().collect())),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// `failures` transient errors of `kind`, then `value`.
    pub fn fail_then_succeed(kind: ErrorKind, failures: u32, value: T) -> Self {
        let errors = (1..=failures)
            .map(|n| Err(DatabaseError::new(kind, format!("scripted failure {}", n))));
        Self::new(errors.chain(std::iter::once(Ok(value))))
    }

    /// How many times the operation has been invoked.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// A factory suitable for [`retry`](crate::retry()).
    pub fn operation(
        &self,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = Result<T, DatabaseError>> + Send>>
    where
        T: Send + 'static,
    {
        let outcomes = Arc::clone(&self.outcomes);
        let calls = Arc::clone(&self.calls);
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            let next = outcomes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            Box::pin(async move {
                next.unwrap_or_else(|| {
                    Err(DatabaseError::new(
                        ErrorKind::Query,
                        format!("script exhausted at call {}", n),
                    ))
                })
            })
        }
    }
}

/// Assert that a `Result` failed with a [`DatabaseError`] of the given kind.
///
/// # Example
///
/// ```rust
/// use dbretry::{assert_error_kind, DatabaseError, ErrorKind};
///
/// let result: Result<(), _> = Err(DatabaseError::new(ErrorKind::NotFound, "gone"));
/// assert_error_kind!(result, ErrorKind::NotFound);
/// ```
#[macro_export]
macro_rules! assert_error_kind {
    ($result:expr, $kind:expr) => {
        match $result {
            Err(err) => {
                assert_eq!(
                    $crate::DatabaseError::kind(&err),
                    $kind,
                    "unexpected error kind: {}",
                    err
                );
            }
            Ok(v) => {
                panic!("Expected error of kind {:?}, got Ok: {:?}", $kind, v);
            }
        }
    };
}

#[cfg(feature = "proptest")]
mod strategies {
    use crate::error::ErrorKind;
    use crate::retry::RetryPolicy;
    use proptest::prelude::*;
    use std::time::Duration;

    impl Arbitrary for ErrorKind {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
            proptest::sample::select(ErrorKind::ALL.to_vec()).boxed()
        }
    }

    /// Valid policies with millisecond-scale delays.
    pub fn valid_policy() -> impl Strategy<Value = RetryPolicy> {
        (
            1u32..10,
            1u64..1_000,
            0u64..10_000,
            0.0f64..=1.0,
            proptest::collection::btree_set(any::<ErrorKind>(), 0..4),
            proptest::option::of(1u64..60_000),
        )
            .prop_map(|(attempts, base_ms, extra_ms, jitter, kinds, timeout_ms)| {
                RetryPolicy::builder()
                    .max_attempts(attempts)
                    .base_delay(Duration::from_millis(base_ms))
                    .max_delay(Duration::from_millis(base_ms + extra_ms))
                    .jitter(jitter)
                    .retryable_kinds(kinds)
                    .timeout(timeout_ms.map(Duration::from_millis))
                    .build()
                    .expect("strategy only generates valid policies")
            })
    }
}

#[cfg(feature = "proptest")]
pub use strategies::valid_policy;
