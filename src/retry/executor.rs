//! The retry loop.
//!
//! [`retry`] is the one primitive: run an operation, and on failure ask the
//! policy whether to go again. [`retry_default`] and [`retry_with`] pick the
//! policy for you; [`retry_with_hooks`] adds an observer.
//!
//! Each attempt calls the factory again to get a fresh future, so the
//! operation must be safe to run more than once. Attempts of one call are
//! strictly sequential. Dropping the returned future cancels the loop at
//! whatever await point it is parked on; cancellation is never turned into
//! an error.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use super::policy::{PolicyOverrides, RetryPolicy, Retryable};
use super::registry::get_default;
use crate::error::DatabaseError;

/// Information about a failed attempt that is about to be retried.
#[derive(Debug, Clone)]
pub struct RetryEvent<'a, E> {
    /// Which attempt just failed (1-indexed).
    pub attempt: u32,
    /// The error from the failed attempt.
    pub error: &'a E,
    /// Delay before the next attempt.
    pub next_delay: Duration,
    /// Time spent on the failed attempt alone.
    pub attempt_elapsed: Duration,
    /// Total elapsed time since the first attempt.
    pub elapsed: Duration,
}

/// Run `operation` under `policy` until it succeeds, fails with an error the
/// policy won't retry, runs out of attempts, or exceeds the policy timeout.
///
/// The error returned on exhaustion is the last attempt's error, annotated
/// with the attempt count and total duration via [`Retryable::record_retry`].
/// When the timeout expires the result is a fresh
/// [`ErrorKind::DeadlineExceeded`](crate::ErrorKind::DeadlineExceeded) error
/// and the operation is not invoked again.
///
/// # Examples
///
/// ```rust
/// use dbretry::{retry, DatabaseError, ErrorKind, RetryPolicy};
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let counter = AtomicU32::new(0);
/// let calls = &counter;
/// let policy = RetryPolicy::builder()
///     .base_delay(Duration::from_millis(1))
///     .build()
///     .unwrap();
///
/// let result = retry(&policy, move || async move {
///     if calls.fetch_add(1, Ordering::SeqCst) == 0 {
///         Err(DatabaseError::new(ErrorKind::Connection, "reset"))
///     } else {
///         Ok("row")
///     }
/// })
/// .await;
///
/// assert_eq!(result.unwrap(), "row");
/// assert_eq!(calls.load(Ordering::SeqCst), 2);
/// # });
/// ```
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + From<DatabaseError> + Display,
{
    run(policy, operation, |_: &RetryEvent<'_, E>| {}).await
}

/// [`retry`] with an observer called before each backoff sleep.
///
/// The hook is synchronous and should not block; use it for metrics.
pub async fn retry_with_hooks<T, E, F, Fut, H>(
    policy: &RetryPolicy,
    operation: F,
    on_retry: H,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + From<DatabaseError> + Display,
    H: FnMut(&RetryEvent<'_, E>),
{
    run(policy, operation, on_retry).await
}

/// [`retry`] under the process-wide default policy.
pub async fn retry_default<T, E, F, Fut>(operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + From<DatabaseError> + Display,
{
    let policy = get_default();
    run(&policy, operation, |_: &RetryEvent<'_, E>| {}).await
}

/// [`retry`] under an ad hoc policy: the process-wide default with
/// `overrides` applied.
///
/// Invalid overrides fail before the operation runs, as a
/// [`Validation`](crate::ErrorKind::Validation) error.
pub async fn retry_with<T, E, F, Fut>(overrides: &PolicyOverrides, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + From<DatabaseError> + Display,
{
    let policy = overrides
        .apply_to(&get_default())
        .map_err(|err| E::from(DatabaseError::from(err)))?;
    run(&policy, operation, |_: &RetryEvent<'_, E>| {}).await
}

async fn run<T, E, F, Fut, H>(policy: &RetryPolicy, mut operation: F, mut on_retry: H) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + From<DatabaseError> + Display,
    H: FnMut(&RetryEvent<'_, E>),
{
    let name = std::any::type_name::<F>();
    let start = Instant::now();
    let deadline = policy
        .timeout()
        .and_then(|budget| start.checked_add(budget).map(|at| (at, budget)));
    let mut attempt = 1u32;

    loop {
        if let Some((deadline, budget)) = deadline {
            if Instant::now() >= deadline {
                let elapsed = start.elapsed();
                let completed = attempt - 1;
                tracing::warn!(
                    operation = name,
                    attempts = completed,
                    elapsed = ?elapsed,
                    timeout = ?budget,
                    "retry deadline exceeded"
                );
                let mut err = DatabaseError::deadline_exceeded(
                    format!("overall timeout of {:?} exceeded for {}", budget, name),
                    budget,
                );
                err.annotate_retry(completed, elapsed);
                return Err(E::from(err));
            }
        }

        let attempt_start = Instant::now();
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = name,
                        attempts = attempt,
                        elapsed = ?start.elapsed(),
                        "operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(mut error) => {
                let attempt_elapsed = attempt_start.elapsed();
                let kind = error.kind().map_or("unclassified", |kind| kind.as_str());

                if !policy.should_retry(&error, attempt) {
                    let elapsed = start.elapsed();
                    if attempt > 1 {
                        tracing::warn!(
                            operation = name,
                            attempts = attempt,
                            elapsed = ?elapsed,
                            error_kind = kind,
                            error = %error,
                            "operation failed after retries"
                        );
                    }
                    error.record_retry(attempt, elapsed);
                    return Err(error);
                }

                let delay = policy.calculate_delay(attempt);
                tracing::warn!(
                    operation = name,
                    attempt,
                    attempt_elapsed = ?attempt_elapsed,
                    error_kind = kind,
                    error = %error,
                    delay = ?delay,
                    "attempt failed, retrying"
                );
                on_retry(&RetryEvent {
                    attempt,
                    error: &error,
                    next_delay: delay,
                    attempt_elapsed,
                    elapsed: start.elapsed(),
                });

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
