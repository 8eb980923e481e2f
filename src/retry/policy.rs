//! Retry policy types and configuration.

use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;

use super::error::PolicyError;
use crate::error::ErrorKind;

/// A retry policy describing how to retry failed operations.
///
/// Policies are pure data: they decide whether to retry and how long to wait,
/// but never sleep or invoke anything. They are validated when built and
/// never change afterwards; to "reconfigure" one, build a new one.
///
/// # Examples
///
/// ```rust
/// use dbretry::{ErrorKind, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::builder()
///     .max_attempts(5)
///     .base_delay(Duration::from_millis(100))
///     .max_delay(Duration::from_secs(2))
///     .jitter(0.0)
///     .build()
///     .unwrap();
///
/// assert_eq!(policy.calculate_delay(1), Duration::from_millis(100));
/// assert_eq!(policy.calculate_delay(2), Duration::from_millis(200));
/// assert_eq!(policy.calculate_delay(6), Duration::from_secs(2)); // capped
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
    retryable_kinds: BTreeSet<ErrorKind>,
    timeout: Option<Duration>,
}

/// Default total attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default delay before the second attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
/// Default delay cap.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);
/// Default jitter fraction.
pub const DEFAULT_JITTER: f64 = 0.1;

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: DEFAULT_JITTER,
            retryable_kinds: ErrorKind::transient().collect(),
            timeout: None,
        }
    }
}

impl RetryPolicy {
    /// Start building a policy from the defaults.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::from(RetryPolicy::default())
    }

    /// Start building a policy from this one's values.
    pub fn to_builder(&self) -> RetryPolicyBuilder {
        RetryPolicyBuilder::from(self.clone())
    }

    /// Total invocations allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the second attempt.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Cap applied to the computed delay before jitter.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Fraction of the capped delay used as the jitter range.
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Kinds considered transient under this policy.
    pub fn retryable_kinds(&self) -> &BTreeSet<ErrorKind> {
        &self.retryable_kinds
    }

    /// Overall wall-clock budget across all attempts.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Delay before jitter: `base_delay * 2^(attempt-1)` capped at `max_delay`.
    ///
    /// `attempt` is the 1-indexed attempt that just failed; `0` is treated
    /// as `1`.
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |raw| raw.min(self.max_delay))
    }

    /// Delay to wait after attempt number `attempt` (1-indexed) failed.
    ///
    /// Exponential backoff capped at `max_delay`, then scaled by a uniform
    /// random factor in `[1 - jitter, 1 + jitter]` when jitter is non-zero.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dbretry::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::builder()
    ///     .base_delay(Duration::from_millis(100))
    ///     .jitter(0.5)
    ///     .build()
    ///     .unwrap();
    ///
    /// let delay = policy.calculate_delay(2);
    /// assert!(delay >= Duration::from_millis(100) && delay <= Duration::from_millis(300));
    /// ```
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let capped = self.capped_delay(attempt);
        if self.jitter > 0.0 {
            let factor: f64 = rand::rng().random_range(-self.jitter..=self.jitter);
            let scaled = capped.as_secs_f64() * (1.0 + factor).max(0.0);
            Duration::try_from_secs_f64(scaled).unwrap_or(Duration::MAX)
        } else {
            capped
        }
    }

    /// Whether to try again after `error` ended attempt number `attempt`.
    ///
    /// `false` once `attempt >= max_attempts`; otherwise `true` iff the
    /// error's kind is in the retryable set. Errors without a kind are
    /// never retried.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dbretry::{DatabaseError, ErrorKind, RetryPolicy};
    ///
    /// let policy = RetryPolicy::default(); // 3 attempts
    /// let transient = DatabaseError::new(ErrorKind::Connection, "reset");
    /// let permanent = DatabaseError::new(ErrorKind::Duplicate, "exists");
    ///
    /// assert!(policy.should_retry(&transient, 1));
    /// assert!(!policy.should_retry(&transient, 3));
    /// assert!(!policy.should_retry(&permanent, 1));
    /// ```
    pub fn should_retry<E: Retryable + ?Sized>(&self, error: &E, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        error
            .kind()
            .is_some_and(|kind| self.retryable_kinds.contains(&kind))
    }

    /// Field values and retryable kind names, for logging.
    pub fn describe(&self) -> PolicyDescription {
        PolicyDescription {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay.as_secs_f64(),
            max_delay: self.max_delay.as_secs_f64(),
            jitter: self.jitter,
            retryable_kinds: self.retryable_kinds.iter().map(|k| k.as_str()).collect(),
            timeout: self.timeout.map(|t| t.as_secs_f64()),
        }
    }

    fn validate(&self) -> Result<(), PolicyError> {
        if self.max_attempts < 1 {
            return Err(PolicyError::ZeroAttempts);
        }
        if self.base_delay.is_zero() {
            return Err(PolicyError::ZeroBaseDelay);
        }
        if self.max_delay < self.base_delay {
            return Err(PolicyError::MaxDelayBelowBase {
                base_delay: self.base_delay,
                max_delay: self.max_delay,
            });
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(PolicyError::JitterOutOfRange(self.jitter));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(PolicyError::ZeroTimeout);
        }
        Ok(())
    }
}

/// An error the executor can classify.
///
/// `kind` returning `None` means "not one of ours": such errors are never
/// retried and pass through untouched.
pub trait Retryable {
    /// Classification tag, if the error has one.
    fn kind(&self) -> Option<ErrorKind>;

    /// Called once when the executor stops retrying and returns this error.
    fn record_retry(&mut self, attempts: u32, elapsed: Duration) {
        let _ = (attempts, elapsed);
    }
}

impl Retryable for crate::error::DatabaseError {
    fn kind(&self) -> Option<ErrorKind> {
        Some(crate::error::DatabaseError::kind(self))
    }

    fn record_retry(&mut self, attempts: u32, elapsed: Duration) {
        self.annotate_retry(attempts, elapsed);
    }
}

impl<E: Retryable + ?Sized> Retryable for Box<E> {
    fn kind(&self) -> Option<ErrorKind> {
        (**self).kind()
    }

    fn record_retry(&mut self, attempts: u32, elapsed: Duration) {
        (**self).record_retry(attempts, elapsed);
    }
}

/// Serializable snapshot of a [`RetryPolicy`]. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyDescription {
    /// Total attempts allowed.
    pub max_attempts: u32,
    /// Base delay in seconds.
    pub base_delay: f64,
    /// Delay cap in seconds.
    pub max_delay: f64,
    /// Jitter fraction.
    pub jitter: f64,
    /// Names of the retryable kinds.
    pub retryable_kinds: Vec<&'static str>,
    /// Overall budget in seconds.
    pub timeout: Option<f64>,
}

/// Builder for [`RetryPolicy`]. Nothing is checked until [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl From<RetryPolicy> for RetryPolicyBuilder {
    fn from(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl RetryPolicyBuilder {
    /// Total invocations allowed, including the first.
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.policy.max_attempts = n;
        self
    }

    /// Delay before the second attempt.
    pub fn base_delay(mut self, d: Duration) -> Self {
        self.policy.base_delay = d;
        self
    }

    /// Cap on the computed delay, applied before jitter.
    pub fn max_delay(mut self, d: Duration) -> Self {
        self.policy.max_delay = d;
        self
    }

    /// Jitter fraction in `[0, 1]`.
    pub fn jitter(mut self, factor: f64) -> Self {
        self.policy.jitter = factor;
        self
    }

    /// Replace the retryable kinds.
    pub fn retryable_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.policy.retryable_kinds = kinds.into_iter().collect();
        self
    }

    /// Set or clear the overall budget.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.policy.timeout = timeout;
        self
    }

    /// Validate and produce the policy.
    pub fn build(self) -> Result<RetryPolicy, PolicyError> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}

/// A partial set of policy fields. Unset fields keep the base policy's value.
///
/// # Examples
///
/// ```rust
/// use dbretry::{PolicyOverrides, RetryPolicy};
///
/// let base = RetryPolicy::default();
/// let tuned = PolicyOverrides::new().max_attempts(5).apply_to(&base).unwrap();
///
/// assert_eq!(tuned.max_attempts(), 5);
/// assert_eq!(tuned.base_delay(), base.base_delay());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyOverrides {
    max_attempts: Option<u32>,
    base_delay: Option<Duration>,
    max_delay: Option<Duration>,
    jitter: Option<f64>,
    retryable_kinds: Option<BTreeSet<ErrorKind>>,
    timeout: Option<Option<Duration>>,
}

impl PolicyOverrides {
    /// No overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override `max_attempts`.
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = Some(n);
        self
    }

    /// Override `base_delay`.
    pub fn base_delay(mut self, d: Duration) -> Self {
        self.base_delay = Some(d);
        self
    }

    /// Override `max_delay`.
    pub fn max_delay(mut self, d: Duration) -> Self {
        self.max_delay = Some(d);
        self
    }

    /// Override `jitter`.
    pub fn jitter(mut self, factor: f64) -> Self {
        self.jitter = Some(factor);
        self
    }

    /// Override the retryable kinds.
    pub fn retryable_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable_kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Override the overall budget. `None` removes it.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// True if no field is overridden.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge onto `base` and validate the result.
    pub fn apply_to(&self, base: &RetryPolicy) -> Result<RetryPolicy, PolicyError> {
        let mut builder = base.to_builder();
        if let Some(n) = self.max_attempts {
            builder = builder.max_attempts(n);
        }
        if let Some(d) = self.base_delay {
            builder = builder.base_delay(d);
        }
        if let Some(d) = self.max_delay {
            builder = builder.max_delay(d);
        }
        if let Some(j) = self.jitter {
            builder = builder.jitter(j);
        }
        if let Some(kinds) = &self.retryable_kinds {
            builder = builder.retryable_kinds(kinds.iter().copied());
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        builder.build()
    }
}

#[cfg(test)]
mod policy_tests {
    use super::*;
    use crate::error::DatabaseError;

    fn no_jitter(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(max_attempts)
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(10))
            .jitter(0.0)
            .build()
            .unwrap()
    }

    #[test]
    fn test_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.base_delay(), Duration::from_millis(100));
        assert_eq!(policy.max_delay(), Duration::from_secs(10));
        assert_eq!(policy.jitter(), 0.1);
        assert_eq!(policy.timeout(), None);
        assert_eq!(
            policy.retryable_kinds().iter().copied().collect::<Vec<_>>(),
            vec![
                ErrorKind::Connection,
                ErrorKind::Query,
                ErrorKind::Transaction,
                ErrorKind::DeadlineExceeded,
            ]
        );
    }

    #[test]
    fn test_exponential_delay() {
        let policy = no_jitter(10);

        assert_eq!(policy.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(400));
        assert_eq!(policy.calculate_delay(4), Duration::from_millis(800));
    }

    #[test]
    fn test_max_delay_cap() {
        let policy = RetryPolicy::builder()
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(500))
            .jitter(0.0)
            .build()
            .unwrap();

        assert_eq!(policy.calculate_delay(3), Duration::from_millis(400));
        assert_eq!(policy.calculate_delay(4), Duration::from_millis(500)); // capped
        assert_eq!(policy.calculate_delay(60), Duration::from_millis(500)); // capped
        assert_eq!(policy.calculate_delay(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::builder()
            .base_delay(Duration::from_millis(100))
            .jitter(0.25)
            .build()
            .unwrap();

        for _ in 0..200 {
            let delay = policy.calculate_delay(2);
            assert!(delay >= Duration::from_millis(150), "{:?}", delay);
            assert!(delay <= Duration::from_millis(250), "{:?}", delay);
        }
    }

    #[test]
    fn test_full_jitter_never_negative() {
        let policy = RetryPolicy::builder().jitter(1.0).build().unwrap();
        for _ in 0..200 {
            assert!(policy.calculate_delay(1) <= Duration::from_millis(200));
        }
    }

    #[test]
    fn test_jitter_saturates_at_duration_max() {
        let policy = RetryPolicy::builder()
            .max_attempts(50)
            .base_delay(Duration::from_secs(1))
            .max_delay(Duration::MAX)
            .jitter(0.5)
            .build()
            .unwrap();

        for attempt in [33, 40, 49] {
            let delay = policy.calculate_delay(attempt);
            assert!(delay >= Duration::MAX / 4, "attempt {}: {:?}", attempt, delay);
        }
    }

    #[test]
    fn test_should_retry_by_kind() {
        let policy = no_jitter(3);
        let transient = DatabaseError::new(ErrorKind::Query, "timeout");
        let permanent = DatabaseError::new(ErrorKind::Validation, "bad");

        assert!(policy.should_retry(&transient, 1));
        assert!(policy.should_retry(&transient, 2));
        assert!(!policy.should_retry(&transient, 3));
        assert!(!policy.should_retry(&permanent, 1));
    }

    #[test]
    fn test_should_retry_ignores_unclassified_errors() {
        struct Foreign;
        impl Retryable for Foreign {
            fn kind(&self) -> Option<ErrorKind> {
                None
            }
        }

        assert!(!RetryPolicy::default().should_retry(&Foreign, 1));
    }

    #[test]
    fn test_custom_retryable_kinds() {
        let policy = RetryPolicy::builder()
            .retryable_kinds([ErrorKind::NotFound])
            .build()
            .unwrap();

        assert!(policy.should_retry(&DatabaseError::new(ErrorKind::NotFound, "lag"), 1));
        assert!(!policy.should_retry(&DatabaseError::new(ErrorKind::Connection, "x"), 1));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert_eq!(
            RetryPolicy::builder().max_attempts(0).build(),
            Err(PolicyError::ZeroAttempts)
        );
        assert_eq!(
            RetryPolicy::builder().base_delay(Duration::ZERO).build(),
            Err(PolicyError::ZeroBaseDelay)
        );
        assert_eq!(
            RetryPolicy::builder()
                .base_delay(Duration::from_secs(2))
                .max_delay(Duration::from_secs(1))
                .build(),
            Err(PolicyError::MaxDelayBelowBase {
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(1),
            })
        );
        assert_eq!(
            RetryPolicy::builder().jitter(-0.1).build(),
            Err(PolicyError::JitterOutOfRange(-0.1))
        );
        assert!(RetryPolicy::builder().jitter(f64::NAN).build().is_err());
        assert_eq!(
            RetryPolicy::builder().timeout(Some(Duration::ZERO)).build(),
            Err(PolicyError::ZeroTimeout)
        );
    }

    #[test]
    fn test_equal_base_and_max_delay_is_valid() {
        let policy = RetryPolicy::builder()
            .base_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(1))
            .build();
        assert!(policy.is_ok());
    }

    #[test]
    fn test_describe() {
        let policy = RetryPolicy::builder()
            .timeout(Some(Duration::from_secs(5)))
            .build()
            .unwrap();
        let json = serde_json::to_value(policy.describe()).unwrap();

        assert_eq!(json["max_attempts"], 3);
        assert_eq!(json["base_delay"], 0.1);
        assert_eq!(json["timeout"], 5.0);
        assert_eq!(
            json["retryable_kinds"],
            serde_json::json!(["connection", "query", "transaction", "deadline_exceeded"])
        );
    }

    #[test]
    fn test_overrides_touch_only_named_fields() {
        let base = RetryPolicy::builder()
            .timeout(Some(Duration::from_secs(30)))
            .build()
            .unwrap();
        let tuned = PolicyOverrides::new().max_attempts(5).apply_to(&base).unwrap();

        assert_eq!(tuned.max_attempts(), 5);
        assert_eq!(tuned.base_delay(), base.base_delay());
        assert_eq!(tuned.max_delay(), base.max_delay());
        assert_eq!(tuned.jitter(), base.jitter());
        assert_eq!(tuned.timeout(), base.timeout());
        assert_eq!(tuned.retryable_kinds(), base.retryable_kinds());
    }

    #[test]
    fn test_overrides_can_clear_timeout() {
        let base = RetryPolicy::builder()
            .timeout(Some(Duration::from_secs(30)))
            .build()
            .unwrap();
        let tuned = PolicyOverrides::new().timeout(None).apply_to(&base).unwrap();
        assert_eq!(tuned.timeout(), None);
    }

    #[test]
    fn test_overrides_are_validated() {
        let result = PolicyOverrides::new()
            .max_delay(Duration::from_millis(1))
            .apply_to(&RetryPolicy::default());
        assert!(matches!(result, Err(PolicyError::MaxDelayBelowBase { .. })));
        assert!(PolicyOverrides::new().is_empty());
        assert!(!PolicyOverrides::new().jitter(0.5).is_empty());
    }

    #[test]
    fn test_policy_is_clone() {
        let policy = no_jitter(3);
        assert_eq!(policy.clone(), policy);
    }
}
