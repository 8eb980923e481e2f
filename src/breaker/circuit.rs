//! The circuit breaker state machine.

use std::collections::BTreeSet;
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::error::BreakerConfigError;
use crate::error::{DatabaseError, ErrorKind};
use crate::retry::Retryable;

/// Default number of consecutive failures that opens the circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
/// Default time the circuit stays open before admitting trial calls.
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);
/// Default number of trial calls admitted while half-open.
pub const DEFAULT_HALF_OPEN_MAX_CALLS: u32 = 3;

/// Where a circuit is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through; consecutive failures are counted.
    Closed,
    /// Calls are rejected until the recovery timeout elapses.
    Open,
    /// A limited number of trial calls decide whether to close or reopen.
    HalfOpen,
}

impl CircuitState {
    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for one circuit breaker.
///
/// # Examples
///
/// ```rust
/// use dbretry::breaker::BreakerConfig;
/// use dbretry::ErrorKind;
/// use std::time::Duration;
///
/// let config = BreakerConfig::default()
///     .with_failure_threshold(3)
///     .with_recovery_timeout(Duration::from_secs(10))
///     .with_excluded_kinds([ErrorKind::NotFound, ErrorKind::Validation]);
///
/// assert_eq!(config.failure_threshold(), 3);
/// assert!(config.excluded_kinds().contains(&ErrorKind::NotFound));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    failure_threshold: u32,
    recovery_timeout: Duration,
    half_open_max_calls: u32,
    call_timeout: Option<Duration>,
    excluded_kinds: BTreeSet<ErrorKind>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
            half_open_max_calls: DEFAULT_HALF_OPEN_MAX_CALLS,
            call_timeout: None,
            excluded_kinds: BTreeSet::new(),
        }
    }
}

impl BreakerConfig {
    /// Consecutive failures needed to open the circuit.
    pub fn with_failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n;
        self
    }

    /// How long the circuit stays open before admitting trial calls.
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Trial calls admitted while half-open. This many successes close the
    /// circuit.
    pub fn with_half_open_max_calls(mut self, n: u32) -> Self {
        self.half_open_max_calls = n;
        self
    }

    /// Time limit for each call made through the breaker. A call that runs
    /// over counts as a failure.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Error kinds that are passed through without counting as failures.
    pub fn with_excluded_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.excluded_kinds = kinds.into_iter().collect();
        self
    }

    /// Consecutive failures needed to open the circuit.
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Time spent open before admitting trial calls.
    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    /// Trial calls admitted while half-open.
    pub fn half_open_max_calls(&self) -> u32 {
        self.half_open_max_calls
    }

    /// Per-call time limit, if any.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    /// Kinds that never count as failures.
    pub fn excluded_kinds(&self) -> &BTreeSet<ErrorKind> {
        &self.excluded_kinds
    }

    fn validate(&self) -> Result<(), BreakerConfigError> {
        if self.failure_threshold == 0 {
            return Err(BreakerConfigError::ZeroFailureThreshold);
        }
        if self.recovery_timeout.is_zero() {
            return Err(BreakerConfigError::ZeroRecoveryTimeout);
        }
        if self.half_open_max_calls == 0 {
            return Err(BreakerConfigError::ZeroHalfOpenCalls);
        }
        if self.call_timeout.is_some_and(|t| t.is_zero()) {
            return Err(BreakerConfigError::ZeroCallTimeout);
        }
        Ok(())
    }
}

/// Point-in-time view of a breaker, for health endpoints and logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitStats {
    /// Breaker name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures counted while closed.
    pub failures: u32,
    /// Failures needed to open.
    pub failure_threshold: u32,
    /// Message of the failure that last counted against the circuit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    in_flight: u32,
    opened_at: Option<Instant>,
    last_error: Option<String>,
    // Bumped on every transition so outcomes of calls admitted under an
    // earlier state are ignored.
    generation: u64,
}

/// Guards calls to a dependency, failing fast once it looks unhealthy.
///
/// Closed, it counts consecutive failures and opens at the threshold. Open,
/// it rejects calls with a [`CircuitOpen`](ErrorKind::CircuitOpen) error
/// until `recovery_timeout` has passed. Half-open, it admits up to
/// `half_open_max_calls` trial calls: that many successes close it, any failure
/// reopens it.
///
/// `CircuitOpen` is not a transient kind, so a breaker inside
/// [`retry`](crate::retry()) ends the retry loop as soon as it opens.
///
/// # Examples
///
/// ```rust
/// use dbretry::breaker::{BreakerConfig, CircuitBreaker, CircuitState};
/// use dbretry::{DatabaseError, ErrorKind};
///
/// # tokio_test::block_on(async {
/// let breaker = CircuitBreaker::new("orders-db", BreakerConfig::default().with_failure_threshold(2))
///     .unwrap();
///
/// for _ in 0..2 {
///     let _ = breaker
///         .call(|| async { Err::<(), _>(DatabaseError::new(ErrorKind::Connection, "refused")) })
///         .await;
/// }
/// assert_eq!(breaker.state(), CircuitState::Open);
///
/// let err = breaker.call(|| async { Ok::<_, DatabaseError>(1) }).await.unwrap_err();
/// assert_eq!(err.kind(), ErrorKind::CircuitOpen);
/// # });
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// A closed breaker named `name`.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Result<Self, BreakerConfigError> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                in_flight: 0,
                opened_at: None,
                last_error: None,
                generation: 0,
            }),
        })
    }

    /// The breaker's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The breaker's settings.
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state. An open circuit whose recovery timeout has passed
    /// reports (and becomes) half-open.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Consecutive failures counted while closed.
    pub fn failures(&self) -> u32 {
        self.lock().failures
    }

    /// Whether a call made now would be admitted. Does not reserve a
    /// half-open trial slot.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        self.admits(&inner)
    }

    /// Snapshot for reporting.
    pub fn stats(&self) -> CircuitStats {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        CircuitStats {
            name: self.name.clone(),
            state: inner.state,
            failures: inner.failures,
            failure_threshold: self.config.failure_threshold,
            last_error: inner.last_error.clone(),
        }
    }

    /// Run `operation` through the breaker.
    ///
    /// A rejected call never runs `operation` and fails with a
    /// `CircuitOpen` error. Errors whose kind is excluded pass through
    /// without counting; unclassified errors count as failures. Dropping the
    /// returned future gives back any half-open trial slot it held.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + From<DatabaseError> + Display,
    {
        let permit = self.admit().map_err(E::from)?;

        let outcome = match self.config.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result,
                Err(_) => Err(E::from(DatabaseError::deadline_exceeded(
                    format!("call through circuit '{}' timed out after {:?}", self.name, limit),
                    limit,
                ))),
            },
            None => operation().await,
        };

        match &outcome {
            Ok(_) => permit.succeeded(),
            Err(error) => match error.kind() {
                Some(kind) if self.config.excluded_kinds.contains(&kind) => drop(permit),
                kind => permit.failed(kind, error.to_string()),
            },
        }
        outcome
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admits(&self, inner: &Inner) -> bool {
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                inner.successes + inner.in_flight < self.config.half_open_max_calls
            }
        }
    }

    fn admit(&self) -> Result<Permit<'_>, DatabaseError> {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        if !self.admits(&inner) {
            return Err(self.rejection(&inner));
        }

        let half_open = inner.state == CircuitState::HalfOpen;
        if half_open {
            inner.in_flight += 1;
        }
        Ok(Permit {
            breaker: self,
            generation: inner.generation,
            half_open,
            settled: false,
        })
    }

    fn rejection(&self, inner: &Inner) -> DatabaseError {
        let mut err = DatabaseError::new(
            ErrorKind::CircuitOpen,
            format!("circuit '{}' is {}, request rejected", self.name, inner.state),
        )
        .with_detail("circuit_name", self.name.as_str())
        .with_detail("state", inner.state.as_str());
        if let Some(opened_at) = inner.opened_at.filter(|_| inner.state == CircuitState::Open) {
            let remaining = self
                .config
                .recovery_timeout
                .saturating_sub(opened_at.elapsed());
            err = err.with_detail("retry_after_secs", remaining.as_secs_f64());
        }
        if let Some(last) = &inner.last_error {
            err = err.with_detail("last_error", last.as_str());
        }
        err
    }

    fn refresh(&self, inner: &mut Inner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let due = inner
            .opened_at
            .is_none_or(|at| at.elapsed() >= self.config.recovery_timeout);
        if due {
            self.transition(inner, CircuitState::HalfOpen);
        }
    }

    fn transition(&self, inner: &mut Inner, next: CircuitState) {
        inner.state = next;
        inner.successes = 0;
        inner.in_flight = 0;
        inner.generation += 1;

        match next {
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
                tracing::warn!(
                    circuit = %self.name,
                    failures = inner.failures,
                    last_error = inner.last_error.as_deref().unwrap_or(""),
                    recovery_timeout = ?self.config.recovery_timeout,
                    "circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                tracing::info!(
                    circuit = %self.name,
                    half_open_max_calls = self.config.half_open_max_calls,
                    "circuit half-open, admitting trial calls"
                );
            }
            CircuitState::Closed => {
                inner.failures = 0;
                inner.opened_at = None;
                inner.last_error = None;
                tracing::info!(circuit = %self.name, "circuit closed after successful trial calls");
            }
        }
    }

    fn record_success(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.in_flight = inner.in_flight.saturating_sub(1);
                inner.successes += 1;
                if inner.successes >= self.config.half_open_max_calls {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, generation: u64, kind: Option<ErrorKind>, message: String) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        inner.last_error = Some(message);
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                } else {
                    tracing::debug!(
                        circuit = %self.name,
                        failures = inner.failures,
                        threshold = self.config.failure_threshold,
                        error_kind = kind.map_or("unclassified", ErrorKind::as_str),
                        "circuit recorded failure"
                    );
                }
            }
            CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    fn release(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation && inner.state == CircuitState::HalfOpen {
            inner.in_flight = inner.in_flight.saturating_sub(1);
        }
    }
}

/// An admitted call. Dropped unsettled, it frees its half-open slot.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    half_open: bool,
    settled: bool,
}

impl Permit<'_> {
    fn succeeded(mut self) {
        self.settled = true;
        self.breaker.record_success(self.generation);
    }

    fn failed(mut self, kind: Option<ErrorKind>, message: String) {
        self.settled = true;
        self.breaker.record_failure(self.generation, kind, message);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.half_open {
            self.breaker.release(self.generation);
        }
    }
}
