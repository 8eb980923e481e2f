//! Structured database errors.
//!
//! Every failure that crosses the persistence boundary is a [`DatabaseError`]:
//! a closed [`ErrorKind`] tag, a human message, an ordered map of
//! machine-readable details, and optionally the lower-level error that caused
//! it. The kind drives retry classification; the details drive logging and
//! client-facing serialization.
//!
//! # Examples
//!
//! ```rust
//! use dbretry::error::{DatabaseError, ErrorKind, NotFoundFields};
//!
//! let err = DatabaseError::not_found(
//!     "user does not exist",
//!     NotFoundFields::new().resource_type("User").resource_id(42),
//! );
//!
//! assert_eq!(err.kind(), ErrorKind::NotFound);
//! assert_eq!(err.details()["resource_id"], "42");
//! ```
//!
//! Converting a driver failure without losing it:
//!
//! ```rust
//! use dbretry::error::{DatabaseError, ErrorKind};
//! use std::error::Error;
//! use std::io;
//!
//! let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
//! let err = DatabaseError::wrap(ErrorKind::Connection, io_err);
//!
//! assert_eq!(err.message(), "refused");
//! assert!(err.source().is_some());
//! ```

mod fields;
mod kind;
mod structured;

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use serde_json::Value;

pub use fields::{
    is_secret_key, ConnectionFields, DuplicateFields, IntegrityFields, KindFields, NotFoundFields,
    QueryFields, TransactionFields, ValidationFields, REDACTED,
};
pub use kind::{ErrorKind, UnknownKind};
pub use structured::{RecordedCause, StructuredCause, StructuredError};

/// Ordered string-keyed detail map attached to every error.
pub type Details = serde_json::Map<String, Value>;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The lower-level error a [`DatabaseError`] was built from.
#[derive(Debug)]
pub(crate) struct Cause {
    type_name: String,
    error: BoxError,
}

impl Cause {
    fn new<C>(error: C) -> Self
    where
        C: StdError + Send + Sync + 'static,
    {
        Self {
            type_name: short_type_name(std::any::type_name::<C>()),
            error: Box::new(error),
        }
    }
}

/// `std::io::error::Error` -> `Error`, generic arguments dropped.
fn short_type_name(full: &str) -> String {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// A classified failure with structured diagnostics.
///
/// Created where the failure happens, optionally annotated once by the retry
/// executor with the attempt count and elapsed time, then handed to the
/// caller unchanged.
#[derive(Debug)]
pub struct DatabaseError {
    kind: ErrorKind,
    message: String,
    details: Details,
    code: Option<String>,
    backend: Option<String>,
    cause: Option<Cause>,
    retry_attempts: Option<u32>,
    retry_duration: Option<Duration>,
}

impl DatabaseError {
    /// Create an error of `kind` with no extra fields.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Details::new(),
            code: None,
            backend: None,
            cause: None,
            retry_attempts: None,
            retry_duration: None,
        }
    }

    /// Create an error whose kind is fixed by the field set.
    pub fn with_fields<F: KindFields>(message: impl Into<String>, fields: F) -> Self {
        let mut err = Self::new(F::KIND, message);
        fields.merge_into(&mut err.details);
        err
    }

    /// Connectivity failure.
    pub fn connection(message: impl Into<String>, fields: ConnectionFields) -> Self {
        Self::with_fields(message, fields)
    }

    /// Query execution failure.
    pub fn query(message: impl Into<String>, fields: QueryFields) -> Self {
        Self::with_fields(message, fields)
    }

    /// Invalid caller input.
    pub fn validation(message: impl Into<String>, fields: ValidationFields) -> Self {
        Self::with_fields(message, fields)
    }

    /// Constraint violation.
    pub fn integrity(message: impl Into<String>, fields: IntegrityFields) -> Self {
        Self::with_fields(message, fields)
    }

    /// Missing resource.
    pub fn not_found(message: impl Into<String>, fields: NotFoundFields) -> Self {
        Self::with_fields(message, fields)
    }

    /// Uniqueness violation.
    pub fn duplicate(message: impl Into<String>, fields: DuplicateFields) -> Self {
        Self::with_fields(message, fields)
    }

    /// Transaction lifecycle failure.
    pub fn transaction(message: impl Into<String>, fields: TransactionFields) -> Self {
        Self::with_fields(message, fields)
    }

    /// Overall time budget exhausted.
    pub fn deadline_exceeded(message: impl Into<String>, budget: Duration) -> Self {
        Self::new(ErrorKind::DeadlineExceeded, message)
            .with_detail("timeout_secs", budget.as_secs_f64())
    }

    /// Convert a lower-level error into a `DatabaseError` of `kind`,
    /// using the cause's own message.
    pub fn wrap<C>(kind: ErrorKind, cause: C) -> Self
    where
        C: StdError + Send + Sync + 'static,
    {
        let message = cause.to_string();
        Self::wrap_with_message(kind, cause, message)
    }

    /// Like [`wrap`](Self::wrap) with a caller-supplied message.
    pub fn wrap_with_message<C>(kind: ErrorKind, cause: C, message: impl Into<String>) -> Self
    where
        C: StdError + Send + Sync + 'static,
    {
        Self::new(kind, message).with_cause(cause)
    }

    /// Wrap a failure raised while running a transaction step.
    pub fn transaction_failure<C>(
        cause: C,
        operation: impl Into<String>,
        transaction_id: Option<String>,
    ) -> Self
    where
        C: StdError + Send + Sync + 'static,
    {
        let operation = operation.into();
        let message = format!("transaction failed during '{}': {}", operation, cause);
        let mut fields = TransactionFields::new().operation(operation);
        if let Some(id) = transaction_id {
            fields = fields.transaction_id(id);
        }
        Self::transaction(message, fields).with_cause(cause)
    }

    /// Attach the lower-level error.
    pub fn with_cause<C>(mut self, cause: C) -> Self
    where
        C: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Cause::new(cause));
        self
    }

    /// Add a free-form detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Attach a backend-specific error code (SQLSTATE, Mongo code, ...).
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Name the backend that produced the error.
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    /// The classification tag.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The bare message, without details or field summaries.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Kind-specific and free-form details, in insertion order.
    pub fn details(&self) -> &Details {
        &self.details
    }

    /// Backend error code, if any.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Backend name, if any.
    pub fn backend(&self) -> Option<&str> {
        self.backend.as_deref()
    }

    /// Short type name of the wrapped cause.
    pub fn cause_type(&self) -> Option<&str> {
        self.cause.as_ref().map(|c| c.type_name.as_str())
    }

    /// Number of attempts made before this error was returned by the retry
    /// executor. `None` if the error never passed through one.
    pub fn retry_attempts(&self) -> Option<u32> {
        self.retry_attempts
    }

    /// Wall-clock time from the first attempt until the executor gave up.
    pub fn retry_duration(&self) -> Option<Duration> {
        self.retry_duration
    }

    /// Record retry metadata. Existing values are kept, so the innermost
    /// executor wins when executors are nested.
    pub(crate) fn annotate_retry(&mut self, attempts: u32, elapsed: Duration) {
        self.retry_attempts.get_or_insert(attempts);
        self.retry_duration.get_or_insert(elapsed);
    }

    fn field_error_summary(&self) -> Option<String> {
        if self.kind != ErrorKind::Validation {
            return None;
        }
        let fields = self.details.get("field_errors")?.as_object()?;
        if fields.is_empty() {
            return None;
        }
        let summary = fields
            .iter()
            .map(|(field, errors)| {
                let errors = errors
                    .as_array()
                    .map(|errors| {
                        errors
                            .iter()
                            .map(display_value)
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_else(|| display_value(errors));
                format!("{}: {}", field, errors)
            })
            .collect::<Vec<_>>()
            .join("; ");
        Some(summary)
    }
}

/// Strings without quotes, everything else as JSON.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(code) = &self.code {
            write!(f, " [code: {}]", code)?;
        }
        if let Some(backend) = &self.backend {
            write!(f, " [backend: {}]", backend)?;
        }
        if !self.details.is_empty() {
            let details = self
                .details
                .iter()
                .map(|(k, v)| format!("{}={}", k, display_value(v)))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, " [details: {}]", details)?;
        }
        if let Some(cause) = &self.cause {
            write!(f, " [cause: {}: {}]", cause.type_name, cause.error)?;
        }
        if let Some(summary) = self.field_error_summary() {
            write!(f, " field errors: {}", summary)?;
        }
        Ok(())
    }
}

impl StdError for DatabaseError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.error.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<crate::retry::PolicyError> for DatabaseError {
    fn from(err: crate::retry::PolicyError) -> Self {
        let message = err.to_string();
        DatabaseError::validation(
            "invalid retry policy",
            ValidationFields::new()
                .field_error(err.field(), message)
                .model("RetryPolicy"),
        )
    }
}
