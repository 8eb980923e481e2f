//! Serializable representation of a [`DatabaseError`].

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Cause, DatabaseError, Details, ErrorKind};

/// A wrapped cause reduced to its type name and message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredCause {
    /// Short type name of the original error.
    #[serde(rename = "type")]
    pub type_name: String,
    /// The original error's message.
    pub message: String,
}

/// Plain-data form of a [`DatabaseError`], safe to log or send to clients.
///
/// # Examples
///
/// ```rust
/// use dbretry::error::{DatabaseError, DuplicateFields};
///
/// let err = DatabaseError::duplicate(
///     "email already registered",
///     DuplicateFields::new().unique_field("email").duplicate_value("a@b.c"),
/// );
///
/// let json = serde_json::to_value(err.to_structured()).unwrap();
/// assert_eq!(json["kind"], "duplicate");
/// assert_eq!(json["details"]["unique_field"], "email");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    /// Classification tag.
    pub kind: ErrorKind,
    /// Bare message.
    pub message: String,
    /// Details in insertion order.
    #[serde(default)]
    pub details: Details,
    /// Backend error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Backend name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    /// Reduced cause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<StructuredCause>,
    /// Attempts made by the retry executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
    /// Time spent in the retry executor, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_duration_ms: Option<f64>,
}

/// Stand-in for a cause that was restored from a [`StructuredError`].
///
/// The original error object is gone; only its type name and message survive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCause {
    type_name: String,
    message: String,
}

impl RecordedCause {
    /// Type name of the original error.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

impl fmt::Display for RecordedCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for RecordedCause {}

impl DatabaseError {
    /// Reduce to plain data. The cause becomes `{type, message}`.
    pub fn to_structured(&self) -> StructuredError {
        StructuredError {
            kind: self.kind,
            message: self.message.clone(),
            details: self.details.clone(),
            code: self.code.clone(),
            backend: self.backend.clone(),
            cause: self.cause.as_ref().map(|cause| StructuredCause {
                type_name: cause.type_name.clone(),
                message: cause.error.to_string(),
            }),
            retry_attempts: self.retry_attempts,
            retry_duration_ms: self.retry_duration.map(|d| d.as_secs_f64() * 1000.0),
        }
    }

    /// Rebuild an error from its structured form.
    pub fn from_structured(structured: StructuredError) -> Self {
        let cause = structured.cause.map(|cause| Cause {
            type_name: cause.type_name.clone(),
            error: Box::new(RecordedCause {
                type_name: cause.type_name,
                message: cause.message,
            }),
        });
        DatabaseError {
            kind: structured.kind,
            message: structured.message,
            details: structured.details,
            code: structured.code,
            backend: structured.backend,
            cause,
            retry_attempts: structured.retry_attempts,
            retry_duration: structured
                .retry_duration_ms
                .and_then(|ms| Duration::try_from_secs_f64(ms / 1000.0).ok()),
        }
    }
}

impl From<StructuredError> for DatabaseError {
    fn from(structured: StructuredError) -> Self {
        DatabaseError::from_structured(structured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConnectionFields, ValidationFields};
    use serde_json::json;
    use std::io;

    #[test]
    fn test_cause_is_reduced_to_type_and_message() {
        let cause = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = DatabaseError::wrap(ErrorKind::Connection, cause);

        let structured = err.to_structured();
        assert_eq!(
            structured.cause,
            Some(StructuredCause {
                type_name: "Error".into(),
                message: "refused".into(),
            })
        );

        let json = serde_json::to_value(&structured).unwrap();
        assert_eq!(json["cause"], json!({"type": "Error", "message": "refused"}));
    }

    #[test]
    fn test_optional_members_are_omitted() {
        let err = DatabaseError::new(ErrorKind::NotFound, "missing");
        let json = serde_json::to_value(err.to_structured()).unwrap();
        assert_eq!(
            json,
            json!({"kind": "not_found", "message": "missing", "details": {}})
        );
    }

    #[test]
    fn test_rehydration_preserves_kind_message_and_details() {
        let err = DatabaseError::connection(
            "pool exhausted",
            ConnectionFields::new().param("host", "db").retry_count(3),
        )
        .with_cause(io::Error::other("no slots"));

        let json = serde_json::to_string(&err.to_structured()).unwrap();
        let back = DatabaseError::from_structured(serde_json::from_str(&json).unwrap());

        assert_eq!(back.kind(), ErrorKind::Connection);
        assert_eq!(back.message(), "pool exhausted");
        assert_eq!(back.details(), err.details());
        assert_eq!(back.cause_type(), Some("Error"));
        assert_eq!(back.to_string(), err.to_string());
    }

    #[test]
    fn test_validation_summary_survives_rehydration() {
        let err = DatabaseError::validation(
            "bad input",
            ValidationFields::new().field_error("name", "required"),
        );
        let back: DatabaseError = err.to_structured().into();
        assert!(back.to_string().ends_with("field errors: name: required"));
    }

    #[test]
    fn test_retry_annotations_round_trip() {
        let mut err = DatabaseError::new(ErrorKind::Query, "slow");
        err.annotate_retry(3, Duration::from_millis(250));

        let structured = err.to_structured();
        assert_eq!(structured.retry_attempts, Some(3));
        assert_eq!(structured.retry_duration_ms, Some(250.0));

        let back = DatabaseError::from_structured(structured);
        assert_eq!(back.retry_attempts(), Some(3));
        assert_eq!(back.retry_duration(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_unrepresentable_retry_duration_is_dropped() {
        for raw in ["1e300", "-5.0"] {
            let json = format!(
                r#"{{"kind":"query","message":"m","details":{{}},"retry_attempts":2,"retry_duration_ms":{}}}"#,
                raw
            );
            let structured: StructuredError = serde_json::from_str(&json).unwrap();

            let back = DatabaseError::from_structured(structured);
            assert_eq!(back.retry_duration(), None, "{}", raw);
            assert_eq!(back.retry_attempts(), Some(2));
        }
    }
}
