//! Kind-specific field sets.
//!
//! Each error kind accepts a fixed set of extra fields. The builders here are
//! the only way to attach them, so a `NotFound` error can never carry a
//! constraint name and a `Connection` error can never leak a password.
//! Every builder merges its fields into the error's `details` map under
//! fixed keys.

use std::fmt::Display;
use std::time::Duration;

use serde_json::Value;

use super::{Details, ErrorKind};

/// Placeholder written over redacted connection parameters.
pub const REDACTED: &str = "***";

const SECRET_MARKERS: [&str; 6] = ["password", "pwd", "secret", "key", "token", "auth"];

/// Returns true if a connection parameter key looks like it holds a secret.
pub fn is_secret_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SECRET_MARKERS.iter().any(|marker| key.contains(marker))
}

/// A typed set of extra fields belonging to exactly one [`ErrorKind`].
pub trait KindFields {
    /// The kind these fields belong to.
    const KIND: ErrorKind;

    /// Write the populated fields into `details`.
    fn merge_into(self, details: &mut Details);
}

fn put<V: Into<Value>>(details: &mut Details, key: &str, value: Option<V>) {
    if let Some(value) = value {
        details.insert(key.to_string(), value.into());
    }
}

/// Fields for [`ErrorKind::Connection`].
///
/// ```rust
/// use dbretry::error::ConnectionFields;
/// use dbretry::DatabaseError;
///
/// let err = DatabaseError::connection(
///     "connection refused",
///     ConnectionFields::new()
///         .param("host", "db.internal")
///         .param("password", "hunter2")
///         .retry_count(2),
/// );
///
/// let params = &err.details()["connection_params"];
/// assert_eq!(params["host"], "db.internal");
/// assert_eq!(params["password"], "***");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionFields {
    params: Details,
    retry_count: Option<u32>,
    max_retries: Option<u32>,
}

impl ConnectionFields {
    /// Empty field set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection parameter. Secret-looking keys are redacted.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = if is_secret_key(&key) {
            Value::from(REDACTED)
        } else {
            value.into()
        };
        self.params.insert(key, value);
        self
    }

    /// Record several connection parameters at once.
    pub fn params<K, V, I>(self, params: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        params
            .into_iter()
            .fold(self, |fields, (key, value)| fields.param(key, value))
    }

    /// How many connection attempts the driver already made.
    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    /// The driver's own connection attempt limit.
    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }
}

impl KindFields for ConnectionFields {
    const KIND: ErrorKind = ErrorKind::Connection;

    fn merge_into(self, details: &mut Details) {
        if !self.params.is_empty() {
            details.insert("connection_params".into(), Value::Object(self.params));
        }
        put(details, "retry_count", self.retry_count);
        put(details, "max_retries", self.max_retries);
    }
}

/// Fields for [`ErrorKind::Query`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFields {
    query: Option<String>,
    params: Option<Value>,
    execution_time: Option<Duration>,
}

impl QueryFields {
    /// Empty field set.
    pub fn new() -> Self {
        Self::default()
    }

    /// SQL text, or the operation name for document stores.
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Bound query parameters.
    pub fn params(mut self, params: impl Into<Value>) -> Self {
        self.params = Some(params.into());
        self
    }

    /// How long the query ran before failing.
    pub fn execution_time(mut self, elapsed: Duration) -> Self {
        self.execution_time = Some(elapsed);
        self
    }
}

impl KindFields for QueryFields {
    const KIND: ErrorKind = ErrorKind::Query;

    fn merge_into(self, details: &mut Details) {
        put(details, "query", self.query);
        put(details, "params", self.params);
        put(
            details,
            "execution_time",
            self.execution_time
                .map(|elapsed| format!("{:.2}ms", elapsed.as_secs_f64() * 1000.0)),
        );
    }
}

/// Fields for [`ErrorKind::Validation`].
///
/// Field errors keep the order in which fields were first mentioned; that
/// order is used when the error message is rendered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationFields {
    field_errors: Vec<(String, Vec<String>)>,
    model: Option<String>,
    value: Option<Value>,
}

impl ValidationFields {
    /// Empty field set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one error message for `field`.
    pub fn field_error(mut self, field: impl Into<String>, error: impl Into<String>) -> Self {
        let field = field.into();
        let error = error.into();
        match self.field_errors.iter_mut().find(|(name, _)| *name == field) {
            Some((_, errors)) => errors.push(error),
            None => self.field_errors.push((field, vec![error])),
        }
        self
    }

    /// The model or collection being validated.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// The offending value.
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }
}

impl KindFields for ValidationFields {
    const KIND: ErrorKind = ErrorKind::Validation;

    fn merge_into(self, details: &mut Details) {
        if !self.field_errors.is_empty() {
            let map: Details = self
                .field_errors
                .into_iter()
                .map(|(field, errors)| (field, Value::from(errors)))
                .collect();
            details.insert("field_errors".into(), Value::Object(map));
        }
        put(details, "model", self.model);
        put(details, "value", self.value);
    }
}

/// Fields for [`ErrorKind::Integrity`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrityFields {
    constraint_name: Option<String>,
    table_name: Option<String>,
    columns: Vec<String>,
}

impl IntegrityFields {
    /// Empty field set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the violated constraint.
    pub fn constraint(mut self, name: impl Into<String>) -> Self {
        self.constraint_name = Some(name.into());
        self
    }

    /// Table or collection the constraint belongs to.
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table_name = Some(name.into());
        self
    }

    /// Columns covered by the constraint.
    pub fn columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }
}

impl KindFields for IntegrityFields {
    const KIND: ErrorKind = ErrorKind::Integrity;

    fn merge_into(self, details: &mut Details) {
        put(details, "constraint_name", self.constraint_name);
        put(details, "table_name", self.table_name);
        if !self.columns.is_empty() {
            details.insert("columns".into(), Value::from(self.columns));
        }
    }
}

/// Fields for [`ErrorKind::NotFound`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotFoundFields {
    resource_type: Option<String>,
    resource_id: Option<String>,
    query_params: Details,
}

impl NotFoundFields {
    /// Empty field set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resource type, e.g. `"User"`.
    pub fn resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    /// Identifier that was looked up. Stored as a string.
    pub fn resource_id(mut self, id: impl Display) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    /// A lookup parameter that produced no match.
    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }
}

impl KindFields for NotFoundFields {
    const KIND: ErrorKind = ErrorKind::NotFound;

    fn merge_into(self, details: &mut Details) {
        put(details, "resource_type", self.resource_type);
        put(details, "resource_id", self.resource_id);
        if !self.query_params.is_empty() {
            details.insert("query_params".into(), Value::Object(self.query_params));
        }
    }
}

/// Fields for [`ErrorKind::Duplicate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplicateFields {
    resource_type: Option<String>,
    unique_field: Option<String>,
    duplicate_value: Option<String>,
}

impl DuplicateFields {
    /// Empty field set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resource type, e.g. `"User"`.
    pub fn resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    /// The field carrying the uniqueness constraint.
    pub fn unique_field(mut self, field: impl Into<String>) -> Self {
        self.unique_field = Some(field.into());
        self
    }

    /// The colliding value. Stored as a string.
    pub fn duplicate_value(mut self, value: impl Display) -> Self {
        self.duplicate_value = Some(value.to_string());
        self
    }
}

impl KindFields for DuplicateFields {
    const KIND: ErrorKind = ErrorKind::Duplicate;

    fn merge_into(self, details: &mut Details) {
        put(details, "resource_type", self.resource_type);
        put(details, "unique_field", self.unique_field);
        put(details, "duplicate_value", self.duplicate_value);
    }
}

/// Fields for [`ErrorKind::Transaction`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionFields {
    transaction_id: Option<String>,
    operation: Option<String>,
    state: Option<String>,
}

impl TransactionFields {
    /// Empty field set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transaction identifier.
    pub fn transaction_id(mut self, id: impl Into<String>) -> Self {
        self.transaction_id = Some(id.into());
        self
    }

    /// The lifecycle step that failed (`begin`, `commit`, `rollback`, ...).
    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Transaction state at the time of failure.
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }
}

impl KindFields for TransactionFields {
    const KIND: ErrorKind = ErrorKind::Transaction;

    fn merge_into(self, details: &mut Details) {
        put(details, "transaction_id", self.transaction_id);
        put(details, "operation", self.operation);
        put(details, "state", self.state);
    }
}
