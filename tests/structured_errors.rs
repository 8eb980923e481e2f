//! Serialization tests for structured errors

use dbretry::error::{
    ConnectionFields, DuplicateFields, IntegrityFields, NotFoundFields, QueryFields,
    TransactionFields, ValidationFields,
};
use dbretry::{DatabaseError, ErrorKind, StructuredError};
use serde_json::json;
use std::io;
use std::time::Duration;

fn one_of_each() -> Vec<DatabaseError> {
    vec![
        DatabaseError::connection(
            "cannot reach primary",
            ConnectionFields::new()
                .param("host", "pg-1")
                .param("port", 5432)
                .param("auth_token", "abc")
                .retry_count(1)
                .max_retries(3),
        )
        .with_backend("postgresql"),
        DatabaseError::query(
            "statement failed",
            QueryFields::new()
                .query("SELECT * FROM users WHERE id = $1")
                .params(json!([42]))
                .execution_time(Duration::from_millis(8)),
        )
        .with_code("40P01"),
        DatabaseError::validation(
            "invalid activity",
            ValidationFields::new()
                .field_error("title", "required")
                .field_error("duration", "must be positive")
                .model("Activity")
                .value(json!({"duration": -5})),
        ),
        DatabaseError::integrity(
            "foreign key violation",
            IntegrityFields::new()
                .constraint("fk_activity_user")
                .table("activities")
                .columns(["user_id"]),
        ),
        DatabaseError::not_found(
            "mood entry not found",
            NotFoundFields::new()
                .resource_type("MoodEntry")
                .resource_id("65f1c0")
                .query_param("user_id", 7),
        )
        .with_backend("mongodb"),
        DatabaseError::duplicate(
            "user exists",
            DuplicateFields::new()
                .resource_type("User")
                .unique_field("email")
                .duplicate_value("a@example.com"),
        ),
        DatabaseError::transaction_failure(
            io::Error::other("serialization failure"),
            "commit",
            Some("tx-42".into()),
        ),
        DatabaseError::deadline_exceeded("budget spent", Duration::from_secs(2)),
        DatabaseError::new(ErrorKind::CircuitOpen, "circuit 'orders' is open, request rejected")
            .with_detail("circuit_name", "orders")
            .with_detail("state", "open"),
    ]
}

#[test]
fn test_round_trip_preserves_kind_message_and_details() {
    for err in one_of_each() {
        let json = serde_json::to_string(&err.to_structured()).unwrap();
        let structured: StructuredError = serde_json::from_str(&json).unwrap();
        let back = DatabaseError::from_structured(structured);

        assert_eq!(back.kind(), err.kind());
        assert_eq!(back.message(), err.message());
        assert_eq!(back.details(), err.details());
        assert_eq!(back.code(), err.code());
        assert_eq!(back.backend(), err.backend());
        assert_eq!(back.to_string(), err.to_string());
    }
}

#[test]
fn test_every_kind_is_covered() {
    let kinds: Vec<_> = one_of_each().iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, ErrorKind::ALL.to_vec());
}

#[test]
fn test_structured_json_shape() {
    let err = DatabaseError::connection(
        "cannot reach primary",
        ConnectionFields::new()
            .param("host", "pg-1")
            .param("auth_token", "abc"),
    )
    .with_cause(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));

    let json = serde_json::to_value(err.to_structured()).unwrap();
    assert_eq!(
        json,
        json!({
            "kind": "connection",
            "message": "cannot reach primary",
            "details": {
                "connection_params": {"host": "pg-1", "auth_token": "***"}
            },
            "cause": {"type": "Error", "message": "refused"}
        })
    );
}

#[test]
fn test_details_keep_insertion_order() {
    let err = DatabaseError::validation(
        "invalid",
        ValidationFields::new()
            .field_error("zeta", "bad")
            .field_error("alpha", "bad")
            .model("Thing"),
    )
    .with_detail("request_id", "r-1");

    let keys: Vec<_> = err.details().keys().cloned().collect();
    assert_eq!(keys, vec!["field_errors", "model", "request_id"]);

    let json = serde_json::to_string(&err.to_structured()).unwrap();
    assert!(json.find("zeta").unwrap() < json.find("alpha").unwrap());
}
