//! Error handling and edge case tests.

use serde_json::{json, Map, Value};
use sift::{
    build_condition, compile, CompiledCondition, DeclaredField, EntitySchema, FallbackFailure,
    FieldPredicate, FilterSource, FilterValue, Introspectable, MailConfig, NotificationKind,
    NotificationMessage, NotifierConfig, Outbox, PageRequest, QueryError, QueueBroker, RecordTable,
    ResilientNotifier, TemplateMailer,
};
use std::sync::Arc;

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn fixture() -> RecordTable {
    let table = RecordTable::new(EntitySchema::new("user", ["name", "email"]));
    for name in ["Anna", "Hannah", "Bob"] {
        table
            .insert_json(&json!({"name": name, "email": format!("{}@example.com", name.to_lowercase())}))
            .unwrap();
    }
    table
}

// --- Filter Errors ---

#[test]
fn test_unknown_field_fails_before_scan() {
    let table = fixture();
    let query = params(json!({"name": "ann", "nickname": "x"}));

    let err = build_condition(table.schema(), FilterSource::Map(&query)).unwrap_err();
    assert!(matches!(err, QueryError::UnknownField { ref field, .. } if field == "nickname"));
    assert_eq!(err.status_code(), 400);
    assert!(err.to_string().starts_with("Error filtering"));
}

#[test]
fn test_field_names_are_case_sensitive() {
    let table = fixture();
    let query = params(json!({"Name": "ann"}));
    assert!(matches!(
        build_condition(table.schema(), FilterSource::Map(&query)),
        Err(QueryError::UnknownField { .. })
    ));
}

#[test]
fn test_reserved_keys_never_reach_schema_check() {
    let table = fixture();
    // None of these keys exist on the entity; they must be dropped, not rejected.
    let query = params(json!({"PAGE": 1, "Size": 2, "SortBy": "name", "SORTDIR": "desc"}));

    let condition = build_condition(table.schema(), FilterSource::Map(&query)).unwrap();
    assert!(condition.is_match_all());
}

#[test]
fn test_record_path_does_not_drop_reserved_names() {
    struct PagedFilter {
        page: Option<i64>,
    }
    sift::introspectable!(PagedFilter { page });

    let table = fixture();
    let filter = PagedFilter { page: Some(1) };
    assert!(matches!(
        build_condition(table.schema(), FilterSource::Record(&filter)),
        Err(QueryError::UnknownField { ref field, .. }) if field == "page"
    ));
}

#[test]
fn test_introspection_error_is_internal() {
    struct Poisoned;
    impl Introspectable for Poisoned {
        fn declared_fields(&self) -> Vec<DeclaredField> {
            vec![
                DeclaredField::new("name", Ok(Some(FilterValue::Text("a".to_string())))),
                DeclaredField::new("email", Err("lock poisoned".to_string())),
            ]
        }
    }

    let table = fixture();
    let err = build_condition(table.schema(), FilterSource::Record(&Poisoned)).unwrap_err();
    assert!(matches!(err, QueryError::Introspection { ref field, .. } if field == "email"));
    assert_eq!(err.status_code(), 500);
}

#[test]
fn test_empty_filter_matches_all_three() {
    let table = fixture();
    let empty = Map::new();

    let condition = build_condition(table.schema(), FilterSource::Map(&empty)).unwrap();
    assert_eq!(table.find_all(&condition).unwrap().len(), 3);
    assert_eq!(condition, CompiledCondition::match_all(table.schema()));
}

#[test]
fn test_null_values_are_ignored() {
    let table = fixture();
    let query = params(json!({"name": null, "email": null}));
    let condition = build_condition(table.schema(), FilterSource::Map(&query)).unwrap();
    assert_eq!(table.count(&condition).unwrap(), 3);
}

#[test]
fn test_malformed_equality_operand() {
    let table = fixture();
    let result = compile(
        table.schema(),
        vec![FieldPredicate::equals("name", json!({"first": "Anna"}))],
    );
    assert!(matches!(result, Err(QueryError::InvalidFilter { .. })));
}

#[test]
fn test_condition_for_other_entity() {
    let table = fixture();
    let other = compile(&EntitySchema::new("organization", ["name"]), Vec::new()).unwrap();
    let err = table.find_all(&other).unwrap_err();
    assert!(matches!(err, QueryError::EntityMismatch { .. }));
    assert!(!err.is_bad_request());
}

#[test]
fn test_invalid_page_params() {
    for bad in [
        json!({"page": "first"}),
        json!({"size": 0}),
        json!({"size": 2.5}),
        json!({"sortDir": "sideways"}),
    ] {
        let err = PageRequest::from_params(&params(bad.clone())).unwrap_err();
        assert!(matches!(err, QueryError::InvalidPage(_)), "{}", bad);
    }
}

#[test]
fn test_page_past_end_is_empty() {
    let table = fixture();
    let condition = CompiledCondition::match_all(table.schema());
    let page = table.find_page(&condition, &PageRequest::new(5, 2)).unwrap();
    assert!(page.content.is_empty());
    assert_eq!(page.total_elements, 3);
}

// --- Delivery Errors ---

#[test]
fn test_open_breaker_and_rejected_fallback_names_channel() {
    let outbox = Arc::new(Outbox::new());
    let mailer = Arc::new(TemplateMailer::new(MailConfig::default(), Arc::clone(&outbox)));
    let notifier = ResilientNotifier::new(
        Arc::new(QueueBroker::default()),
        mailer,
        NotifierConfig::default(),
    );
    notifier.breaker().trip();

    // The template mailer rejects an address without a domain.
    let message = NotificationMessage::new("not-an-address", "tok", NotificationKind::Verification);
    let err = notifier.send("verificationQueue", &message).unwrap_err();

    assert_eq!(err.channel, "verificationQueue");
    assert_eq!(err.kind, NotificationKind::Verification);
    assert!(matches!(err.failure, FallbackFailure::Rejected(_)));
    assert!(err.to_string().contains("verificationQueue"));
    assert!(outbox.is_empty());
}
