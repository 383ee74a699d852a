//! Tests for field transforms over the wire: serverTime, increment,
//! maximum/minimum, array union/remove, and transformResults encoding

use serde_json::{json, Value as JsonValue};

use ministore::error::Result;
use ministore::executor::Executor;
use ministore::protocol::{handle_operation, Operation};

fn doc_path(suffix: &str) -> String {
    format!("projects/p/databases/(default)/documents/{}", suffix)
}

fn call(executor: &Executor, op: Operation, body: JsonValue) -> Result<JsonValue> {
    handle_operation(executor, op, body)
}

fn call_ok(executor: &Executor, op: Operation, body: JsonValue) -> JsonValue {
    let result = call(executor, op, body);
    assert!(result.is_ok(), "operation failed: {:?}", result.err());
    result.unwrap()
}

fn transform(executor: &Executor, suffix: &str, field_transforms: JsonValue) -> JsonValue {
    call_ok(
        executor,
        Operation::Commit,
        json!({ "writes": [{ "transform": {
            "document": doc_path(suffix),
            "fieldTransforms": field_transforms } }] }),
    )
}

fn get_fields(executor: &Executor, suffix: &str) -> JsonValue {
    let response = call_ok(
        executor,
        Operation::BatchGet,
        json!({ "documents": [doc_path(suffix)] }),
    );
    response[0]["found"]["fields"].clone()
}

#[test]
fn test_increment_twice_from_empty() {
    let executor = Executor::default();

    let first = transform(
        &executor,
        "u/2",
        json!([{ "fieldPath": "c", "increment": { "integerValue": "1" } }]),
    );
    assert_eq!(
        first["writeResults"][0]["transformResults"],
        json!([{ "integerValue": "1" }])
    );

    let second = transform(
        &executor,
        "u/2",
        json!([{ "fieldPath": "c", "increment": { "integerValue": "1" } }]),
    );
    assert_eq!(
        second["writeResults"][0]["transformResults"],
        json!([{ "integerValue": "2" }])
    );

    assert_eq!(get_fields(&executor, "u/2")["c"], json!({ "integerValue": "2" }));
}

#[test]
fn test_increment_type_promotion() {
    let executor = Executor::default();
    transform(
        &executor,
        "u/1",
        json!([{ "fieldPath": "c", "increment": { "integerValue": "1" } }]),
    );
    let response = transform(
        &executor,
        "u/1",
        json!([{ "fieldPath": "c", "increment": { "doubleValue": 0.5 } }]),
    );
    assert_eq!(
        response["writeResults"][0]["transformResults"],
        json!([{ "doubleValue": 1.5 }])
    );
}

#[test]
fn test_server_time_equals_commit_time() {
    let executor = Executor::default();
    let response = transform(
        &executor,
        "u/1",
        json!([{ "fieldPath": "at", "setToServerValue": "REQUEST_TIME" }]),
    );
    let commit_time = response["commitTime"].as_str().unwrap();
    assert_eq!(
        response["writeResults"][0]["transformResults"][0],
        json!({ "timestampValue": commit_time })
    );
    assert_eq!(
        get_fields(&executor, "u/1")["at"],
        json!({ "timestampValue": commit_time })
    );
}

#[test]
fn test_maximum_and_minimum() {
    let executor = Executor::default();
    transform(
        &executor,
        "u/1",
        json!([{ "fieldPath": "hi", "maximum": { "integerValue": "5" } },
               { "fieldPath": "lo", "minimum": { "integerValue": "5" } }]),
    );
    // Larger maximum wins, larger minimum loses
    let response = transform(
        &executor,
        "u/1",
        json!([{ "fieldPath": "hi", "maximum": { "integerValue": "9" } },
               { "fieldPath": "lo", "minimum": { "integerValue": "9" } }]),
    );
    assert_eq!(
        response["writeResults"][0]["transformResults"],
        json!([{ "integerValue": "9" }, { "integerValue": "5" }])
    );
}

#[test]
fn test_append_missing_elements() {
    let executor = Executor::default();
    transform(
        &executor,
        "u/1",
        json!([{ "fieldPath": "tags", "appendMissingElements": {
            "values": [{ "stringValue": "a" }, { "stringValue": "b" }] } }]),
    );
    let response = transform(
        &executor,
        "u/1",
        json!([{ "fieldPath": "tags", "appendMissingElements": {
            "values": [{ "stringValue": "b" }, { "stringValue": "c" }] } }]),
    );
    assert_eq!(
        response["writeResults"][0]["transformResults"][0],
        json!({ "arrayValue": { "values": [
            { "stringValue": "a" }, { "stringValue": "b" }, { "stringValue": "c" }
        ] } })
    );
}

#[test]
fn test_remove_all_from_array() {
    let executor = Executor::default();
    transform(
        &executor,
        "u/1",
        json!([{ "fieldPath": "xs", "appendMissingElements": {
            "values": [{ "integerValue": "1" }, { "integerValue": "2" }, { "integerValue": "3" }] } }]),
    );
    let response = transform(
        &executor,
        "u/1",
        json!([{ "fieldPath": "xs", "removeAllFromArray": {
            "values": [{ "integerValue": "1" }, { "integerValue": "3" }] } }]),
    );
    assert_eq!(
        response["writeResults"][0]["transformResults"][0],
        json!({ "arrayValue": { "values": [{ "integerValue": "2" }] } })
    );
}

#[test]
fn test_transform_results_align_with_transform_order() {
    let executor = Executor::default();
    let response = transform(
        &executor,
        "u/1",
        json!([
            { "fieldPath": "a", "increment": { "integerValue": "10" } },
            { "fieldPath": "b", "increment": { "integerValue": "20" } },
            { "fieldPath": "a", "increment": { "integerValue": "1" } }
        ]),
    );
    // Transforms within a write apply in order and see earlier results
    assert_eq!(
        response["writeResults"][0]["transformResults"],
        json!([
            { "integerValue": "10" },
            { "integerValue": "20" },
            { "integerValue": "11" }
        ])
    );
}

#[test]
fn test_update_transforms_apply_after_mask_merge() {
    let executor = Executor::default();
    call_ok(
        &executor,
        Operation::Commit,
        json!({ "writes": [{ "update": {
            "name": doc_path("u/1"),
            "fields": { "n": { "stringValue": "A" }, "c": { "integerValue": "5" } } } }] }),
    );

    let response = call_ok(
        &executor,
        Operation::Commit,
        json!({
            "writes": [{
                "update": { "name": doc_path("u/1"), "fields": { "n": { "stringValue": "B" } } },
                "updateMask": { "fieldPaths": ["n"] },
                "updateTransforms": [
                    { "fieldPath": "c", "increment": { "integerValue": "1" } }
                ]
            }]
        }),
    );
    // The counter survived the mask merge and then incremented
    assert_eq!(
        response["writeResults"][0]["transformResults"],
        json!([{ "integerValue": "6" }])
    );
    let fields = get_fields(&executor, "u/1");
    assert_eq!(fields["n"], json!({ "stringValue": "B" }));
    assert_eq!(fields["c"], json!({ "integerValue": "6" }));
}

#[test]
fn test_transform_on_nested_field_path() {
    let executor = Executor::default();
    transform(
        &executor,
        "u/1",
        json!([{ "fieldPath": "stats.count", "increment": { "integerValue": "1" } }]),
    );
    let fields = get_fields(&executor, "u/1");
    assert_eq!(
        fields["stats"],
        json!({ "mapValue": { "fields": { "count": { "integerValue": "1" } } } })
    );
}

#[test]
fn test_array_transform_coerces_scalar_target() {
    let executor = Executor::default();
    call_ok(
        &executor,
        Operation::Commit,
        json!({ "writes": [{ "update": {
            "name": doc_path("u/1"),
            "fields": { "tags": { "integerValue": "7" } } } }] }),
    );
    let response = transform(
        &executor,
        "u/1",
        json!([{ "fieldPath": "tags", "appendMissingElements": {
            "values": [{ "stringValue": "x" }] } }]),
    );
    assert_eq!(
        response["writeResults"][0]["transformResults"][0],
        json!({ "arrayValue": { "values": [{ "stringValue": "x" }] } })
    );
}

#[test]
fn test_transform_preserves_create_time_of_existing_doc() {
    let executor = Executor::default();
    let first = call_ok(
        &executor,
        Operation::Commit,
        json!({ "writes": [{ "update": { "name": doc_path("u/1"), "fields": {} } }] }),
    );
    let create_time = first["commitTime"].as_str().unwrap().to_string();

    transform(
        &executor,
        "u/1",
        json!([{ "fieldPath": "c", "increment": { "integerValue": "1" } }]),
    );

    let response = call_ok(
        &executor,
        Operation::BatchGet,
        json!({ "documents": [doc_path("u/1")] }),
    );
    assert_eq!(response[0]["found"]["createTime"].as_str().unwrap(), create_time);
}

#[test]
fn test_invalid_transform_operands_rejected() {
    let executor = Executor::default();

    // Non-numeric increment
    let err = call(
        &executor,
        Operation::Commit,
        json!({ "writes": [{ "transform": {
            "document": doc_path("u/1"),
            "fieldTransforms": [{ "fieldPath": "c", "increment": { "stringValue": "1" } }] } }] }),
    )
    .unwrap_err();
    assert_eq!(err.status(), "INVALID_ARGUMENT");

    // Unknown server value
    let err = call(
        &executor,
        Operation::Commit,
        json!({ "writes": [{ "transform": {
            "document": doc_path("u/1"),
            "fieldTransforms": [{ "fieldPath": "c", "setToServerValue": "TOMORROW" }] } }] }),
    )
    .unwrap_err();
    assert_eq!(err.status(), "INVALID_ARGUMENT");

    // No operation at all
    let err = call(
        &executor,
        Operation::Commit,
        json!({ "writes": [{ "transform": {
            "document": doc_path("u/1"),
            "fieldTransforms": [{ "fieldPath": "c" }] } }] }),
    )
    .unwrap_err();
    assert_eq!(err.status(), "INVALID_ARGUMENT");
}
