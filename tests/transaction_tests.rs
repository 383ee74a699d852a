//! Tests for transaction lifecycle, snapshot reads, and conflict detection

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

fn begin(executor: &Executor) -> String {
    let response = call_ok(executor, Operation::BeginTransaction, json!({}));
    response["transaction"].as_str().unwrap().to_string()
}

fn set_doc(executor: &Executor, suffix: &str, value: &str) {
    call_ok(
        executor,
        Operation::Commit,
        json!({ "writes": [{ "update": {
            "name": doc_path(suffix),
            "fields": { "v": { "stringValue": value } } } }] }),
    );
}

fn read_in_txn(executor: &Executor, txn: &str, suffix: &str) -> JsonValue {
    let response = call_ok(
        executor,
        Operation::BatchGet,
        json!({ "documents": [doc_path(suffix)], "transaction": txn }),
    );
    response[0].clone()
}

#[test]
fn test_begin_returns_32_hex_id() {
    let executor = Executor::default();
    let id = begin(&executor);
    assert_eq!(id.len(), 32);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(id, begin(&executor));
}

#[test]
fn test_rollback_returns_empty_object() {
    let executor = Executor::default();
    let id = begin(&executor);
    let response = call_ok(
        &executor,
        Operation::Rollback,
        json!({ "transaction": id }),
    );
    assert_eq!(response, json!({}));
}

#[test]
fn test_terminal_transaction_cannot_be_reused() {
    let executor = Executor::default();
    let id = begin(&executor);
    call_ok(&executor, Operation::Rollback, json!({ "transaction": id }));

    // Rollback again
    let err = call(&executor, Operation::Rollback, json!({ "transaction": id })).unwrap_err();
    assert_eq!(err.status(), "INVALID_ARGUMENT");

    // Commit through it
    let err = call(
        &executor,
        Operation::Commit,
        json!({ "writes": [], "transaction": id }),
    )
    .unwrap_err();
    assert_eq!(err.status(), "INVALID_ARGUMENT");

    // Read through it
    let err = call(
        &executor,
        Operation::BatchGet,
        json!({ "documents": [doc_path("u/1")], "transaction": id }),
    )
    .unwrap_err();
    assert_eq!(err.status(), "INVALID_ARGUMENT");
}

#[test]
fn test_commit_marks_transaction_terminal() {
    let executor = Executor::default();
    let id = begin(&executor);
    call_ok(
        &executor,
        Operation::Commit,
        json!({ "writes": [], "transaction": id }),
    );

    let err = call(&executor, Operation::Rollback, json!({ "transaction": id })).unwrap_err();
    assert_eq!(err.status(), "INVALID_ARGUMENT");
    assert!(err.to_string().contains("committed"));
}

#[test]
fn test_unknown_transaction_rejected() {
    let executor = Executor::default();
    let fake = "00000000000000000000000000000000";
    let err = call(&executor, Operation::Rollback, json!({ "transaction": fake })).unwrap_err();
    assert_eq!(err.status(), "INVALID_ARGUMENT");

    let err = call(
        &executor,
        Operation::BatchGet,
        json!({ "documents": [doc_path("u/1")], "transaction": fake }),
    )
    .unwrap_err();
    assert_eq!(err.status(), "INVALID_ARGUMENT");
}

#[test]
fn test_snapshot_reads_are_repeatable() {
    let executor = Executor::default();
    set_doc(&executor, "u/1", "v1");

    let txn = begin(&executor);
    let first = read_in_txn(&executor, &txn, "u/1");
    assert_eq!(first["found"]["fields"]["v"], json!({ "stringValue": "v1" }));

    // A commit lands between the two transactional reads
    set_doc(&executor, "u/1", "v2");

    let second = read_in_txn(&executor, &txn, "u/1");
    assert_eq!(second["found"]["fields"]["v"], json!({ "stringValue": "v1" }));
    assert_eq!(first["found"]["updateTime"], second["found"]["updateTime"]);
}

#[test]
fn test_snapshot_of_missing_document_stays_missing() {
    let executor = Executor::default();
    let txn = begin(&executor);

    let first = read_in_txn(&executor, &txn, "u/9");
    assert_eq!(first["missing"], doc_path("u/9").as_str());

    set_doc(&executor, "u/9", "late");

    let second = read_in_txn(&executor, &txn, "u/9");
    assert_eq!(second["missing"], doc_path("u/9").as_str());
}

#[test]
fn test_conflicting_commits_abort() {
    let executor = Executor::default();
    set_doc(&executor, "u/1", "base");

    let t1 = begin(&executor);
    let t2 = begin(&executor);
    read_in_txn(&executor, &t1, "u/1");
    read_in_txn(&executor, &t2, "u/1");

    // T1 wins
    call_ok(
        &executor,
        Operation::Commit,
        json!({
            "writes": [{ "update": { "name": doc_path("u/1"),
                "fields": { "v": { "stringValue": "t1" } } } }],
            "transaction": t1
        }),
    );

    // T2's snapshot is stale
    let err = call(
        &executor,
        Operation::Commit,
        json!({
            "writes": [{ "update": { "name": doc_path("u/1"),
                "fields": { "v": { "stringValue": "t2" } } } }],
            "transaction": t2
        }),
    )
    .unwrap_err();
    assert_eq!(err.status(), "ABORTED");
    assert_eq!(err.http_status(), 409);

    // T1's write survived
    let executor_read = call_ok(
        &executor,
        Operation::BatchGet,
        json!({ "documents": [doc_path("u/1")] }),
    );
    assert_eq!(
        executor_read[0]["found"]["fields"]["v"],
        json!({ "stringValue": "t1" })
    );
}

#[test]
fn test_conflict_on_document_created_after_read() {
    let executor = Executor::default();

    // The transaction observes the document missing
    let txn = begin(&executor);
    read_in_txn(&executor, &txn, "u/1");

    // Someone else creates it
    set_doc(&executor, "u/1", "interloper");

    let err = call(
        &executor,
        Operation::Commit,
        json!({
            "writes": [{ "update": { "name": doc_path("u/1"), "fields": {} } }],
            "transaction": txn
        }),
    )
    .unwrap_err();
    assert_eq!(err.status(), "ABORTED");
}

#[test]
fn test_unconflicted_transaction_commits() {
    let executor = Executor::default();
    set_doc(&executor, "u/1", "base");

    let txn = begin(&executor);
    read_in_txn(&executor, &txn, "u/1");

    call_ok(
        &executor,
        Operation::Commit,
        json!({
            "writes": [{ "update": { "name": doc_path("u/1"),
                "fields": { "v": { "stringValue": "txn" } } } }],
            "transaction": txn
        }),
    );
}

#[test]
fn test_read_only_transaction_rejects_writes() {
    let executor = Executor::default();
    let response = call_ok(
        &executor,
        Operation::BeginTransaction,
        json!({ "options": { "readOnly": {} } }),
    );
    let txn = response["transaction"].as_str().unwrap();

    let err = call(
        &executor,
        Operation::Commit,
        json!({
            "writes": [{ "update": { "name": doc_path("u/1"), "fields": {} } }],
            "transaction": txn
        }),
    )
    .unwrap_err();
    assert_eq!(err.status(), "INVALID_ARGUMENT");
    assert!(err.to_string().contains("read-only"));
}

#[test]
fn test_new_transaction_id_in_every_entry() {
    let executor = Executor::default();
    set_doc(&executor, "u/1", "x");

    let response = call_ok(
        &executor,
        Operation::BatchGet,
        json!({
            "documents": [doc_path("u/1"), doc_path("u/2")],
            "newTransaction": {}
        }),
    );
    let entries = response.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    let txn = entries[0]["transaction"].as_str().unwrap();
    assert_eq!(txn.len(), 32);
    assert_eq!(entries[1]["transaction"].as_str().unwrap(), txn);

    // The new transaction's reads participate in conflict detection
    set_doc(&executor, "u/1", "y");
    let err = call(
        &executor,
        Operation::Commit,
        json!({ "writes": [], "transaction": txn }),
    )
    .unwrap_err();
    assert_eq!(err.status(), "ABORTED");
}

#[test]
fn test_conflict_check_ignores_unread_documents() {
    let executor = Executor::default();
    set_doc(&executor, "u/1", "base");
    set_doc(&executor, "u/2", "base");

    let txn = begin(&executor);
    read_in_txn(&executor, &txn, "u/1");

    // A write to a document the transaction never read is no conflict
    set_doc(&executor, "u/2", "changed");

    call_ok(
        &executor,
        Operation::Commit,
        json!({ "writes": [], "transaction": txn }),
    );
}
