//! End-to-end tests over the HTTP surface: raw requests against a live
//! listener, routing, error bodies, rules enforcement, and the owner bypass

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{json, Value as JsonValue};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use ministore::executor::Executor;
use ministore::protocol::ConnectionHandler;
use ministore::rules::Ruleset;
use ministore::Config;

const RULES: &str = r#"
service cloud.firestore {
  match /databases/{database}/documents {
    match /public/{doc} {
      allow read, write;
    }
  }
}
"#;

/// Start an accept loop with an optional ruleset; returns the bound address
async fn start_server(rules: Option<&str>) -> SocketAddr {
    let executor = Arc::new(Executor::default());
    let ruleset = rules.map(|source| Arc::new(Ruleset::parse(source).unwrap()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = Config::default();

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            let handler = ConnectionHandler::new(
                stream,
                Arc::clone(&executor),
                ruleset.clone(),
                config.clone(),
            );
            tokio::spawn(async move {
                let _ = handler.run().await;
            });
        }
    });

    addr
}

/// Issue one POST and return (status, parsed body)
async fn post(
    addr: SocketAddr,
    path: &str,
    auth: Option<&str>,
    body: &JsonValue,
) -> (u16, JsonValue) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let payload = body.to_string();
    let mut request = format!(
        "POST {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n",
        path,
        payload.len()
    );
    if let Some(auth) = auth {
        request.push_str(&format!("Authorization: {}\r\n", auth));
    }
    request.push_str("Connection: close\r\n\r\n");

    stream.write_all(request.as_bytes()).await.unwrap();
    stream.write_all(payload.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);

    let status: u16 = text
        .split_whitespace()
        .nth(1)
        .expect("missing status line")
        .parse()
        .unwrap();
    let body_start = text.find("\r\n\r\n").expect("missing body separator") + 4;
    let body = serde_json::from_str(&text[body_start..]).expect("body is not JSON");
    (status, body)
}

fn commit_url() -> &'static str {
    "/v1/projects/p/databases/(default)/documents:commit"
}

fn batch_get_url() -> &'static str {
    "/v1/projects/p/databases/(default)/documents:batchGet"
}

fn doc_path(suffix: &str) -> String {
    format!("projects/p/databases/(default)/documents/{}", suffix)
}

#[tokio::test]
async fn test_commit_and_read_over_http() {
    let addr = start_server(None).await;

    let (status, body) = post(
        addr,
        commit_url(),
        None,
        &json!({ "writes": [{ "update": {
            "name": doc_path("u/1"),
            "fields": { "n": { "stringValue": "A" } } } }] }),
    )
    .await;
    assert_eq!(status, 200);
    assert!(body["commitTime"].is_string());

    let (status, body) = post(
        addr,
        batch_get_url(),
        None,
        &json!({ "documents": [doc_path("u/1")] }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body[0]["found"]["fields"]["n"], json!({ "stringValue": "A" }));
}

#[tokio::test]
async fn test_transaction_cycle_over_http() {
    let addr = start_server(None).await;

    let (status, body) = post(
        addr,
        "/v1/projects/p/databases/(default)/documents:beginTransaction",
        None,
        &json!({}),
    )
    .await;
    assert_eq!(status, 200);
    let txn = body["transaction"].as_str().unwrap().to_string();

    let (status, body) = post(
        addr,
        "/v1/projects/p/databases/(default)/documents:rollback",
        None,
        &json!({ "transaction": txn }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({}));
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let addr = start_server(None).await;
    let (status, body) = post(
        addr,
        "/v1/projects/p/databases/(default)/documents:runQuery",
        None,
        &json!({}),
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["status"], "NOT_FOUND");
}

#[tokio::test]
async fn test_unknown_database_is_404() {
    let addr = start_server(None).await;
    let (status, body) = post(
        addr,
        "/v1/projects/p/databases/prod/documents:commit",
        None,
        &json!({ "writes": [] }),
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["status"], "NOT_FOUND");
}

#[tokio::test]
async fn test_error_body_shape() {
    let addr = start_server(None).await;

    post(
        addr,
        commit_url(),
        None,
        &json!({ "writes": [{ "update": { "name": doc_path("u/1"), "fields": {} } }] }),
    )
    .await;

    let (status, body) = post(
        addr,
        commit_url(),
        None,
        &json!({ "writes": [{
            "update": { "name": doc_path("u/1"), "fields": {} },
            "currentDocument": { "exists": false }
        }] }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], 400);
    assert_eq!(body["error"]["status"], "ALREADY_EXISTS");
    assert!(body["error"]["message"].is_string());
}

#[tokio::test]
async fn test_rules_gate_denies_unmatched_paths() {
    let addr = start_server(Some(RULES)).await;

    // public/* is open
    let (status, _) = post(
        addr,
        commit_url(),
        None,
        &json!({ "writes": [{ "update": { "name": doc_path("public/x"), "fields": {} } }] }),
    )
    .await;
    assert_eq!(status, 200);

    // anything else is denied
    let (status, body) = post(
        addr,
        commit_url(),
        None,
        &json!({ "writes": [{ "update": { "name": doc_path("secret/x"), "fields": {} } }] }),
    )
    .await;
    assert_eq!(status, 403);
    assert_eq!(body["error"]["status"], "PERMISSION_DENIED");

    let (status, _) = post(
        addr,
        batch_get_url(),
        None,
        &json!({ "documents": [doc_path("secret/x")] }),
    )
    .await;
    assert_eq!(status, 403);
}

#[tokio::test]
async fn test_owner_token_bypasses_rules() {
    let addr = start_server(Some(RULES)).await;

    let (status, _) = post(
        addr,
        commit_url(),
        Some("Bearer owner"),
        &json!({ "writes": [{ "update": { "name": doc_path("secret/x"), "fields": {} } }] }),
    )
    .await;
    assert_eq!(status, 200);

    // A non-owner token is not verified and does not bypass
    let (status, _) = post(
        addr,
        commit_url(),
        Some("Bearer somebody"),
        &json!({ "writes": [{ "update": { "name": doc_path("secret/x"), "fields": {} } }] }),
    )
    .await;
    assert_eq!(status, 403);
}

#[tokio::test]
async fn test_transaction_ops_skip_rules() {
    let addr = start_server(Some(RULES)).await;
    let (status, body) = post(
        addr,
        "/v1/projects/p/databases/(default)/documents:beginTransaction",
        None,
        &json!({}),
    )
    .await;
    assert_eq!(status, 200);
    assert!(body["transaction"].is_string());
}

#[tokio::test]
async fn test_malformed_json_is_400() {
    let addr = start_server(None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let payload = "{not json";
    let request = format!(
        "POST {} HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        commit_url(),
        payload.len(),
        payload
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 400"), "{}", text);
}
