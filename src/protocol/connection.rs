//! Per-connection request loop
//!
//! Routes `documents:<op>` URLs onto the engine, with the security-rules
//! gate consulted before any read or write when a ruleset is loaded. The
//! `Authorization: Bearer owner` token bypasses rules (the admin SDK
//! behavior); any other bearer token is not verified here and the request
//! is treated as unauthenticated.

use std::sync::Arc;

use bytes::BytesMut;
use log::{debug, warn};
use serde_json::Value as JsonValue;
use tokio::net::TcpStream;

use crate::error::{MiniStoreError, Result};
use crate::executor::Executor;
use crate::paths::{DocumentPath, DEFAULT_DATABASE};
use crate::rules::context::{build_request, resource_value, EvaluatorContext, StoreReader};
use crate::rules::Ruleset;
use crate::types::{truncate_to_micros, FieldMap, Value};
use crate::Config;

use super::http::{self, HttpRequest};
use super::{handle_operation, BatchGetRequest, CommitRequest, Operation, WriteJson};

/// A parsed route: the resource prefix plus the operation suffix
struct Route {
    project: String,
    op: Operation,
}

impl Route {
    /// Parse `/v1/projects/{P}/databases/{D}/documents:<op>`
    fn parse(method: &str, path: &str) -> Result<Route> {
        if method != "POST" {
            return Err(MiniStoreError::NotFound(format!(
                "Unknown route: {} {}",
                method, path
            )));
        }
        let (resource, suffix) = path
            .rsplit_once(':')
            .ok_or_else(|| MiniStoreError::NotFound(format!("Unknown route: {}", path)))?;
        let op = Operation::from_suffix(suffix)
            .ok_or_else(|| MiniStoreError::NotFound(format!("Unknown route: {}", path)))?;

        let parts: Vec<&str> = resource.trim_start_matches('/').split('/').collect();
        match parts.as_slice() {
            ["v1", "projects", project, "databases", database, "documents"] => {
                if *database != DEFAULT_DATABASE {
                    return Err(MiniStoreError::NotFound(format!(
                        "Database \"{}\" not found.",
                        database
                    )));
                }
                Ok(Route { project: project.to_string(), op })
            }
            _ => Err(MiniStoreError::NotFound(format!("Unknown route: {}", path))),
        }
    }
}

/// Handles a single client connection
pub struct ConnectionHandler {
    stream: TcpStream,
    executor: Arc<Executor>,
    ruleset: Option<Arc<Ruleset>>,
    config: Config,
    buffer: BytesMut,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        executor: Arc<Executor>,
        ruleset: Option<Arc<Ruleset>>,
        config: Config,
    ) -> Self {
        Self {
            stream,
            executor,
            ruleset,
            config,
            buffer: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Run the connection handler (main loop)
    pub async fn run(mut self) -> Result<()> {
        loop {
            let request = match http::read_request(&mut self.stream, &mut self.buffer).await? {
                Some(request) => request,
                None => return Ok(()),
            };

            let (status, body) = match self.handle(&request) {
                Ok(body) => (200, body),
                Err(e) => (e.http_status(), e.to_json()),
            };
            debug!("{} {} -> {}", request.method, request.path(), status);
            http::write_response(&mut self.stream, status, &body).await?;

            let close = request
                .header("connection")
                .map(|v| v.eq_ignore_ascii_case("close"))
                .unwrap_or(false);
            if close {
                return Ok(());
            }
        }
    }

    fn handle(&self, request: &HttpRequest) -> Result<JsonValue> {
        let route = Route::parse(&request.method, request.path())?;

        let body: JsonValue = if request.body.is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_slice(&request.body)
                .map_err(|e| MiniStoreError::InvalidArgument(format!("Invalid JSON payload: {}", e)))?
        };

        if let Some(ruleset) = &self.ruleset {
            if !self.is_owner(request) {
                self.authorize(ruleset, &route, &body)?;
            }
        }

        handle_operation(&self.executor, route.op, body)
    }

    /// The admin bypass token
    fn is_owner(&self, request: &HttpRequest) -> bool {
        request
            .header("authorization")
            .map(|v| v.eq_ignore_ascii_case("Bearer owner"))
            .unwrap_or(false)
    }

    /// Check every document the operation touches against the ruleset
    fn authorize(&self, ruleset: &Ruleset, route: &Route, body: &JsonValue) -> Result<()> {
        match route.op {
            // Transaction lifecycle ops touch no documents
            Operation::BeginTransaction | Operation::Rollback => Ok(()),
            Operation::BatchGet => {
                let request: BatchGetRequest = serde_json::from_value(body.clone())?;
                for path in &request.documents {
                    self.check_rule(ruleset, route, "get", path, None)?;
                }
                Ok(())
            }
            Operation::Commit => {
                let request: CommitRequest = serde_json::from_value(body.clone())?;
                for write in &request.writes {
                    let (method, path, incoming) = self.classify_write(write)?;
                    self.check_rule(ruleset, route, method, &path, incoming)?;
                }
                Ok(())
            }
        }
    }

    /// Concrete rules method for a write: create vs update by existence
    fn classify_write<'a>(
        &self,
        write: &'a WriteJson,
    ) -> Result<(&'static str, String, Option<&'a FieldMap>)> {
        if let Some(path) = &write.delete {
            return Ok(("delete", path.clone(), None));
        }
        let (path, fields) = if let Some(update) = &write.update {
            (update.name.clone(), update.fields.as_ref())
        } else if let Some(transform) = &write.transform {
            (transform.document.clone(), None)
        } else {
            return Err(MiniStoreError::InvalidArgument(
                "Write must contain exactly one of update, delete, or transform".into(),
            ));
        };
        let exists = {
            let store = self.executor.store();
            let store = store.read().map_err(|_| {
                MiniStoreError::Internal("Engine lock poisoned".into())
            })?;
            store.exists(&path)
        };
        Ok((if exists { "update" } else { "create" }, path, fields))
    }

    fn check_rule(
        &self,
        ruleset: &Ruleset,
        route: &Route,
        method: &str,
        path: &str,
        incoming: Option<&FieldMap>,
    ) -> Result<()> {
        let parsed = DocumentPath::parse(path)?;
        let rules_path = format!(
            "/databases/{}/documents/{}",
            parsed.database,
            parsed.relative_path()
        );

        let now = truncate_to_micros(chrono::Utc::now());
        let request_value = build_request(
            method,
            &rules_path,
            Value::Null,
            incoming.cloned(),
            now,
        );

        // The current document, as `resource`
        let resource = {
            let store = self.executor.store();
            let store = store.read().map_err(|_| {
                MiniStoreError::Internal("Engine lock poisoned".into())
            })?;
            match store.get(path) {
                Some(doc) => resource_value(path, doc),
                None => Value::Null,
            }
        };

        let reader = Arc::new(StoreReader::new(self.executor.store(), &route.project));
        let ctx = EvaluatorContext::new(request_value, resource, reader);

        let decision = ruleset.check("cloud.firestore", method, &rules_path, &ctx);
        for diagnostic in &decision.diagnostics {
            warn!("rules: {}", diagnostic);
        }
        if decision.allowed {
            Ok(())
        } else {
            debug!(
                "rules denied {} on {} (project {})",
                method, rules_path, self.config.project_id
            );
            Err(MiniStoreError::PermissionDenied(
                "Missing or insufficient permissions.".into(),
            ))
        }
    }
}
