//! Evaluator context
//!
//! Assembles the `request` / `resource` / `database` values the evaluator
//! resolves identifiers against, and adapts the document store behind the
//! engine lock so rules can `get()` / `exists()` other documents during
//! evaluation. Reads take the shared half of the lock; rules evaluation
//! never mutates store state.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::paths::DEFAULT_DATABASE;
use crate::store::DocumentStore;
use crate::types::{Document, FieldMap, Value};

/// Read-only document access for the evaluator's `get`/`exists` built-ins
pub trait DocumentReader: Send + Sync {
    /// The resource value for the document at a rules path, if it exists
    fn get_resource(&self, path: &str) -> Option<Value>;

    fn exists(&self, path: &str) -> bool {
        self.get_resource(path).is_some()
    }
}

/// Everything the evaluator needs from the enclosing request
pub struct EvaluatorContext {
    /// The `request` identifier: auth, method, path, time, resource
    pub request: Value,
    /// The `resource` identifier: the targeted document, or null
    pub resource: Value,
    /// The `database` identifier (the default database name)
    pub database: String,
    /// Cross-document reads
    pub reader: Arc<dyn DocumentReader>,
}

impl EvaluatorContext {
    pub fn new(request: Value, resource: Value, reader: Arc<dyn DocumentReader>) -> Self {
        Self {
            request,
            resource,
            database: DEFAULT_DATABASE.to_string(),
            reader,
        }
    }
}

/// Build the `request` value for an incoming operation
///
/// `auth` is null for unauthenticated requests; `resource_data`, when
/// present, is the incoming document payload of a write.
pub fn build_request(
    method: &str,
    path: &str,
    auth: Value,
    resource_data: Option<FieldMap>,
    time: DateTime<Utc>,
) -> Value {
    let mut request = FieldMap::new();
    request.insert("auth".into(), auth);
    request.insert("method".into(), Value::String(method.to_string()));
    request.insert("path".into(), Value::Reference(path.to_string()));
    request.insert("time".into(), Value::Timestamp(time));
    if let Some(data) = resource_data {
        let mut resource = FieldMap::new();
        resource.insert("data".into(), Value::Map(data));
        request.insert("resource".into(), Value::Map(resource));
    }
    Value::Map(request)
}

/// Build the resource value rules code sees for a stored document:
/// a map with `data`, `id`, and `__name__`
pub fn resource_value(name: &str, doc: &Document) -> Value {
    let id = name.rsplit('/').next().unwrap_or("").to_string();
    let mut resource = FieldMap::new();
    resource.insert("data".into(), Value::Map(doc.fields.clone()));
    resource.insert("id".into(), Value::String(id));
    resource.insert("__name__".into(), Value::Reference(name.to_string()));
    Value::Map(resource)
}

/// Store-backed reader used by the server
pub struct StoreReader {
    store: Arc<RwLock<DocumentStore>>,
    project: String,
}

impl StoreReader {
    pub fn new(store: Arc<RwLock<DocumentStore>>, project: &str) -> Self {
        Self {
            store,
            project: project.to_string(),
        }
    }

    /// Canonicalize a rules path into a store key
    ///
    /// Rules code writes `/databases/$(database)/documents/...`; accept that
    /// form, a full `projects/...` path, or a bare suffix under the default
    /// database.
    fn canonical_path(&self, path: &str) -> String {
        let trimmed = path.trim_start_matches('/');
        if trimmed.starts_with("projects/") {
            trimmed.to_string()
        } else if trimmed.starts_with("databases/") {
            format!("projects/{}/{}", self.project, trimmed)
        } else {
            format!(
                "projects/{}/databases/{}/documents/{}",
                self.project, DEFAULT_DATABASE, trimmed
            )
        }
    }
}

impl DocumentReader for StoreReader {
    fn get_resource(&self, path: &str) -> Option<Value> {
        let key = self.canonical_path(path);
        let store = self.store.read().ok()?;
        let doc = store.get(&key)?;
        Some(resource_value(&key, doc))
    }
}

/// Reader over no documents at all; evaluator unit tests use this
pub struct EmptyReader;

impl DocumentReader for EmptyReader {
    fn get_resource(&self, _path: &str) -> Option<Value> {
        None
    }
}
