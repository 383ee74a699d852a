//! REST protocol layer
//!
//! Mirrors the production REST schema: request payloads deserialize into
//! the structs here, get decoded into executor operations with full
//! validation, and outcomes encode back to wire JSON. Timestamps are
//! ISO-8601 UTC strings, integers are decimal strings, bytes are base64.
//!
//! ## Architecture
//!
//! - `mod.rs`: payload schema, decode/encode, operation dispatch
//! - `http`: minimal HTTP/1.1 framing over a TCP stream
//! - `ConnectionHandler`: per-connection loop gluing the two together,
//!   with the security-rules gate in front of every operation

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::{MiniStoreError, Result};
use crate::executor::{
    BatchGetOutcome, CommitOutcome, Executor, FieldTransform, Precondition, ReadConsistency,
    TransformKind, Write,
};
use crate::paths::{parse_field_path, parse_mask_paths};
use crate::types::{format_timestamp, parse_timestamp, FieldMap, Value};

mod connection;
pub mod http;

pub use connection::ConnectionHandler;

//=============================================================================
// Request schema
//=============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    #[serde(default)]
    pub writes: Vec<WriteJson>,
    #[serde(default)]
    pub transaction: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteJson {
    #[serde(default)]
    pub update: Option<DocumentJson>,
    #[serde(default)]
    pub delete: Option<String>,
    #[serde(default)]
    pub transform: Option<DocumentTransformJson>,
    #[serde(default)]
    pub update_mask: Option<DocumentMaskJson>,
    #[serde(default)]
    pub update_transforms: Vec<FieldTransformJson>,
    #[serde(default)]
    pub current_document: Option<PreconditionJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentJson {
    pub name: String,
    #[serde(default)]
    pub fields: Option<FieldMap>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMaskJson {
    #[serde(default)]
    pub field_paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentTransformJson {
    pub document: String,
    #[serde(default)]
    pub field_transforms: Vec<FieldTransformJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldTransformJson {
    pub field_path: String,
    #[serde(default)]
    pub set_to_server_value: Option<String>,
    #[serde(default)]
    pub increment: Option<Value>,
    #[serde(default)]
    pub maximum: Option<Value>,
    #[serde(default)]
    pub minimum: Option<Value>,
    #[serde(default)]
    pub append_missing_elements: Option<ArrayValueJson>,
    #[serde(default)]
    pub remove_all_from_array: Option<ArrayValueJson>,
}

#[derive(Debug, Deserialize)]
pub struct ArrayValueJson {
    #[serde(default)]
    pub values: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreconditionJson {
    #[serde(default)]
    pub exists: Option<bool>,
    #[serde(default)]
    pub update_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchGetRequest {
    #[serde(default)]
    pub documents: Vec<String>,
    #[serde(default)]
    pub mask: Option<DocumentMaskJson>,
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub new_transaction: Option<TransactionOptionsJson>,
}

/// `{readOnly: {...}}` or `{readWrite: {...}}`; both empty means read-write
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOptionsJson {
    #[serde(default)]
    pub read_only: Option<JsonValue>,
    #[serde(default)]
    pub read_write: Option<JsonValue>,
}

impl TransactionOptionsJson {
    /// Resolve to the read-only flag, rejecting conflicting options
    pub fn decode(&self) -> Result<bool> {
        if self.read_only.is_some() && self.read_write.is_some() {
            return Err(MiniStoreError::InvalidArgument(
                "readOnly and readWrite are mutually exclusive".into(),
            ));
        }
        Ok(self.read_only.is_some())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginTransactionRequest {
    #[serde(default)]
    pub options: Option<TransactionOptionsJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRequest {
    #[serde(default)]
    pub transaction: String,
}

//=============================================================================
// Decoding
//=============================================================================

impl WriteJson {
    /// Decode into an executor write, validating the tagged-union shape
    pub fn decode(self) -> Result<Write> {
        let precondition = self.current_document.map(|p| p.decode()).transpose()?;

        let populated =
            self.update.is_some() as u8 + self.delete.is_some() as u8 + self.transform.is_some() as u8;
        if populated != 1 {
            return Err(MiniStoreError::InvalidArgument(
                "Write must contain exactly one of update, delete, or transform".into(),
            ));
        }

        if let Some(update) = self.update {
            let update_mask = self
                .update_mask
                .map(|mask| parse_mask_paths(&mask.field_paths))
                .transpose()?;
            let update_transforms = self
                .update_transforms
                .into_iter()
                .map(|t| t.decode())
                .collect::<Result<Vec<_>>>()?;
            return Ok(Write::Update {
                path: update.name,
                fields: update.fields.unwrap_or_default(),
                update_mask,
                update_transforms,
                precondition,
            });
        }
        if !self.update_transforms.is_empty() {
            return Err(MiniStoreError::InvalidArgument(
                "updateTransforms is only valid on an update write".into(),
            ));
        }
        if let Some(path) = self.delete {
            return Ok(Write::Delete { path, precondition });
        }
        match self.transform {
            Some(transform) => {
                let field_transforms = transform
                    .field_transforms
                    .into_iter()
                    .map(|t| t.decode())
                    .collect::<Result<Vec<_>>>()?;
                if field_transforms.is_empty() {
                    return Err(MiniStoreError::InvalidArgument(
                        "Transform write must contain at least one field transform".into(),
                    ));
                }
                Ok(Write::Transform {
                    path: transform.document,
                    field_transforms,
                    precondition,
                })
            }
            None => Err(MiniStoreError::Internal(
                "Write variant check out of sync".into(),
            )),
        }
    }
}

impl PreconditionJson {
    /// Exactly one of `exists` / `updateTime`
    pub fn decode(self) -> Result<Precondition> {
        match (self.exists, self.update_time) {
            (Some(exists), None) => Ok(Precondition::Exists(exists)),
            (None, Some(ts)) => Ok(Precondition::UpdateTime(parse_timestamp(&ts)?)),
            _ => Err(MiniStoreError::InvalidArgument(
                "Precondition must specify exactly one of exists and updateTime".into(),
            )),
        }
    }
}

impl FieldTransformJson {
    pub fn decode(self) -> Result<FieldTransform> {
        let field_path = parse_field_path(&self.field_path)?;

        let mut kinds = Vec::new();
        if let Some(server_value) = self.set_to_server_value {
            if server_value != "REQUEST_TIME" {
                return Err(MiniStoreError::InvalidArgument(format!(
                    "Unknown server value \"{}\"",
                    server_value
                )));
            }
            kinds.push(TransformKind::ServerTime);
        }
        if let Some(operand) = self.increment {
            kinds.push(TransformKind::Increment(numeric_operand("increment", operand)?));
        }
        if let Some(operand) = self.maximum {
            kinds.push(TransformKind::Maximum(numeric_operand("maximum", operand)?));
        }
        if let Some(operand) = self.minimum {
            kinds.push(TransformKind::Minimum(numeric_operand("minimum", operand)?));
        }
        if let Some(array) = self.append_missing_elements {
            kinds.push(TransformKind::AppendMissingElements(array.values));
        }
        if let Some(array) = self.remove_all_from_array {
            kinds.push(TransformKind::RemoveAllFromArray(array.values));
        }

        let mut kinds = kinds.into_iter();
        match (kinds.next(), kinds.next()) {
            (Some(kind), None) => Ok(FieldTransform { field_path, kind }),
            _ => Err(MiniStoreError::InvalidArgument(
                "Field transform must specify exactly one operation".into(),
            )),
        }
    }
}

fn numeric_operand(name: &str, operand: Value) -> Result<Value> {
    match operand {
        Value::Integer(_) | Value::Double(_) => Ok(operand),
        other => Err(MiniStoreError::InvalidArgument(format!(
            "{} operand must be a number, got {}",
            name,
            other.type_name()
        ))),
    }
}

impl BatchGetRequest {
    /// Split into the executor's inputs, rejecting conflicting options
    pub fn decode(self) -> Result<(Vec<String>, Option<Vec<Vec<String>>>, ReadConsistency)> {
        let mask = self
            .mask
            .map(|mask| parse_mask_paths(&mask.field_paths))
            .transpose()?;
        let consistency = match (self.transaction, self.new_transaction) {
            (Some(_), Some(_)) => {
                return Err(MiniStoreError::InvalidArgument(
                    "transaction and newTransaction are mutually exclusive".into(),
                ))
            }
            (Some(id), None) => ReadConsistency::Transaction(id),
            (None, Some(options)) => ReadConsistency::NewTransaction {
                read_only: options.decode()?,
            },
            (None, None) => ReadConsistency::Default,
        };
        Ok((self.documents, mask, consistency))
    }
}

//=============================================================================
// Encoding
//=============================================================================

/// Encode a commit outcome as the wire CommitResponse
pub fn commit_response(outcome: &CommitOutcome) -> JsonValue {
    let write_results: Vec<JsonValue> = outcome
        .write_results
        .iter()
        .map(|result| {
            let mut entry = serde_json::Map::new();
            entry.insert(
                "updateTime".into(),
                JsonValue::String(format_timestamp(result.update_time)),
            );
            if !result.transform_results.is_empty() {
                entry.insert(
                    "transformResults".into(),
                    JsonValue::Array(result.transform_results.iter().map(|v| v.to_json()).collect()),
                );
            }
            JsonValue::Object(entry)
        })
        .collect();

    serde_json::json!({
        "writeResults": write_results,
        "commitTime": format_timestamp(outcome.commit_time),
    })
}

/// Encode a batchGet outcome as the wire response array
pub fn batch_get_response(outcome: &BatchGetOutcome) -> JsonValue {
    let entries: Vec<JsonValue> = outcome
        .entries
        .iter()
        .map(|entry| {
            let mut out = serde_json::Map::new();
            match &entry.found {
                Some(doc) => {
                    out.insert("found".into(), doc.to_json(&entry.path));
                }
                None => {
                    out.insert("missing".into(), JsonValue::String(entry.path.clone()));
                }
            }
            if let Some(txn) = &outcome.transaction {
                out.insert("transaction".into(), JsonValue::String(txn.clone()));
            }
            out.insert(
                "readTime".into(),
                JsonValue::String(format_timestamp(outcome.read_time)),
            );
            JsonValue::Object(out)
        })
        .collect();
    JsonValue::Array(entries)
}

//=============================================================================
// Operation dispatch
//=============================================================================

/// The four core operations behind `documents:<op>` URL suffixes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    BatchGet,
    Commit,
    BeginTransaction,
    Rollback,
}

impl Operation {
    pub fn from_suffix(suffix: &str) -> Option<Operation> {
        match suffix {
            "batchGet" => Some(Operation::BatchGet),
            "commit" => Some(Operation::Commit),
            "beginTransaction" => Some(Operation::BeginTransaction),
            "rollback" => Some(Operation::Rollback),
            _ => None,
        }
    }
}

/// Decode, execute, and encode one operation against the engine
pub fn handle_operation(executor: &Executor, op: Operation, body: JsonValue) -> Result<JsonValue> {
    match op {
        Operation::BatchGet => {
            let request: BatchGetRequest = serde_json::from_value(body)?;
            let (documents, mask, consistency) = request.decode()?;
            let outcome = executor.batch_get(documents, mask, consistency)?;
            Ok(batch_get_response(&outcome))
        }
        Operation::Commit => {
            let request: CommitRequest = serde_json::from_value(body)?;
            let writes = request
                .writes
                .into_iter()
                .map(|w| w.decode())
                .collect::<Result<Vec<_>>>()?;
            let outcome = executor.commit(writes, request.transaction)?;
            Ok(commit_response(&outcome))
        }
        Operation::BeginTransaction => {
            let request: BeginTransactionRequest = serde_json::from_value(body)?;
            let read_only = request.options.map(|o| o.decode()).transpose()?.unwrap_or(false);
            let id = executor.begin_transaction(read_only)?;
            Ok(serde_json::json!({ "transaction": id }))
        }
        Operation::Rollback => {
            let request: RollbackRequest = serde_json::from_value(body)?;
            executor.rollback(&request.transaction)?;
            // A successful rollback is an empty object
            Ok(serde_json::json!({}))
        }
    }
}
