//! batchGet: ordered multi-document reads
//!
//! Produces one response entry per requested path, in request order, each
//! carrying either the found document or the missing path. All entries
//! share a single read time chosen at the start of the call. Reads go
//! through the transaction snapshot when a transaction is active, and a
//! `newTransaction` option begins one whose id is echoed in every entry.

use crate::error::{MiniStoreError, Result};
use crate::paths::DocumentPath;
use crate::types::{get_field, set_field, truncate_to_micros, Document, FieldMap};

use super::{
    BatchGetEntry, BatchGetOutcome, Executor, ReadConsistency, MAX_DOCUMENTS_PER_BATCH_GET,
};

impl Executor {
    /// Execute a batchGet over the given canonical paths
    pub fn batch_get(
        &self,
        documents: Vec<String>,
        mask: Option<Vec<Vec<String>>>,
        consistency: ReadConsistency,
    ) -> Result<BatchGetOutcome> {
        if documents.is_empty() {
            return Err(MiniStoreError::InvalidArgument(
                "batchGet requires at least one document".into(),
            ));
        }
        if documents.len() > MAX_DOCUMENTS_PER_BATCH_GET {
            return Err(MiniStoreError::InvalidArgument(format!(
                "Too many documents in batchGet: {} (maximum {})",
                documents.len(),
                MAX_DOCUMENTS_PER_BATCH_GET
            )));
        }
        for path in &documents {
            DocumentPath::parse(path)?;
        }

        // The single read timestamp shared by every entry
        let read_time = truncate_to_micros(chrono::Utc::now());

        // Transactional reads mutate the snapshot cache, so they need the
        // write half of the engine lock; plain reads share the read half.
        match consistency {
            ReadConsistency::Default => {
                let store = self.store.read().map_err(|_| super::poisoned_lock())?;
                let entries = documents
                    .into_iter()
                    .map(|path| {
                        let found = store.get(&path).cloned();
                        entry_for(path, found, &mask)
                    })
                    .collect();
                Ok(BatchGetOutcome { read_time, transaction: None, entries })
            }
            ReadConsistency::Transaction(txn_id) => {
                let mut store = self.store.write().map_err(|_| super::poisoned_lock())?;
                let mut entries = Vec::with_capacity(documents.len());
                for path in documents {
                    let found = store.read_in_transaction(&txn_id, &path)?;
                    entries.push(entry_for(path, found, &mask));
                }
                Ok(BatchGetOutcome { read_time, transaction: None, entries })
            }
            ReadConsistency::NewTransaction { read_only } => {
                let mut store = self.store.write().map_err(|_| super::poisoned_lock())?;
                let txn_id = store.create_transaction(read_only);
                let mut entries = Vec::with_capacity(documents.len());
                for path in documents {
                    let found = store.read_in_transaction(&txn_id, &path)?;
                    entries.push(entry_for(path, found, &mask));
                }
                Ok(BatchGetOutcome {
                    read_time,
                    transaction: Some(txn_id),
                    entries,
                })
            }
        }
    }
}

/// Build one response entry, applying the field-mask projection
fn entry_for(path: String, found: Option<Document>, mask: &Option<Vec<Vec<String>>>) -> BatchGetEntry {
    let found = found.map(|doc| match mask {
        Some(mask_paths) => Document {
            fields: project_fields(&doc.fields, mask_paths),
            ..doc
        },
        None => doc,
    });
    BatchGetEntry { path, found }
}

/// Keep only the masked field paths, preserving nesting
fn project_fields(fields: &FieldMap, mask_paths: &[Vec<String>]) -> FieldMap {
    let mut projected = FieldMap::new();
    for mask_path in mask_paths {
        if let Some(value) = get_field(fields, mask_path) {
            set_field(&mut projected, mask_path, value.clone());
        }
    }
    projected
}
