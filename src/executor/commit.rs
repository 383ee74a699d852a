//! Commit coordinator
//!
//! Executes a batch of writes atomically: validate every write, check the
//! transaction and its read snapshot, evaluate every precondition, then
//! apply all writes at a single commit time. All of it happens inside one
//! continuous hold of the engine write lock, so either every write lands or
//! the store is untouched.

use log::debug;

use crate::error::{MiniStoreError, Result};
use crate::paths::DocumentPath;
use crate::store::{DocumentStore, TxnState};
use crate::types::{delete_field, get_field, set_field, Document, FieldMap};

use super::transforms::apply_transform;
use super::{CommitOutcome, Executor, Write, WriteResult, MAX_WRITES_PER_COMMIT};

impl Executor {
    /// Execute a commit: the writes plus an optional transaction id
    pub fn commit(&self, writes: Vec<Write>, transaction: Option<String>) -> Result<CommitOutcome> {
        let mut store = self.store.write().map_err(|_| super::poisoned_lock())?;

        // 1. Validate every write before touching anything
        if writes.len() > MAX_WRITES_PER_COMMIT {
            return Err(MiniStoreError::InvalidArgument(format!(
                "Too many writes in commit: {} (maximum {})",
                writes.len(),
                MAX_WRITES_PER_COMMIT
            )));
        }
        for write in &writes {
            DocumentPath::parse(write.path())?;
        }

        // 2. Transaction checks and snapshot conflict detection
        if let Some(txn_id) = &transaction {
            let txn = store.get_active_transaction(txn_id)?;
            if txn.read_only {
                return Err(MiniStoreError::InvalidArgument(format!(
                    "Transaction {} is read-only and cannot commit writes",
                    txn_id
                )));
            }
            let snapshot: Vec<(String, Option<chrono::DateTime<chrono::Utc>>)> = txn
                .read_snapshot
                .iter()
                .map(|(path, observed)| (path.clone(), *observed))
                .collect();
            for (path, observed) in snapshot {
                let current = store.get(&path).map(|doc| doc.update_time);
                if current != observed {
                    debug!(
                        "commit conflict on {}: snapshot {:?}, current {:?}",
                        path, observed, current
                    );
                    return Err(MiniStoreError::transaction_conflict());
                }
            }
        }

        // 3. Precondition pass: any failure aborts the batch with no mutation
        for write in &writes {
            if let Some(precondition) = write.precondition() {
                precondition.check(store.get(write.path()), write.path())?;
            }
        }

        // 4. Single commit time shared by every write
        let commit_time = store.next_commit_time();

        // 5. Apply pass, input order preserved
        let mut write_results = Vec::with_capacity(writes.len());
        for write in writes {
            write_results.push(apply_write(&mut store, write, commit_time));
        }

        // 6. The transaction, if any, is now terminal
        if let Some(txn_id) = &transaction {
            if let Ok(txn) = store.get_transaction(txn_id) {
                txn.state = TxnState::Committed;
            }
        }

        debug!(
            "commit applied {} writes at {}",
            write_results.len(),
            crate::types::format_timestamp(commit_time)
        );
        Ok(CommitOutcome { commit_time, write_results })
    }
}

/// Apply one already-validated write at the shared commit time
fn apply_write(
    store: &mut DocumentStore,
    write: Write,
    commit_time: chrono::DateTime<chrono::Utc>,
) -> WriteResult {
    match write {
        Write::Update {
            path,
            fields,
            update_mask,
            update_transforms,
            ..
        } => {
            let existing = store.get(&path).cloned();

            let mut new_fields = match update_mask {
                Some(mask_paths) => {
                    // Merge: each masked path is copied from the incoming
                    // fields, or deleted when the incoming fields omit it
                    let mut base = existing
                        .as_ref()
                        .map(|doc| doc.fields.clone())
                        .unwrap_or_default();
                    for mask_path in &mask_paths {
                        match get_field(&fields, mask_path) {
                            Some(value) => set_field(&mut base, mask_path, value.clone()),
                            None => delete_field(&mut base, mask_path),
                        }
                    }
                    base
                }
                None => fields,
            };

            // Transforms run after the masked merge, against the merged view
            let mut transform_results = Vec::with_capacity(update_transforms.len());
            for transform in &update_transforms {
                transform_results.push(apply_transform(&mut new_fields, transform, commit_time));
            }

            let create_time = existing.map(|doc| doc.create_time).unwrap_or(commit_time);
            store.set(
                path,
                Document {
                    fields: new_fields,
                    create_time,
                    update_time: commit_time,
                },
            );
            WriteResult { update_time: commit_time, transform_results }
        }
        Write::Delete { path, .. } => {
            store.delete(&path);
            WriteResult { update_time: commit_time, transform_results: Vec::new() }
        }
        Write::Transform { path, field_transforms, .. } => {
            let existing = store.get(&path).cloned();
            let mut new_fields = existing
                .as_ref()
                .map(|doc| doc.fields.clone())
                .unwrap_or_else(FieldMap::new);

            let mut transform_results = Vec::with_capacity(field_transforms.len());
            for transform in &field_transforms {
                transform_results.push(apply_transform(&mut new_fields, transform, commit_time));
            }

            let create_time = existing.map(|doc| doc.create_time).unwrap_or(commit_time);
            store.set(
                path,
                Document {
                    fields: new_fields,
                    create_time,
                    update_time: commit_time,
                },
            );
            WriteResult { update_time: commit_time, transform_results }
        }
    }
}
