//! Operation executor for MiniStore
//!
//! The executor takes decoded write and read operations and executes them
//! against the document store under the single coarse engine lock.
//!
//! ## Execution model
//!
//! 1. Decode payload → operations (done by the protocol layer)
//! 2. Validate (paths well-formed, database accepted, batch limits)
//! 3. Transaction checks and snapshot conflict detection
//! 4. Precondition pass over every write (all-or-nothing)
//! 5. Apply under one continuous lock hold, single commit time
//!
//! Mutating operations take the write half of the lock for their entire
//! duration; plain reads and rules lookups take the read half. No I/O
//! happens while the lock is held, so operations are short and the lock
//! order linearizes all commits and transactional reads.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::store::DocumentStore;
use crate::types::{Document, FieldMap, Value};

pub mod batch_get;
pub mod commit;
pub mod precondition;
pub mod transaction;
pub mod transforms;

pub use precondition::Precondition;
pub use transforms::{FieldTransform, TransformKind};

/// Maximum writes accepted in a single commit
pub const MAX_WRITES_PER_COMMIT: usize = 500;

/// Maximum documents accepted in a single batchGet
pub const MAX_DOCUMENTS_PER_BATCH_GET: usize = 100;

/// A single decoded write operation
#[derive(Debug, Clone)]
pub enum Write {
    /// Replace or merge the document at `path`
    Update {
        path: String,
        fields: FieldMap,
        /// Parsed mask field paths; None means full replace
        update_mask: Option<Vec<Vec<String>>>,
        /// Transforms applied after the update, in order
        update_transforms: Vec<FieldTransform>,
        precondition: Option<Precondition>,
    },
    /// Delete the document at `path` (idempotent)
    Delete {
        path: String,
        precondition: Option<Precondition>,
    },
    /// Apply field transforms to the document at `path`
    Transform {
        path: String,
        field_transforms: Vec<FieldTransform>,
        precondition: Option<Precondition>,
    },
}

impl Write {
    /// The document path this write targets
    pub fn path(&self) -> &str {
        match self {
            Write::Update { path, .. } => path,
            Write::Delete { path, .. } => path,
            Write::Transform { path, .. } => path,
        }
    }

    pub fn precondition(&self) -> Option<&Precondition> {
        match self {
            Write::Update { precondition, .. } => precondition.as_ref(),
            Write::Delete { precondition, .. } => precondition.as_ref(),
            Write::Transform { precondition, .. } => precondition.as_ref(),
        }
    }
}

/// Per-write outcome of a successful commit
#[derive(Debug, Clone)]
pub struct WriteResult {
    /// Always the shared commit time
    pub update_time: DateTime<Utc>,
    /// One result per transform in the write, in input order
    pub transform_results: Vec<Value>,
}

/// Outcome of a successful commit
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub commit_time: DateTime<Utc>,
    /// Index-aligned with the request's writes
    pub write_results: Vec<WriteResult>,
}

/// Transaction selector for batchGet
#[derive(Debug, Clone)]
pub enum ReadConsistency {
    /// Plain read at the current state
    Default,
    /// Read inside an existing transaction's snapshot
    Transaction(String),
    /// Begin a transaction and read inside it
    NewTransaction { read_only: bool },
}

/// One batchGet response entry, index-aligned with the request
#[derive(Debug, Clone)]
pub struct BatchGetEntry {
    /// Canonical path from the request
    pub path: String,
    /// The document, if present (after mask projection)
    pub found: Option<Document>,
}

/// Outcome of a batchGet call
#[derive(Debug, Clone)]
pub struct BatchGetOutcome {
    /// Single read timestamp shared by every entry
    pub read_time: DateTime<Utc>,
    /// Transaction id echoed in every entry when newTransaction was used
    pub transaction: Option<String>,
    pub entries: Vec<BatchGetEntry>,
}

/// The operation executor, owner of the engine lock
pub struct Executor {
    store: Arc<RwLock<DocumentStore>>,
}

impl Executor {
    /// Create an executor over a fresh store
    pub fn new(txn_idle_timeout: Duration) -> Self {
        Self {
            store: Arc::new(RwLock::new(DocumentStore::new(txn_idle_timeout))),
        }
    }

    /// Shared handle to the engine lock, for read-only collaborators
    /// (the rules context adapter reads documents through this)
    pub fn store(&self) -> Arc<RwLock<DocumentStore>> {
        Arc::clone(&self.store)
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(crate::store::DEFAULT_TXN_IDLE_TIMEOUT)
    }
}

/// A poisoned engine lock means a panic happened mid-operation; surface it
/// as INTERNAL rather than propagating the panic to every later request.
pub(crate) fn poisoned_lock() -> crate::error::MiniStoreError {
    crate::error::MiniStoreError::Internal("Engine lock poisoned".into())
}
