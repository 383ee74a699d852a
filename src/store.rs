//! Document store for MiniStore
//!
//! An in-memory mapping from canonical document path to document, plus the
//! transaction table. The store itself is a plain struct; the `Executor`
//! wraps it in the single coarse engine lock, so every method here runs with
//! the lock already held.
//!
//! Transactions cache the first read of each path into their snapshot;
//! repeated reads of the same path inside one transaction are served from
//! the cache so the transaction observes a consistent view. At commit time
//! the coordinator compares each snapshot entry's observed update time with
//! the store's current state and aborts on any mismatch.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::debug;

use crate::error::{MiniStoreError, Result};
use crate::types::{truncate_to_micros, Document};

/// Default idle timeout after which a transaction id stops being honored
pub const DEFAULT_TXN_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Transaction lifecycle states; transitions are one-way
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    RolledBack,
}

/// An open or recently terminated transaction
#[derive(Debug)]
pub struct Transaction {
    /// Opaque random id, 32 lowercase hex characters
    pub id: String,
    /// Read-only transactions may not appear on a commit
    pub read_only: bool,
    /// Wall-clock time the transaction began
    pub start_time: DateTime<Utc>,
    /// Observed update time per path at first read (None = missing at read)
    pub read_snapshot: HashMap<String, Option<DateTime<Utc>>>,
    /// Cached documents backing consistent repeated reads
    snapshot_docs: HashMap<String, Option<Document>>,
    /// Lifecycle state
    pub state: TxnState,
    /// Last time a request referenced this transaction (idle-timeout clock)
    last_used: Instant,
}

impl Transaction {
    fn new(id: String, read_only: bool) -> Self {
        Self {
            id,
            read_only,
            start_time: truncate_to_micros(Utc::now()),
            read_snapshot: HashMap::new(),
            snapshot_docs: HashMap::new(),
            state: TxnState::Active,
            last_used: Instant::now(),
        }
    }

    /// Whether the transaction has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state != TxnState::Active
    }
}

/// Generate an opaque 128-bit transaction id as 32 hex characters
fn generate_txn_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// The document store: all documents and transactions, plus the commit clock
pub struct DocumentStore {
    /// Documents keyed by canonical path string
    documents: HashMap<String, Document>,
    /// Open and recently terminated transactions keyed by id
    transactions: HashMap<String, Transaction>,
    /// Latest commit time handed out; the clock never repeats or goes back
    last_commit_time: Option<DateTime<Utc>>,
    /// Idle timeout for transaction ids
    txn_idle_timeout: Duration,
}

impl DocumentStore {
    pub fn new(txn_idle_timeout: Duration) -> Self {
        Self {
            documents: HashMap::new(),
            transactions: HashMap::new(),
            last_commit_time: None,
            txn_idle_timeout,
        }
    }

    // ---------------------------------------------------------------------
    // Documents
    // ---------------------------------------------------------------------

    /// Look up a document by canonical path
    pub fn get(&self, path: &str) -> Option<&Document> {
        self.documents.get(path)
    }

    /// Insert or replace the document at `path`
    pub fn set(&mut self, path: String, doc: Document) {
        self.documents.insert(path, doc);
    }

    /// Remove the document at `path`; absent paths are a no-op
    pub fn delete(&mut self, path: &str) {
        self.documents.remove(path);
    }

    /// Whether a document exists at `path`
    pub fn exists(&self, path: &str) -> bool {
        self.documents.contains_key(path)
    }

    /// Number of stored documents (used by tests to assert atomicity)
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    // ---------------------------------------------------------------------
    // Commit clock
    // ---------------------------------------------------------------------

    /// Choose the next commit time: max(now, last + 1 microsecond)
    ///
    /// Microsecond granularity so timestamps round-trip the wire exactly,
    /// and strictly monotonic so consecutive commits are always ordered.
    pub fn next_commit_time(&mut self) -> DateTime<Utc> {
        let now = truncate_to_micros(Utc::now());
        let chosen = match self.last_commit_time {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_commit_time = Some(chosen);
        chosen
    }

    /// The latest commit time handed out, if any
    pub fn last_commit_time(&self) -> Option<DateTime<Utc>> {
        self.last_commit_time
    }

    // ---------------------------------------------------------------------
    // Transactions
    // ---------------------------------------------------------------------

    /// Begin a new transaction and return its id
    pub fn create_transaction(&mut self, read_only: bool) -> String {
        self.sweep_expired();
        let id = generate_txn_id();
        debug!("begin transaction {} (read_only={})", id, read_only);
        self.transactions
            .insert(id.clone(), Transaction::new(id.clone(), read_only));
        id
    }

    /// Look up a transaction by id, refreshing its idle clock
    ///
    /// Expired ids (terminal or active) behave exactly like unknown ids.
    pub fn get_transaction(&mut self, id: &str) -> Result<&mut Transaction> {
        let timeout = self.txn_idle_timeout;
        if let Some(txn) = self.transactions.get(id) {
            if txn.last_used.elapsed() > timeout {
                debug!("transaction {} expired after idle timeout", id);
                self.transactions.remove(id);
                return Err(MiniStoreError::invalid_transaction(id));
            }
        }
        match self.transactions.get_mut(id) {
            Some(txn) => {
                txn.last_used = Instant::now();
                Ok(txn)
            }
            None => Err(MiniStoreError::invalid_transaction(id)),
        }
    }

    /// Look up a transaction and require it to be active
    pub fn get_active_transaction(&mut self, id: &str) -> Result<&mut Transaction> {
        let txn = self.get_transaction(id)?;
        match txn.state {
            TxnState::Active => Ok(txn),
            TxnState::Committed => Err(MiniStoreError::InvalidArgument(format!(
                "Transaction {} has already been committed",
                id
            ))),
            TxnState::RolledBack => Err(MiniStoreError::InvalidArgument(format!(
                "Transaction {} has already been rolled back",
                id
            ))),
        }
    }

    /// Read a document inside a transaction, caching the first observation
    ///
    /// The first read of each path records (exists?, updateTime) into the
    /// snapshot and caches the document; later reads of the same path return
    /// the cached copy regardless of intervening commits.
    pub fn read_in_transaction(&mut self, txn_id: &str, path: &str) -> Result<Option<Document>> {
        // Observe current state first to avoid holding a mutable borrow of
        // the transaction across the document lookup.
        let current = self.documents.get(path).cloned();

        let txn = self.get_active_transaction(txn_id)?;
        if let Some(cached) = txn.snapshot_docs.get(path) {
            return Ok(cached.clone());
        }
        txn.read_snapshot
            .insert(path.to_string(), current.as_ref().map(|d| d.update_time));
        txn.snapshot_docs.insert(path.to_string(), current.clone());
        Ok(current)
    }

    /// Drop terminal transactions that have outlived the idle timeout
    ///
    /// Terminal records are kept around so duplicate commit/rollback calls
    /// get a precise error rather than "invalid transaction".
    fn sweep_expired(&mut self) {
        let timeout = self.txn_idle_timeout;
        self.transactions
            .retain(|_, txn| txn.last_used.elapsed() <= timeout);
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new(DEFAULT_TXN_IDLE_TIMEOUT)
    }
}
