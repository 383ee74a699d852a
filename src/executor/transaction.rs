//! Transaction lifecycle operations
//!
//! `beginTransaction` creates a transaction with a fresh random id;
//! `rollback` moves an active transaction to its terminal rolled-back
//! state. Commit-side termination lives in the commit coordinator.

use log::debug;

use crate::error::{MiniStoreError, Result};
use crate::store::TxnState;

use super::Executor;

impl Executor {
    /// Begin a transaction, returning its 32-hex id
    pub fn begin_transaction(&self, read_only: bool) -> Result<String> {
        let mut store = self.store.write().map_err(|_| super::poisoned_lock())?;
        Ok(store.create_transaction(read_only))
    }

    /// Roll back an active transaction
    ///
    /// Rolling back a committed transaction, a rolled-back transaction, or
    /// an unknown/expired id is INVALID_ARGUMENT.
    pub fn rollback(&self, transaction: &str) -> Result<()> {
        if transaction.is_empty() {
            return Err(MiniStoreError::InvalidArgument(
                "Missing required field: transaction".into(),
            ));
        }
        let mut store = self.store.write().map_err(|_| super::poisoned_lock())?;
        let txn = store.get_active_transaction(transaction)?;
        txn.state = TxnState::RolledBack;
        debug!("rolled back transaction {}", transaction);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_and_rollback() {
        let executor = Executor::default();
        let id = executor.begin_transaction(false).unwrap();
        assert_eq!(id.len(), 32);
        executor.rollback(&id).unwrap();

        // Second rollback is rejected: the transaction is terminal
        let err = executor.rollback(&id).unwrap_err();
        assert_eq!(err.status(), "INVALID_ARGUMENT");
        assert!(err.to_string().contains("rolled back"));
    }

    #[test]
    fn test_rollback_unknown_transaction() {
        let executor = Executor::default();
        let err = executor.rollback("0123456789abcdef0123456789abcdef").unwrap_err();
        assert_eq!(err.status(), "INVALID_ARGUMENT");
    }

    #[test]
    fn test_rollback_missing_id() {
        let executor = Executor::default();
        let err = executor.rollback("").unwrap_err();
        assert_eq!(err.status(), "INVALID_ARGUMENT");
    }
}
