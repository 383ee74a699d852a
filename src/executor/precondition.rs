//! Precondition checks
//!
//! A precondition is a pre-apply predicate on the current document: either
//! an existence requirement or an exact update-time match. Preconditions are
//! checked for every write in a commit before any write is applied, so a
//! single failure aborts the whole batch with no mutation.

use chrono::{DateTime, Utc};

use crate::error::{MiniStoreError, Result};
use crate::types::{format_timestamp, Document};

/// Either `{exists: bool}` or `{updateTime: timestamp}`, never both
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    Exists(bool),
    UpdateTime(DateTime<Utc>),
}

impl Precondition {
    /// Evaluate against the current document at `path`
    pub fn check(&self, current: Option<&Document>, path: &str) -> Result<()> {
        match self {
            Precondition::Exists(true) => {
                if current.is_none() {
                    // exists:true on a missing document is FAILED_PRECONDITION,
                    // not NOT_FOUND
                    return Err(MiniStoreError::FailedPrecondition(format!(
                        "Document \"{}\" does not exist",
                        path
                    )));
                }
            }
            Precondition::Exists(false) => {
                if current.is_some() {
                    return Err(MiniStoreError::document_already_exists(path));
                }
            }
            Precondition::UpdateTime(expected) => match current {
                None => {
                    return Err(MiniStoreError::FailedPrecondition(format!(
                        "Document \"{}\" does not exist; expected updateTime {}",
                        path,
                        format_timestamp(*expected)
                    )));
                }
                Some(doc) if doc.update_time != *expected => {
                    return Err(MiniStoreError::FailedPrecondition(format!(
                        "Document \"{}\" has updateTime {}, expected {}",
                        path,
                        format_timestamp(doc.update_time),
                        format_timestamp(*expected)
                    )));
                }
                Some(_) => {}
            },
        }
        Ok(())
    }
}
