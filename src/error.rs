//! Error types for MiniStore
//!
//! Defines a unified error type that can represent errors from all components.
//! Error messages and status codes are formatted to match the production
//! Firestore REST API, so client SDKs see the responses they expect.

use std::fmt;
use std::io;

/// Unified error type for MiniStore operations
#[derive(Debug)]
pub enum MiniStoreError {
    /// I/O error (network operations)
    Io(io::Error),
    /// Malformed request: bad path, bad payload, invalid transaction, batch overflow
    InvalidArgument(String),
    /// Unknown database or route
    NotFound(String),
    /// Precondition `exists: false` violated
    AlreadyExists(String),
    /// Precondition `exists: true` or `updateTime` violated
    FailedPrecondition(String),
    /// Transactional conflict detected at commit
    Aborted(String),
    /// Security rules denied the request
    PermissionDenied(String),
    /// Security-rules file syntax error
    Rules(String),
    /// Generic internal error
    Internal(String),
}

impl MiniStoreError {
    /// Create a production-compatible "document not found" error
    pub fn document_not_found(path: &str) -> Self {
        MiniStoreError::NotFound(format!("Document \"{}\" not found.", path))
    }

    /// Create a production-compatible "document already exists" error
    pub fn document_already_exists(path: &str) -> Self {
        MiniStoreError::AlreadyExists(format!("Document already exists: {}", path))
    }

    /// Create a production-compatible "invalid path" error
    pub fn invalid_path(path: &str, reason: &str) -> Self {
        MiniStoreError::InvalidArgument(format!("Invalid resource path \"{}\": {}", path, reason))
    }

    /// Create a production-compatible "unknown transaction" error
    pub fn invalid_transaction(id: &str) -> Self {
        MiniStoreError::InvalidArgument(format!("Invalid transaction id: {}", id))
    }

    /// Create a production-compatible stale-read conflict error
    pub fn transaction_conflict() -> Self {
        MiniStoreError::Aborted(
            "Transaction lock timeout; the document was modified by another transaction.".into(),
        )
    }
}

impl fmt::Display for MiniStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Production-compatible error messages: display the message directly
        // without prefixing with the error type (clients read the status field)
        match self {
            MiniStoreError::Io(e) => write!(f, "{}", e),
            MiniStoreError::InvalidArgument(msg) => write!(f, "{}", msg),
            MiniStoreError::NotFound(msg) => write!(f, "{}", msg),
            MiniStoreError::AlreadyExists(msg) => write!(f, "{}", msg),
            MiniStoreError::FailedPrecondition(msg) => write!(f, "{}", msg),
            MiniStoreError::Aborted(msg) => write!(f, "{}", msg),
            MiniStoreError::PermissionDenied(msg) => write!(f, "{}", msg),
            MiniStoreError::Rules(msg) => write!(f, "{}", msg),
            MiniStoreError::Internal(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for MiniStoreError {}

impl From<io::Error> for MiniStoreError {
    fn from(e: io::Error) -> Self {
        MiniStoreError::Io(e)
    }
}

impl From<serde_json::Error> for MiniStoreError {
    fn from(e: serde_json::Error) -> Self {
        MiniStoreError::InvalidArgument(format!("Invalid JSON payload: {}", e))
    }
}

/// Result type alias for MiniStore operations
pub type Result<T> = std::result::Result<T, MiniStoreError>;

impl MiniStoreError {
    /// Get the canonical gRPC-style status string for this error
    pub fn status(&self) -> &'static str {
        match self {
            MiniStoreError::InvalidArgument(_) | MiniStoreError::Rules(_) => "INVALID_ARGUMENT",
            MiniStoreError::NotFound(_) => "NOT_FOUND",
            MiniStoreError::AlreadyExists(_) => "ALREADY_EXISTS",
            MiniStoreError::FailedPrecondition(_) => "FAILED_PRECONDITION",
            MiniStoreError::Aborted(_) => "ABORTED",
            MiniStoreError::PermissionDenied(_) => "PERMISSION_DENIED",
            MiniStoreError::Io(_) | MiniStoreError::Internal(_) => "INTERNAL",
        }
    }

    /// Get the HTTP status code for this error
    ///
    /// The production API reports ALREADY_EXISTS and FAILED_PRECONDITION as
    /// 400, not the generic gRPC-to-HTTP mapping, and ABORTED as 409.
    pub fn http_status(&self) -> u16 {
        match self {
            MiniStoreError::InvalidArgument(_)
            | MiniStoreError::Rules(_)
            | MiniStoreError::AlreadyExists(_)
            | MiniStoreError::FailedPrecondition(_) => 400,
            MiniStoreError::NotFound(_) => 404,
            MiniStoreError::PermissionDenied(_) => 403,
            MiniStoreError::Aborted(_) => 409,
            MiniStoreError::Io(_) | MiniStoreError::Internal(_) => 500,
        }
    }

    /// Encode this error as the wire error body `{error: {code, message, status}}`
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": self.http_status(),
                "message": self.to_string(),
                "status": self.status(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(MiniStoreError::InvalidArgument("x".into()).status(), "INVALID_ARGUMENT");
        assert_eq!(MiniStoreError::NotFound("x".into()).status(), "NOT_FOUND");
        assert_eq!(MiniStoreError::AlreadyExists("x".into()).status(), "ALREADY_EXISTS");
        assert_eq!(MiniStoreError::FailedPrecondition("x".into()).status(), "FAILED_PRECONDITION");
        assert_eq!(MiniStoreError::Aborted("x".into()).status(), "ABORTED");
        assert_eq!(MiniStoreError::Internal("x".into()).status(), "INTERNAL");
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(MiniStoreError::InvalidArgument("x".into()).http_status(), 400);
        assert_eq!(MiniStoreError::AlreadyExists("x".into()).http_status(), 400);
        assert_eq!(MiniStoreError::FailedPrecondition("x".into()).http_status(), 400);
        assert_eq!(MiniStoreError::NotFound("x".into()).http_status(), 404);
        assert_eq!(MiniStoreError::Aborted("x".into()).http_status(), 409);
        assert_eq!(MiniStoreError::Internal("x".into()).http_status(), 500);
    }

    #[test]
    fn test_wire_error_body() {
        let err = MiniStoreError::Aborted("stale read".into());
        let body = err.to_json();
        assert_eq!(body["error"]["code"], 409);
        assert_eq!(body["error"]["status"], "ABORTED");
        assert_eq!(body["error"]["message"], "stale read");
    }
}
