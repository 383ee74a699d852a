//! Document path codec
//!
//! Canonical document paths have the form
//! `projects/{P}/databases/{D}/documents/{coll}/{id}/.../{coll}/{id}` with an
//! even number of segments after `documents` (at least one collection/id
//! pair). Only the default database name is accepted; anything else is
//! reported as NOT_FOUND, matching production.

use std::fmt;

use crate::error::{MiniStoreError, Result};

/// The only database name the emulator serves
pub const DEFAULT_DATABASE: &str = "(default)";

/// A parsed and validated document path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    /// Project id
    pub project: String,
    /// Database name (always the default)
    pub database: String,
    /// Alternating collection/id segments under `documents/`; even count >= 2
    pub segments: Vec<String>,
}

impl DocumentPath {
    /// Parse a canonical document path string
    pub fn parse(path: &str) -> Result<DocumentPath> {
        let parts: Vec<&str> = path.split('/').collect();

        if parts.len() < 7 {
            return Err(MiniStoreError::invalid_path(
                path,
                "expected projects/{project}/databases/{database}/documents/{collection}/{id}",
            ));
        }
        if parts[0] != "projects" || parts[2] != "databases" || parts[4] != "documents" {
            return Err(MiniStoreError::invalid_path(
                path,
                "expected projects/{project}/databases/{database}/documents/{collection}/{id}",
            ));
        }

        let project = parts[1];
        let database = parts[3];
        if project.is_empty() {
            return Err(MiniStoreError::invalid_path(path, "project id is empty"));
        }
        if database != DEFAULT_DATABASE {
            return Err(MiniStoreError::NotFound(format!(
                "Database \"{}\" not found.",
                database
            )));
        }

        let segments: Vec<String> = parts[5..].iter().map(|s| s.to_string()).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(MiniStoreError::invalid_path(path, "empty path segment"));
        }
        if segments.len() % 2 != 0 {
            return Err(MiniStoreError::invalid_path(
                path,
                "path must end at a document, not a collection",
            ));
        }

        Ok(DocumentPath {
            project: project.to_string(),
            database: database.to_string(),
            segments,
        })
    }

    /// Build a path from its parts without re-parsing
    pub fn new(project: &str, database: &str, segments: Vec<String>) -> DocumentPath {
        DocumentPath {
            project: project.to_string(),
            database: database.to_string(),
            segments,
        }
    }

    /// The immediate collection id (second-to-last segment)
    pub fn collection_id(&self) -> &str {
        &self.segments[self.segments.len() - 2]
    }

    /// The document id (last segment)
    pub fn document_id(&self) -> &str {
        &self.segments[self.segments.len() - 1]
    }

    /// The path suffix under `documents/`, joined with slashes
    pub fn relative_path(&self) -> String {
        self.segments.join("/")
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projects/{}/databases/{}/documents/{}",
            self.project,
            self.database,
            self.segments.join("/")
        )
    }
}

/// Parse a dotted field path into its map-key segments
///
/// Each segment references a key in a (possibly nested) mapValue. Empty
/// paths and empty segments are rejected.
pub fn parse_field_path(path: &str) -> Result<Vec<String>> {
    if path.is_empty() {
        return Err(MiniStoreError::InvalidArgument("Empty field path".into()));
    }
    let segments: Vec<String> = path.split('.').map(|s| s.to_string()).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(MiniStoreError::InvalidArgument(format!(
            "Invalid field path \"{}\": empty segment",
            path
        )));
    }
    Ok(segments)
}

/// Parse a document mask's field paths, rejecting the empty mask
pub fn parse_mask_paths(field_paths: &[String]) -> Result<Vec<Vec<String>>> {
    if field_paths.is_empty() {
        return Err(MiniStoreError::InvalidArgument(
            "Document mask must name at least one field path".into(),
        ));
    }
    field_paths.iter().map(|p| parse_field_path(p)).collect()
}
