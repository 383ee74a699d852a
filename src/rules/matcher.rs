//! Path pattern matcher
//!
//! Match blocks carry path patterns whose segments are literals, single
//! wildcards `{name}`, or a trailing recursive wildcard `{name=**}`. A
//! recursive wildcard consumes one or more remaining segments and binds the
//! joined remainder; it is only meaningful at the tail, and malformed
//! patterns degrade to best-effort literal matching rather than erroring.

use std::collections::HashMap;

/// A parsed match pattern
#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    pub segments: Vec<PatternSegment>,
    /// Original source text, for diagnostics
    pub raw: String,
}

/// One pattern segment
#[derive(Debug, Clone, PartialEq)]
pub enum PatternSegment {
    /// Must equal the path segment exactly
    Literal(String),
    /// `{name}`: matches exactly one segment, binds it
    Single(String),
    /// `{name=**}`: matches one or more trailing segments, binds the join
    Recursive(String),
}

/// Wildcard bindings produced by a successful match
pub type Bindings = HashMap<String, String>;

/// Result of matching a full path against a pattern
#[derive(Debug, Clone, PartialEq)]
pub struct PathMatch {
    pub bindings: Bindings,
}

impl PathPattern {
    /// Parse a raw pattern path like `/users/{uid}` or `/files/{rest=**}`
    pub fn parse(raw: &str) -> PathPattern {
        let segments = normalize(raw)
            .into_iter()
            .map(|seg| {
                if seg.starts_with('{') && seg.ends_with('}') {
                    let inner = &seg[1..seg.len() - 1];
                    match inner.strip_suffix("=**") {
                        Some(name) => PatternSegment::Recursive(name.to_string()),
                        None => PatternSegment::Single(inner.to_string()),
                    }
                } else {
                    PatternSegment::Literal(seg)
                }
            })
            .collect();
        PathPattern {
            segments,
            raw: raw.to_string(),
        }
    }

    /// Match the entire path (already split into segments)
    pub fn match_path(&self, path: &[String]) -> Option<PathMatch> {
        let (bindings, consumed) = self.match_prefix(path)?;
        if consumed == path.len() {
            Some(PathMatch { bindings })
        } else {
            None
        }
    }

    /// Match a prefix of `path`, returning bindings and segments consumed
    ///
    /// Literal and single-wildcard segments consume one path segment each;
    /// a trailing recursive wildcard consumes everything left (at least
    /// one segment). Used by nested match blocks to descend with the
    /// remaining suffix.
    pub fn match_prefix(&self, path: &[String]) -> Option<(Bindings, usize)> {
        let mut bindings = Bindings::new();
        let mut i = 0usize;

        for (idx, segment) in self.segments.iter().enumerate() {
            match segment {
                PatternSegment::Literal(lit) => {
                    if path.get(i) != Some(lit) {
                        return None;
                    }
                    i += 1;
                }
                PatternSegment::Single(name) => {
                    let value = path.get(i)?;
                    bindings.insert(name.clone(), value.clone());
                    i += 1;
                }
                PatternSegment::Recursive(name) => {
                    // Only the tail position is supported; a zero-length
                    // remainder is a non-match
                    if idx != self.segments.len() - 1 || i >= path.len() {
                        return None;
                    }
                    bindings.insert(name.clone(), path[i..].join("/"));
                    return Some((bindings, path.len()));
                }
            }
        }

        Some((bindings, i))
    }

    /// Whether this pattern ends in a recursive wildcard
    pub fn has_recursive_tail(&self) -> bool {
        matches!(self.segments.last(), Some(PatternSegment::Recursive(_)))
    }
}

/// Split a path into segments, stripping leading/trailing slashes and
/// collapsing empty segments
pub fn normalize(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Collection-group matching: a path belongs to collection group `c` iff
/// its second-to-last segment equals `c`; the document id is bound as
/// `document`.
pub fn match_collection_group(collection_id: &str, path: &str) -> Option<PathMatch> {
    let segments = normalize(path);
    if segments.len() < 2 {
        return None;
    }
    if segments[segments.len() - 2] != collection_id {
        return None;
    }
    let mut bindings = Bindings::new();
    bindings.insert("document".to_string(), segments[segments.len() - 1].clone());
    Some(PathMatch { bindings })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segs(path: &str) -> Vec<String> {
        normalize(path)
    }

    #[test]
    fn test_parse_pattern_segments() {
        let pattern = PathPattern::parse("/users/{uid}/files/{rest=**}");
        assert_eq!(
            pattern.segments,
            vec![
                PatternSegment::Literal("users".into()),
                PatternSegment::Single("uid".into()),
                PatternSegment::Literal("files".into()),
                PatternSegment::Recursive("rest".into()),
            ]
        );
    }

    #[test]
    fn test_normalize_collapses_empty_segments() {
        assert_eq!(normalize("/a//b/"), vec!["a", "b"]);
        assert_eq!(normalize("a/b"), vec!["a", "b"]);
        assert!(normalize("/").is_empty());
    }

    #[test]
    fn test_literal_and_single_match() {
        let pattern = PathPattern::parse("/users/{uid}");
        let m = pattern.match_path(&segs("/users/alice")).unwrap();
        assert_eq!(m.bindings.get("uid"), Some(&"alice".to_string()));
    }

    #[test]
    fn test_literal_mismatch() {
        let pattern = PathPattern::parse("/users/{uid}");
        assert!(pattern.match_path(&segs("/groups/alice")).is_none());
    }

    #[test]
    fn test_segment_count_mismatch() {
        let pattern = PathPattern::parse("/users/{uid}");
        assert!(pattern.match_path(&segs("/users")).is_none());
        assert!(pattern.match_path(&segs("/users/alice/extra")).is_none());
    }

    #[test]
    fn test_recursive_tail_binds_joined_remainder() {
        let pattern = PathPattern::parse("/files/{rest=**}");
        let m = pattern.match_path(&segs("/files/a/b/c")).unwrap();
        assert_eq!(m.bindings.get("rest"), Some(&"a/b/c".to_string()));
    }

    #[test]
    fn test_recursive_tail_requires_at_least_one_segment() {
        let pattern = PathPattern::parse("/files/{rest=**}");
        assert!(pattern.match_path(&segs("/files")).is_none());
    }

    #[test]
    fn test_recursive_not_at_tail_never_matches() {
        let pattern = PathPattern::parse("/files/{rest=**}/meta");
        assert!(pattern.match_path(&segs("/files/a/meta")).is_none());
    }

    #[test]
    fn test_match_prefix_leaves_remainder() {
        let pattern = PathPattern::parse("/users/{uid}");
        let (bindings, consumed) = pattern.match_prefix(&segs("/users/alice/posts/p1")).unwrap();
        assert_eq!(consumed, 2);
        assert_eq!(bindings.get("uid"), Some(&"alice".to_string()));
    }

    #[test]
    fn test_concrete_values_round_trip() {
        // A pattern of literals and singles reproduces the concrete path
        let pattern = PathPattern::parse("/a/{x}/b/{y}");
        let m = pattern.match_path(&segs("/a/1/b/2")).unwrap();
        assert_eq!(m.bindings.get("x"), Some(&"1".to_string()));
        assert_eq!(m.bindings.get("y"), Some(&"2".to_string()));
    }

    #[test]
    fn test_collection_group_match() {
        let m = match_collection_group("posts", "/users/alice/posts/p1").unwrap();
        assert_eq!(m.bindings.get("document"), Some(&"p1".to_string()));

        assert!(match_collection_group("posts", "/users/alice").is_none());
        assert!(match_collection_group("posts", "/posts").is_none());
        let m = match_collection_group("posts", "/posts/p9").unwrap();
        assert_eq!(m.bindings.get("document"), Some(&"p9".to_string()));
    }
}
