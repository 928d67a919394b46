use std::fmt::{Display, Formatter};

use crate::error::{invalid_argument, StoreResult};

/// A slash-separated path into the remote store, e.g. `widgets/abc123`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourcePath {
    segments: Vec<String>,
}

impl ResourcePath {
    pub fn new(segments: Vec<String>) -> Self {
        Self { segments }
    }

    pub fn root() -> Self {
        Self { segments: Vec::new() }
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(segments.into_iter().map(Into::into).collect())
    }

    pub fn from_string(path: &str) -> StoreResult<Self> {
        if path.trim().is_empty() {
            return Ok(Self::root());
        }
        if path.contains("//") {
            return Err(invalid_argument("Found empty segment in resource path"));
        }
        Ok(Self::from_segments(
            path.split('/')
                .filter(|segment| !segment.is_empty())
                .map(|segment| segment.to_string()),
        ))
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn child<I, S>(&self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut new_segments = self.segments.clone();
        new_segments.extend(segments.into_iter().map(Into::into));
        Self::new(new_segments)
    }

    pub fn without_last(&self) -> Self {
        let mut segments = self.segments.clone();
        segments.pop();
        Self::new(segments)
    }

    pub fn last_segment(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    pub fn canonical_string(&self) -> String {
        self.segments.join("/")
    }

    pub fn is_prefix_of(&self, other: &Self) -> bool {
        if self.len() > other.len() {
            return false;
        }
        self.segments.iter().zip(other.segments.iter()).all(|(l, r)| l == r)
    }
}

impl Display for ResourcePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical_string())
    }
}

/// A validated path to a single document: `collection/id` pairs, so an even,
/// non-zero number of segments.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    path: ResourcePath,
}

impl DocumentKey {
    pub fn from_path(path: ResourcePath) -> StoreResult<Self> {
        if path.len() < 2 || path.len() % 2 != 0 {
            return Err(invalid_argument(
                "Document keys must point to a document (even number of segments)",
            ));
        }
        Ok(Self { path })
    }

    pub fn from_string(path: &str) -> StoreResult<Self> {
        Self::from_path(ResourcePath::from_string(path)?)
    }

    pub fn collection_path(&self) -> ResourcePath {
        self.path.without_last()
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn id(&self) -> &str {
        self.path
            .last_segment()
            .expect("DocumentKey path always has an id segment")
    }
}

impl Display for DocumentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// A dot-separated path into a document's fields, e.g. `stats.visits`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn new<S, I>(segments: I) -> StoreResult<Self>
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return Err(invalid_argument("FieldPath segments cannot be empty"));
        }
        Ok(Self { segments })
    }

    pub fn from_dot_separated(path: &str) -> StoreResult<Self> {
        if path.trim().is_empty() {
            return Err(invalid_argument("FieldPath string cannot be empty"));
        }
        FieldPath::new(path.split('.'))
    }

    pub fn first_segment(&self) -> &str {
        self.segments
            .first()
            .expect("FieldPath always has at least one segment")
            .as_str()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn canonical_string(&self) -> String {
        self.segments.join(".")
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_render_resource_path() {
        let path = ResourcePath::from_string("widgets/abc/parts/bolt").unwrap();
        assert_eq!(path.len(), 4);
        assert_eq!(path.last_segment(), Some("bolt"));
        assert_eq!(path.canonical_string(), "widgets/abc/parts/bolt");
    }

    #[test]
    fn rejects_empty_segments() {
        let err = ResourcePath::from_string("widgets//abc").unwrap_err();
        assert_eq!(err.code_str(), "mirrorstore/invalid-argument");
    }

    #[test]
    fn document_key_needs_even_segments() {
        let err = DocumentKey::from_string("widgets").unwrap_err();
        assert_eq!(err.code_str(), "mirrorstore/invalid-argument");

        let key = DocumentKey::from_string("widgets/abc").unwrap();
        assert_eq!(key.id(), "abc");
        assert_eq!(key.collection_path().canonical_string(), "widgets");
    }

    #[test]
    fn field_path_from_dot_notation() {
        let field = FieldPath::from_dot_separated("stats.visits").unwrap();
        assert_eq!(field.segments(), &["stats", "visits"]);
        assert_eq!(field.first_segment(), "stats");
    }

    #[test]
    fn field_path_rejects_empty() {
        assert!(FieldPath::from_dot_separated("").is_err());
        assert!(FieldPath::from_dot_separated("a..b").is_err());
    }

    #[test]
    fn prefix_relation() {
        let collection = ResourcePath::from_string("widgets").unwrap();
        let doc = ResourcePath::from_string("widgets/abc").unwrap();
        assert!(collection.is_prefix_of(&doc));
        assert!(!doc.is_prefix_of(&collection));
    }
}
