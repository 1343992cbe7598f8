//! Namespaced vector index seam shared by the batcher and the retrieval engine.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::IndexError;
use crate::records::Metadata;

pub mod memory;
pub mod pinecone;

pub use memory::MemoryIndex;
pub use pinecone::PineconeIndex;

/// Default namespace for class overview records.
pub const OBJECTS_NAMESPACE: &str = "objects";
/// Default namespace for property, method and event records.
pub const OBJECT_ATTRS_NAMESPACE: &str = "object_attrs";
/// Default namespace for sample records.
pub const SAMPLES_NAMESPACE: &str = "samples";

/// Validated index partition name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    /// Builds a namespace; names must be non-blank and free of whitespace.
    pub fn new(name: impl Into<String>) -> Result<Self, IndexError> {
        let name = name.into();
        if name.trim().is_empty() || name.chars().any(char::is_whitespace) {
            return Err(IndexError::InvalidNamespace(name));
        }
        Ok(Self(name))
    }

    /// The default class namespace.
    pub fn objects() -> Self {
        Self(OBJECTS_NAMESPACE.to_string())
    }

    /// The default attribute namespace.
    pub fn object_attrs() -> Self {
        Self(OBJECT_ATTRS_NAMESPACE.to_string())
    }

    /// The default sample namespace.
    pub fn samples() -> Self {
        Self(SAMPLES_NAMESPACE.to_string())
    }

    /// Raw name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Namespace {
    type Error = IndexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Namespace> for String {
    fn from(namespace: Namespace) -> Self {
        namespace.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One `(id, vector, metadata)` triple to upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Record identifier; upserts replace by id.
    pub id: String,
    /// Embedding vector.
    pub values: Vec<f32>,
    /// String metadata.
    pub metadata: Metadata,
}

/// A scored hit returned by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    /// Record identifier.
    pub id: String,
    /// Similarity score, higher is closer.
    pub score: f32,
    /// Stored metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

/// Metadata restriction applied to a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataFilter {
    /// `field` must equal one of `values`.
    In {
        /// Metadata key.
        field: String,
        /// Accepted values.
        values: Vec<String>,
    },
}

impl MetadataFilter {
    /// Shorthand for [`MetadataFilter::In`].
    pub fn any_of(field: impl Into<String>, values: Vec<String>) -> Self {
        Self::In {
            field: field.into(),
            values,
        }
    }

    /// Whether `metadata` passes the filter.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Self::In { field, values } => metadata
                .get(field)
                .map(|value| values.iter().any(|accepted| accepted == value))
                .unwrap_or(false),
        }
    }

    /// Filter expression in the `{"field": {"$in": [...]}}` form.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::In { field, values } => {
                let mut object = serde_json::Map::new();
                object.insert(field.clone(), serde_json::json!({ "$in": values }));
                serde_json::Value::Object(object)
            }
        }
    }
}

/// Nearest-neighbour query parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorQuery<'a> {
    /// Query vector.
    pub vector: &'a [f32],
    /// Number of matches to return.
    pub top_k: usize,
    /// Optional metadata restriction.
    pub filter: Option<MetadataFilter>,
}

/// Namespaced vector store.
pub trait VectorIndex: Send + Sync {
    /// Creates or replaces `records` by id inside `namespace`.
    fn upsert(&self, namespace: &Namespace, records: &[VectorRecord]) -> Result<(), IndexError>;

    /// Returns up to `query.top_k` matches ordered by descending score.
    fn query(
        &self,
        namespace: &Namespace,
        query: &VectorQuery<'_>,
    ) -> Result<Vec<QueryMatch>, IndexError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_validation() {
        assert!(Namespace::new("object_attrs").is_ok());
        assert!(Namespace::new("  ").is_err());
        assert!(Namespace::new("two words").is_err());
    }

    #[test]
    fn in_filter_json_and_matching() {
        let filter = MetadataFilter::any_of("className", vec!["Sketch".into(), "Profile".into()]);
        assert_eq!(
            filter.to_json(),
            serde_json::json!({"className": {"$in": ["Sketch", "Profile"]}})
        );
        let mut metadata = Metadata::new();
        metadata.insert("className".into(), "Sketch".into());
        assert!(filter.matches(&metadata));
        metadata.insert("className".into(), "Point3D".into());
        assert!(!filter.matches(&metadata));
        assert!(!filter.matches(&Metadata::new()));
    }
}
