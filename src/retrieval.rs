//! Two-stage retrieval: parent classes first, then their best attributes.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::embedder::Embedder;
use crate::error::RetrievalError;
use crate::records::{keys, Metadata};
use crate::vector_store::{MetadataFilter, Namespace, QueryMatch, VectorIndex, VectorQuery};

/// Attribute-name keys consulted in order when grouping matches.
const ATTRIBUTE_KEYS: [&str; 4] = [
    keys::ATTRIBUTE_NAME,
    keys::PROPERTY_NAME,
    keys::METHOD_NAME,
    keys::EVENT_NAME,
];

/// One retrieval query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalRequest {
    /// Natural-language question.
    pub text: String,
    /// Parent classes fetched in stage 1.
    pub top_k_parents: usize,
    /// Namespace holding class records.
    pub parent_namespace: Namespace,
    /// Namespace holding property/method/event records.
    pub attr_namespace: Namespace,
    /// Attributes returned after deduplication.
    pub top_k_attrs: usize,
    /// Raw matches requested from the index in stage 2.
    pub top_k_raw_attrs: usize,
    /// Optional score floor applied after deduplication.
    pub min_score: Option<f32>,
}

impl Default for RetrievalRequest {
    fn default() -> Self {
        Self {
            text: String::new(),
            top_k_parents: 5,
            parent_namespace: Namespace::objects(),
            attr_namespace: Namespace::object_attrs(),
            top_k_attrs: 8,
            top_k_raw_attrs: 50,
            min_score: None,
        }
    }
}

impl RetrievalRequest {
    /// Request for `text` with default sizes and namespaces.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// A class found in stage 1.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParentCandidate {
    /// Class name from the `className` metadata.
    pub name: String,
    /// Stored record kind, empty when absent.
    pub kind: String,
    /// Similarity score.
    pub score: f32,
    /// Full stored metadata.
    pub metadata: Metadata,
}

/// A ranked attribute match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalMatch {
    /// Record id.
    pub id: String,
    /// Similarity score.
    pub score: f32,
    /// Stored metadata.
    pub metadata: Metadata,
}

impl RetrievalMatch {
    /// Owning class, if recorded.
    pub fn class_name(&self) -> Option<&str> {
        self.metadata.get(keys::CLASS_NAME).map(String::as_str)
    }

    /// Attribute name from the first populated name key.
    pub fn attribute_name(&self) -> Option<&str> {
        ATTRIBUTE_KEYS
            .iter()
            .find_map(|key| self.metadata.get(*key))
            .map(String::as_str)
    }

    fn group_key(&self) -> (Option<String>, Option<String>) {
        (
            self.class_name().map(str::to_string),
            self.attribute_name().map(str::to_string),
        )
    }
}

impl From<QueryMatch> for RetrievalMatch {
    fn from(hit: QueryMatch) -> Self {
        Self {
            id: hit.id,
            score: hit.score,
            metadata: hit.metadata,
        }
    }
}

/// Output of [`RetrievalEngine::query`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    /// Stage-1 classes in provider order.
    pub parents: Vec<ParentCandidate>,
    /// Deduplicated attributes, best first.
    pub attrs: Vec<RetrievalMatch>,
    /// True when stage 1 found nothing and an unfiltered search was used.
    pub fallback: bool,
}

/// Read side of the pipeline.
#[derive(Clone)]
pub struct RetrievalEngine {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl RetrievalEngine {
    /// Builds an engine over a provider and an index.
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Runs both stages for `request`.
    pub fn query(&self, request: &RetrievalRequest) -> Result<RetrievalResult, RetrievalError> {
        if request.text.trim().is_empty() {
            return Err(RetrievalError::InvalidRequest("query text is empty".into()));
        }
        let vector = self.embedder.embed_one(&request.text)?;

        let parents = self.find_parents(&vector, request)?;
        tracing::debug!(parents = parents.len(), "stage 1 complete");

        if parents.is_empty() {
            tracing::info!(
                namespace = %request.attr_namespace,
                "no parent classes found; running unfiltered attribute search"
            );
            let raw = self.index.query(
                &request.attr_namespace,
                &VectorQuery {
                    vector: &vector,
                    top_k: request.top_k_raw_attrs,
                    filter: None,
                },
            )?;
            return Ok(RetrievalResult {
                parents,
                attrs: rank_attributes(raw, request.top_k_attrs, request.min_score),
                fallback: true,
            });
        }

        let mut names: Vec<String> = Vec::with_capacity(parents.len());
        for parent in &parents {
            if !names.contains(&parent.name) {
                names.push(parent.name.clone());
            }
        }
        let raw = self.index.query(
            &request.attr_namespace,
            &VectorQuery {
                vector: &vector,
                top_k: request.top_k_raw_attrs,
                filter: Some(MetadataFilter::any_of(keys::CLASS_NAME, names)),
            },
        )?;
        Ok(RetrievalResult {
            parents,
            attrs: rank_attributes(raw, request.top_k_attrs, request.min_score),
            fallback: false,
        })
    }

    fn find_parents(
        &self,
        vector: &[f32],
        request: &RetrievalRequest,
    ) -> Result<Vec<ParentCandidate>, RetrievalError> {
        let hits = self.index.query(
            &request.parent_namespace,
            &VectorQuery {
                vector,
                top_k: request.top_k_parents,
                filter: None,
            },
        )?;
        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                let name = hit
                    .metadata
                    .get(keys::CLASS_NAME)
                    .filter(|name| !name.is_empty())?
                    .clone();
                Some(ParentCandidate {
                    name,
                    kind: hit.metadata.get(keys::KIND).cloned().unwrap_or_default(),
                    score: hit.score,
                    metadata: hit.metadata,
                })
            })
            .collect())
    }
}

/// Keeps the best match per `(className, attribute)` and orders the survivors by score.
pub fn best_per_attribute(matches: Vec<QueryMatch>) -> Vec<RetrievalMatch> {
    let mut best: Vec<RetrievalMatch> = Vec::new();
    let mut slots: HashMap<(Option<String>, Option<String>), usize> = HashMap::new();
    for hit in matches.into_iter().map(RetrievalMatch::from) {
        let key = hit.group_key();
        match slots.get(&key) {
            Some(&slot) => {
                if hit.score > best[slot].score {
                    best[slot] = hit;
                }
            }
            None => {
                slots.insert(key, best.len());
                best.push(hit);
            }
        }
    }
    best.sort_by(|a, b| b.score.total_cmp(&a.score));
    best
}

fn rank_attributes(
    matches: Vec<QueryMatch>,
    top_k: usize,
    min_score: Option<f32>,
) -> Vec<RetrievalMatch> {
    let mut ranked = best_per_attribute(matches);
    if let Some(floor) = min_score {
        ranked.retain(|hit| hit.score >= floor);
    }
    ranked.truncate(top_k);
    ranked
}

/// Plain-text context block for an LLM prompt.
pub fn render_context(result: &RetrievalResult) -> String {
    let rule = "-".repeat(60);
    let mut out = String::new();

    out.push_str("Parent classes:\n");
    if result.parents.is_empty() {
        out.push_str("(none)\n");
    }
    for parent in &result.parents {
        out.push_str(&format!("- {}", parent.name));
        if !parent.kind.is_empty() {
            out.push_str(&format!(" [{}]", parent.kind));
        }
        out.push_str(&format!(" (score={:.3})\n", parent.score));
    }

    let heading = if result.fallback {
        "Attributes (unfiltered search):"
    } else {
        "Attributes:"
    };
    out.push_str(&format!("\n{heading}\n{rule}\n"));
    if result.attrs.is_empty() {
        out.push_str(&format!("(none)\n{rule}\n"));
    }
    for hit in &result.attrs {
        let header = format!(
            "{}.{}",
            hit.class_name().unwrap_or_default(),
            hit.attribute_name().unwrap_or_default()
        );
        out.push_str(header.trim_matches('.'));
        if let Some(kind) = hit.metadata.get(keys::KIND) {
            out.push_str(&format!(" [{kind}]"));
        }
        out.push_str(&format!(" (score={:.3})\n", hit.score));
        if let Some(text) = hit.metadata.get(keys::TEXT) {
            out.push_str(text);
            out.push('\n');
        }
        out.push_str(&rule);
        out.push('\n');
    }
    out
}
