//! In-process cosine-similarity index, used for dry runs and tests.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{Namespace, QueryMatch, VectorIndex, VectorQuery, VectorRecord};
use crate::error::IndexError;
use crate::records::Metadata;

type Partition = BTreeMap<String, (Vec<f32>, Metadata)>;

/// Thread-safe in-memory index with create-or-replace upserts.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    namespaces: Mutex<HashMap<Namespace, Partition>>,
}

impl MemoryIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records stored in `namespace`.
    pub fn len(&self, namespace: &Namespace) -> usize {
        self.lock().get(namespace).map(BTreeMap::len).unwrap_or(0)
    }

    /// Whether `namespace` holds no records.
    pub fn is_empty(&self, namespace: &Namespace) -> bool {
        self.len(namespace) == 0
    }

    /// Metadata stored for `id`, if present.
    pub fn metadata(&self, namespace: &Namespace, id: &str) -> Option<Metadata> {
        self.lock()
            .get(namespace)
            .and_then(|partition| partition.get(id))
            .map(|(_, metadata)| metadata.clone())
    }

    /// Ids stored in `namespace`, sorted.
    pub fn ids(&self, namespace: &Namespace) -> Vec<String> {
        self.lock()
            .get(namespace)
            .map(|partition| partition.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Writes every namespace to `path` as JSON.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let snapshot: BTreeMap<String, Vec<VectorRecord>> = self
            .lock()
            .iter()
            .map(|(namespace, partition)| {
                let records = partition
                    .iter()
                    .map(|(id, (values, metadata))| VectorRecord {
                        id: id.clone(),
                        values: values.clone(),
                        metadata: metadata.clone(),
                    })
                    .collect();
                (namespace.to_string(), records)
            })
            .collect();
        let body = serde_json::to_vec(&snapshot)?;
        fs::write(path, body).map_err(|source| IndexError::Snapshot {
            path: path.display().to_string(),
            source,
        })
    }

    /// Loads an index previously written by [`MemoryIndex::save`].
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let body = fs::read(path).map_err(|source| IndexError::Snapshot {
            path: path.display().to_string(),
            source,
        })?;
        let snapshot: BTreeMap<Namespace, Vec<VectorRecord>> = serde_json::from_slice(&body)?;
        let index = Self::new();
        for (namespace, records) in snapshot {
            index.upsert(&namespace, &records)?;
        }
        Ok(index)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Namespace, Partition>> {
        match self.namespaces.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl VectorIndex for MemoryIndex {
    fn upsert(&self, namespace: &Namespace, records: &[VectorRecord]) -> Result<(), IndexError> {
        let mut namespaces = self.lock();
        let partition = namespaces.entry(namespace.clone()).or_default();
        let expected = partition.values().next().map(|(values, _)| values.len());
        for record in records {
            if let Some(expected) = expected.filter(|dims| *dims != record.values.len()) {
                return Err(IndexError::Dimension {
                    id: record.id.clone(),
                    expected,
                    actual: record.values.len(),
                });
            }
        }
        for record in records {
            partition.insert(
                record.id.clone(),
                (record.values.clone(), record.metadata.clone()),
            );
        }
        Ok(())
    }

    fn query(
        &self,
        namespace: &Namespace,
        query: &VectorQuery<'_>,
    ) -> Result<Vec<QueryMatch>, IndexError> {
        let namespaces = self.lock();
        let Some(partition) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };
        let mut matches: Vec<QueryMatch> = partition
            .iter()
            .filter(|(_, (_, metadata))| {
                query
                    .filter
                    .as_ref()
                    .map(|filter| filter.matches(metadata))
                    .unwrap_or(true)
            })
            .map(|(id, (values, metadata))| QueryMatch {
                id: id.clone(),
                score: cosine(query.vector, values),
                metadata: metadata.clone(),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(query.top_k);
        Ok(matches)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
