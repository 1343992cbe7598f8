//! Deterministic stand-ins for the external collaborators, for tests and dry runs.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::embedder::Embedder;
use crate::error::{FetchError, ProviderError};
use crate::fetcher::PageSource;

/// Pages served from memory, keyed by path.
#[derive(Debug, Default, Clone)]
pub struct StaticPages {
    pages: HashMap<String, String>,
}

impl StaticPages {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `html` under `path`.
    pub fn with(mut self, path: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(path.into(), html.into());
        self
    }
}

impl PageSource for StaticPages {
    fn fetch(&self, path: &str) -> Result<String, FetchError> {
        self.pages
            .get(path)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: path.to_string(),
                status: 404,
            })
    }
}

/// Bag-of-words hashing embedder: texts sharing words get similar vectors.
#[derive(Debug)]
pub struct HashEmbedder {
    dimensions: usize,
    max_batch: usize,
    calls: AtomicUsize,
}

impl HashEmbedder {
    /// Embedder producing `dimensions`-wide unit vectors.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            max_batch: 2048,
            calls: AtomicUsize::new(0),
        }
    }

    /// Caps the accepted batch size.
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    /// Number of `embed_batch` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut values = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let slot = (hasher.finish() % self.dimensions as u64) as usize;
            values[slot] += 1.0;
        }
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|v| *v /= norm);
        } else {
            values[0] = 1.0;
        }
        values
    }
}

impl Embedder for HashEmbedder {
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if inputs.len() > self.max_batch {
            return Err(ProviderError::InvalidRequest(format!(
                "batch of {} exceeds limit {}",
                inputs.len(),
                self.max_batch
            )));
        }
        Ok(inputs.iter().map(|text| self.vector_for(text)).collect())
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch
    }
}

/// Wraps an embedder and fails exactly one call, the one after `healthy_calls` successes.
#[derive(Debug)]
pub struct FlakyEmbedder<E> {
    inner: E,
    healthy_calls: usize,
    calls: AtomicUsize,
}

impl<E: Embedder> FlakyEmbedder<E> {
    /// Wraps `inner`.
    pub fn new(inner: E, healthy_calls: usize) -> Self {
        Self {
            inner,
            healthy_calls,
            calls: AtomicUsize::new(0),
        }
    }
}

impl<E: Embedder> Embedder for FlakyEmbedder<E> {
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == self.healthy_calls {
            return Err(ProviderError::Status {
                status: 503,
                body: "provider unavailable".to_string(),
            });
        }
        self.inner.embed_batch(inputs)
    }

    fn max_batch_size(&self) -> usize {
        self.inner.max_batch_size()
    }
}
