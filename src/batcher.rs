//! Batched embedding and upsert of formatted records.

use crate::embedder::Embedder;
use crate::error::{CrawlError, ProviderError};
use crate::records::PageRecord;
use crate::vector_store::{Namespace, VectorIndex, VectorRecord};

/// Batching knobs.
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Records per embedding request and upsert.
    pub batch_size: usize,
    /// Language label written into `exampleUsage` metadata.
    pub language: String,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            language: "Python".to_string(),
        }
    }
}

/// Outcome of one [`EmbeddingBatcher::persist`] call.
#[derive(Debug, Default)]
pub struct PersistReport {
    /// Batches upserted successfully.
    pub batches_upserted: usize,
    /// Records contained in those batches.
    pub records_upserted: usize,
    /// Records from the failing batch onward, in original order.
    pub unpersisted: Vec<PageRecord>,
    /// Error that stopped the call, if any.
    pub error: Option<CrawlError>,
}

impl PersistReport {
    /// True when every record was upserted.
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Sequential embed-then-upsert loop over fixed-size batches.
///
/// Batches are independent: a failure leaves earlier batches in the index and hands the
/// remaining records back to the caller.
pub struct EmbeddingBatcher<'a> {
    embedder: &'a dyn Embedder,
    index: &'a dyn VectorIndex,
    config: BatcherConfig,
}

impl<'a> EmbeddingBatcher<'a> {
    /// Builds a batcher over the given provider and index.
    pub fn new(
        embedder: &'a dyn Embedder,
        index: &'a dyn VectorIndex,
        config: BatcherConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            config,
        }
    }

    /// Effective batch size: the configured size, bounded by what the provider accepts.
    pub fn batch_size(&self) -> usize {
        self.config
            .batch_size
            .min(self.embedder.max_batch_size())
            .max(1)
    }

    /// Embeds and upserts `records` into `namespace`.
    pub fn persist(&self, records: Vec<PageRecord>, namespace: &Namespace) -> PersistReport {
        let mut report = PersistReport::default();
        if records.is_empty() {
            return report;
        }
        let batch_size = self.batch_size();
        let total_batches = records.len().div_ceil(batch_size);
        let mut remaining = records.into_iter().peekable();
        let mut batch_no = 0usize;

        while remaining.peek().is_some() {
            batch_no += 1;
            let batch: Vec<PageRecord> = remaining.by_ref().take(batch_size).collect();
            tracing::info!(
                namespace = %namespace,
                batch = batch_no,
                total = total_batches,
                records = batch.len(),
                "persisting batch"
            );
            match self.persist_batch(&batch, namespace) {
                Ok(()) => {
                    report.batches_upserted += 1;
                    report.records_upserted += batch.len();
                }
                Err(err) => {
                    tracing::warn!(
                        namespace = %namespace,
                        batch = batch_no,
                        error = %err,
                        "batch failed; earlier batches are kept"
                    );
                    report.unpersisted = batch;
                    report.unpersisted.extend(remaining);
                    report.error = Some(err);
                    return report;
                }
            }
        }
        report
    }

    fn persist_batch(&self, batch: &[PageRecord], namespace: &Namespace) -> Result<(), CrawlError> {
        let inputs: Vec<&str> = batch
            .iter()
            .map(|record| record.searchable_text.as_str())
            .collect();
        let vectors = self.embedder.embed_batch(&inputs)?;
        if vectors.len() != batch.len() {
            return Err(ProviderError::Malformed(format!(
                "embedding count {} mismatched batch {}",
                vectors.len(),
                batch.len()
            ))
            .into());
        }
        let records: Vec<VectorRecord> = batch
            .iter()
            .zip(vectors)
            .map(|(record, values)| VectorRecord {
                id: record.id.clone(),
                values,
                metadata: record.metadata(&self.config.language),
            })
            .collect();
        self.index.upsert(namespace, &records)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{RawFields, SampleFields};
    use crate::records::RecordFormatter;
    use crate::testing::{FlakyEmbedder, HashEmbedder};
    use crate::vector_store::MemoryIndex;

    fn records(count: usize) -> Vec<PageRecord> {
        let formatter = RecordFormatter::default();
        (0..count)
            .map(|i| {
                formatter
                    .format(RawFields::Sample(SampleFields {
                        title: format!("Sample {i}"),
                        description: format!("Demo number {i}."),
                        code: format!("print({i})"),
                    }))
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn partitions_into_batches() {
        let embedder = HashEmbedder::new(16);
        let index = MemoryIndex::new();
        let ns = Namespace::new("samples").unwrap();
        let batcher = EmbeddingBatcher::new(
            &embedder,
            &index,
            BatcherConfig {
                batch_size: 2,
                ..BatcherConfig::default()
            },
        );
        let report = batcher.persist(records(5), &ns);
        assert!(report.is_complete());
        assert_eq!(report.batches_upserted, 3);
        assert_eq!(report.records_upserted, 5);
        assert_eq!(index.len(&ns), 5);
        assert_eq!(embedder.calls(), 3);
    }

    #[test]
    fn failure_keeps_earlier_batches_and_returns_the_rest() {
        let embedder = FlakyEmbedder::new(HashEmbedder::new(8), 1);
        let index = MemoryIndex::new();
        let ns = Namespace::new("samples").unwrap();
        let batcher = EmbeddingBatcher::new(
            &embedder,
            &index,
            BatcherConfig {
                batch_size: 2,
                ..BatcherConfig::default()
            },
        );
        let report = batcher.persist(records(5), &ns);
        assert!(matches!(report.error, Some(CrawlError::Provider(_))));
        assert_eq!(report.batches_upserted, 1);
        assert_eq!(index.ids(&ns), vec!["Sample 0", "Sample 1"]);
        let leftover: Vec<&str> = report.unpersisted.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(leftover, vec!["Sample 2", "Sample 3", "Sample 4"]);
    }

    #[test]
    fn batch_size_is_bounded_by_provider() {
        let embedder = HashEmbedder::new(4).with_max_batch(3);
        let index = MemoryIndex::new();
        let batcher = EmbeddingBatcher::new(&embedder, &index, BatcherConfig::default());
        assert_eq!(batcher.batch_size(), 3);
    }
}
