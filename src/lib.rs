#![warn(missing_docs)]
//! Core library for docrag: API-reference crawling, record extraction, batched
//! embedding and two-stage retrieval.

pub mod batcher;
pub mod controls;
pub mod embedder;
pub mod enhancer;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod html;
pub mod records;
pub mod retrieval;
pub mod runtime;
pub mod summary;
pub mod taxonomy;
pub mod testing;
pub mod vector_store;

pub use batcher::{BatcherConfig, EmbeddingBatcher, PersistReport};
pub use controls::{CrawlCli, CrawlControls, CrawlTarget, IndexArgs, ProviderArgs};
pub use error::{
    CrawlError, ExtractionError, FetchError, FormatError, IndexError, ProviderError,
    RetrievalError, TaxonomyError,
};
pub use extractor::{PageExtractor, PageKind, RawFields};
pub use fetcher::{DirectoryPageSource, HttpPageSource, PageSource};
pub use records::{PageRecord, RecordFormatter, RecordKind};
pub use retrieval::{render_context, RetrievalEngine, RetrievalRequest, RetrievalResult};
pub use runtime::{CrawlOutcome, CrawlRuntime, CrawlServices};
pub use summary::{DropReason, RunSummary};
pub use taxonomy::{TaxonomyDocument, TaxonomyNode, TaxonomyPath, WalkPolicy, WalkState};
pub use vector_store::{MemoryIndex, Namespace, PineconeIndex, VectorIndex};

/// Installs the `tracing` subscriber used by the binaries.
///
/// `RUST_LOG` overrides the default `docrag=info` filter.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docrag=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
