//! Crawl knobs and the command-line argument groups shared by the binaries.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, ValueEnum};

use crate::embedder::openai::OpenAiEmbedderConfig;
use crate::embedder::{Embedder, OpenAiEmbedder};
use crate::enhancer::{DescriptionEnhancer, EnhancerSettings, OpenAiEnhancer, PassthroughEnhancer};
use crate::extractor::ExtractorConfig;
use crate::records::FormatterConfig;
use crate::taxonomy::{WalkPolicy, DEFAULT_ROOT_SENTINEL, EXPERIMENTAL_GLYPH};
use crate::error::IndexError;
use crate::vector_store::{
    MemoryIndex, Namespace, PineconeIndex, VectorIndex, OBJECTS_NAMESPACE, OBJECT_ATTRS_NAMESPACE,
    SAMPLES_NAMESPACE,
};

/// Which part of the documentation tree a crawl covers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum CrawlTarget {
    /// Class overview pages and their member pages.
    Objects,
    /// Code sample pages.
    Samples,
}

/// Tunable knobs for one crawl run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrawlControls {
    workers: usize,
    batch_size: usize,
    language: String,
    resume_marker: Option<String>,
    exclusion_marker: String,
    root_sentinel: String,
    max_sample_chars: usize,
    class_namespace: Namespace,
    attr_namespace: Namespace,
    sample_namespace: Namespace,
}

impl CrawlControls {
    /// Number of fetch/extract worker threads.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Records per embedding batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Code language label.
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Title dispatch resumes from, if any.
    pub fn resume_marker(&self) -> Option<&str> {
        self.resume_marker.as_deref()
    }

    /// Namespace for class records.
    pub fn class_namespace(&self) -> &Namespace {
        &self.class_namespace
    }

    /// Namespace for property, method and event records.
    pub fn attr_namespace(&self) -> &Namespace {
        &self.attr_namespace
    }

    /// Namespace for sample records.
    pub fn sample_namespace(&self) -> &Namespace {
        &self.sample_namespace
    }

    /// Sets the worker count (at least one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the embedding batch size (at least one).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Sets the code language label.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Sets the resume marker; blank values clear it.
    pub fn with_resume_marker(mut self, marker: Option<String>) -> Self {
        self.resume_marker = marker.filter(|title| !title.trim().is_empty());
        self
    }

    /// Sets the exclusion substring.
    pub fn with_exclusion_marker(mut self, marker: impl Into<String>) -> Self {
        self.exclusion_marker = marker.into();
        self
    }

    /// Sets the interior title that is never dispatched.
    pub fn with_root_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.root_sentinel = sentinel.into();
        self
    }

    /// Sets the sample size ceiling.
    pub fn with_max_sample_chars(mut self, limit: usize) -> Self {
        self.max_sample_chars = limit;
        self
    }

    /// Overrides the three output namespaces.
    pub fn with_namespaces(mut self, class: Namespace, attr: Namespace, sample: Namespace) -> Self {
        self.class_namespace = class;
        self.attr_namespace = attr;
        self.sample_namespace = sample;
        self
    }

    /// Walk policy for `target`.
    pub fn walk_policy(&self, target: CrawlTarget) -> WalkPolicy {
        let base = match target {
            CrawlTarget::Objects => WalkPolicy::default(),
            CrawlTarget::Samples => WalkPolicy::samples(),
        };
        WalkPolicy {
            exclusion_marker: self.exclusion_marker.clone(),
            root_sentinel: self.root_sentinel.clone(),
            ..base
        }
    }

    /// Extractor settings derived from these controls.
    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            language: self.language.clone(),
            ..ExtractorConfig::default()
        }
    }

    /// Formatter settings derived from these controls.
    pub fn formatter_config(&self) -> FormatterConfig {
        FormatterConfig {
            max_sample_chars: self.max_sample_chars,
        }
    }
}

impl Default for CrawlControls {
    fn default() -> Self {
        Self {
            workers: 1,
            batch_size: 50,
            language: "Python".to_string(),
            resume_marker: None,
            exclusion_marker: EXPERIMENTAL_GLYPH.to_string(),
            root_sentinel: DEFAULT_ROOT_SENTINEL.to_string(),
            max_sample_chars: FormatterConfig::default().max_sample_chars,
            class_namespace: Namespace::objects(),
            attr_namespace: Namespace::object_attrs(),
            sample_namespace: Namespace::samples(),
        }
    }
}

/// Embedding and chat provider settings.
#[derive(Args, Debug, Clone)]
pub struct ProviderArgs {
    /// OpenAI API key.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Base URL for OpenAI-compatible endpoints.
    #[arg(long, env = "DOCRAG_OPENAI_BASE", default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,

    /// Embedding model identifier.
    #[arg(long, env = "DOCRAG_EMBED_MODEL", default_value = "text-embedding-3-small")]
    pub embed_model: String,

    /// Optional embedding dimension override.
    #[arg(long, env = "DOCRAG_EMBED_DIMENSIONS")]
    pub embed_dimensions: Option<usize>,

    /// Max inputs per embedding request.
    #[arg(long, env = "DOCRAG_EMBED_BATCH", default_value_t = 256)]
    pub embed_batch_limit: usize,

    /// Seconds before provider requests time out.
    #[arg(long, env = "DOCRAG_PROVIDER_TIMEOUT_SECS", default_value_t = 30)]
    pub provider_timeout_secs: u64,

    /// Attempts for transient provider errors.
    #[arg(long, env = "DOCRAG_MAX_RETRIES", default_value_t = 5)]
    pub max_retries: usize,

    /// Use the offline hashing embedder instead of a remote provider.
    #[arg(long, env = "DOCRAG_OFFLINE_EMBEDDER", default_value_t = false)]
    pub offline_embedder: bool,

    /// Dimensions of the offline embedder.
    #[arg(long, env = "DOCRAG_OFFLINE_DIMENSIONS", default_value_t = 256)]
    pub offline_dimensions: usize,
}

impl ProviderArgs {
    /// Request timeout for provider calls.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs.max(1))
    }

    /// Builds the configured embedding provider.
    pub fn build_embedder(&self) -> anyhow::Result<Arc<dyn Embedder>> {
        if self.offline_embedder {
            return Ok(Arc::new(crate::testing::HashEmbedder::new(
                self.offline_dimensions,
            )));
        }
        let api_key = self
            .openai_api_key
            .clone()
            .context("OPENAI_API_KEY is required unless --offline-embedder is set")?;
        let embedder = OpenAiEmbedder::new(OpenAiEmbedderConfig {
            api_key,
            base_url: self.openai_base_url.clone(),
            model: self.embed_model.clone(),
            dimensions: self.embed_dimensions,
            timeout: self.timeout(),
            max_retries: self.max_retries.max(1),
            batch_size: self.embed_batch_limit.max(1),
        })?;
        Ok(Arc::new(embedder))
    }
}

/// Vector index backend.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum IndexBackend {
    /// In-process index, optionally persisted to a JSON snapshot.
    Memory,
    /// Pinecone-compatible REST index.
    Pinecone,
}

/// Vector index settings.
#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    /// Index backend.
    #[arg(long, env = "DOCRAG_INDEX", value_enum, default_value = "memory")]
    pub index: IndexBackend,

    /// Snapshot file for the memory backend (loaded if present, written after a crawl).
    #[arg(long, env = "DOCRAG_SNAPSHOT")]
    pub snapshot: Option<PathBuf>,

    /// Pinecone API key.
    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true)]
    pub pinecone_api_key: Option<String>,

    /// Pinecone index host, e.g. https://docs-abc123.svc.pinecone.io.
    #[arg(long, env = "DOCRAG_PINECONE_HOST")]
    pub pinecone_host: Option<String>,

    /// Seconds before index requests time out.
    #[arg(long, env = "DOCRAG_INDEX_TIMEOUT_SECS", default_value_t = 30)]
    pub index_timeout_secs: u64,
}

/// A built index plus the memory handle, when the memory backend is in use.
pub struct IndexHandle {
    /// Index used by the pipeline.
    pub index: Arc<dyn VectorIndex>,
    /// Same index as a [`MemoryIndex`], for snapshotting.
    pub memory: Option<Arc<MemoryIndex>>,
}

impl IndexArgs {
    /// Builds the configured index.
    pub fn build_index(&self) -> anyhow::Result<IndexHandle> {
        match self.index {
            IndexBackend::Memory => {
                let memory = match &self.snapshot {
                    Some(path) if path.exists() => MemoryIndex::load(path)
                        .with_context(|| format!("failed to load snapshot {}", path.display()))?,
                    _ => MemoryIndex::new(),
                };
                let memory = Arc::new(memory);
                Ok(IndexHandle {
                    index: memory.clone(),
                    memory: Some(memory),
                })
            }
            IndexBackend::Pinecone => {
                let api_key = self
                    .pinecone_api_key
                    .as_deref()
                    .context("PINECONE_API_KEY is required for --index pinecone")?;
                let host = self
                    .pinecone_host
                    .as_deref()
                    .context("--pinecone-host is required for --index pinecone")?;
                let index = PineconeIndex::new(
                    api_key,
                    host,
                    Duration::from_secs(self.index_timeout_secs.max(1)),
                )?;
                Ok(IndexHandle {
                    index: Arc::new(index),
                    memory: None,
                })
            }
        }
    }
}

impl IndexHandle {
    /// Writes the memory snapshot when both a memory index and a path are configured.
    pub fn save_snapshot(&self, path: Option<&PathBuf>) -> anyhow::Result<()> {
        if let (Some(memory), Some(path)) = (&self.memory, path) {
            memory
                .save(path)
                .with_context(|| format!("failed to write snapshot {}", path.display()))?;
            tracing::info!(path = %path.display(), "index snapshot written");
        }
        Ok(())
    }
}

fn parse_namespace(raw: &str) -> Result<Namespace, IndexError> {
    Namespace::new(raw)
}

/// Command-line interface of the crawl binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "docrag-crawl",
    about = "Crawl an API reference into a vector index"
)]
pub struct CrawlCli {
    /// Part of the documentation tree to crawl.
    #[arg(long, env = "DOCRAG_TARGET", value_enum, default_value = "objects")]
    pub target: CrawlTarget,

    /// Host prefix pages are fetched from.
    #[arg(long, env = "DOCRAG_HOST", default_value = "https://help.autodesk.com")]
    pub host: String,

    /// Read pages from a local mirror directory instead of the host.
    #[arg(long, env = "DOCRAG_MIRROR")]
    pub mirror: Option<PathBuf>,

    /// Site-relative path of the taxonomy document.
    #[arg(
        long,
        env = "DOCRAG_TAXONOMY",
        default_value = "/view/fusion360/ENU/data/toctree.json"
    )]
    pub taxonomy: String,

    /// Index path to the crawl root inside the taxonomy (defaults per target).
    #[arg(long, env = "DOCRAG_ROOT_PATH")]
    pub root_path: Option<String>,

    /// Title to resume dispatch from (inclusive).
    #[arg(long, env = "DOCRAG_RESUME_FROM")]
    pub resume_from: Option<String>,

    /// Substring marking excluded subtrees.
    #[arg(long, env = "DOCRAG_EXCLUDE_MARKER", default_value = EXPERIMENTAL_GLYPH)]
    pub exclude_marker: String,

    /// Fetch/extract worker threads.
    #[arg(long, env = "DOCRAG_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Records per embedding batch.
    #[arg(long, env = "DOCRAG_BATCH_SIZE", default_value_t = 50)]
    pub batch_size: usize,

    /// Code language label.
    #[arg(long, env = "DOCRAG_LANGUAGE", default_value = "Python")]
    pub language: String,

    /// Seconds before page requests time out.
    #[arg(long, env = "DOCRAG_FETCH_TIMEOUT_SECS", default_value_t = 30)]
    pub fetch_timeout_secs: u64,

    /// Milliseconds to wait between page requests.
    #[arg(long, env = "DOCRAG_POLITENESS_MS", default_value_t = 250)]
    pub politeness_ms: u64,

    /// Rewrite sample descriptions with the chat model.
    #[arg(long, env = "DOCRAG_ENHANCE", default_value_t = false)]
    pub enhance: bool,

    /// Chat model used for sample descriptions.
    #[arg(long, env = "DOCRAG_CHAT_MODEL", default_value = "gpt-4o-mini")]
    pub chat_model: String,

    /// Product name used in the enhancement prompt.
    #[arg(long, env = "DOCRAG_PRODUCT", default_value = "Fusion 360")]
    pub product: String,

    /// Interior title that groups classes and is never dispatched itself.
    #[arg(long, env = "DOCRAG_ROOT_SENTINEL", default_value = DEFAULT_ROOT_SENTINEL)]
    pub root_sentinel: String,

    /// Max characters of sample text plus code before a sample is dropped.
    #[arg(
        long,
        env = "DOCRAG_MAX_SAMPLE_CHARS",
        default_value_t = FormatterConfig::default().max_sample_chars
    )]
    pub max_sample_chars: usize,

    /// Namespace for class records.
    #[arg(
        long,
        env = "DOCRAG_CLASS_NAMESPACE",
        default_value = OBJECTS_NAMESPACE,
        value_parser = parse_namespace
    )]
    pub class_namespace: Namespace,

    /// Namespace for property, method and event records.
    #[arg(
        long,
        env = "DOCRAG_ATTR_NAMESPACE",
        default_value = OBJECT_ATTRS_NAMESPACE,
        value_parser = parse_namespace
    )]
    pub attr_namespace: Namespace,

    /// Namespace for sample records.
    #[arg(
        long,
        env = "DOCRAG_SAMPLE_NAMESPACE",
        default_value = SAMPLES_NAMESPACE,
        value_parser = parse_namespace
    )]
    pub sample_namespace: Namespace,

    #[command(flatten)]
    #[allow(missing_docs)]
    pub provider: ProviderArgs,

    #[command(flatten)]
    #[allow(missing_docs)]
    pub index: IndexArgs,
}

impl CrawlCli {
    /// Converts the parsed CLI into `CrawlControls`.
    pub fn build_controls(&self) -> CrawlControls {
        CrawlControls::default()
            .with_workers(self.workers)
            .with_batch_size(self.batch_size)
            .with_language(self.language.clone())
            .with_resume_marker(self.resume_from.clone())
            .with_exclusion_marker(self.exclude_marker.clone())
            .with_root_sentinel(self.root_sentinel.clone())
            .with_max_sample_chars(self.max_sample_chars)
            .with_namespaces(
                self.class_namespace.clone(),
                self.attr_namespace.clone(),
                self.sample_namespace.clone(),
            )
    }

    /// Taxonomy path of the crawl root for the selected target.
    pub fn root_path(&self) -> &str {
        match (&self.root_path, self.target) {
            (Some(path), _) => path.as_str(),
            (None, CrawlTarget::Objects) => "20/3/0",
            (None, CrawlTarget::Samples) => "20/4",
        }
    }

    /// Request timeout for page fetches.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    /// Delay between page fetches.
    pub fn politeness_delay(&self) -> Duration {
        Duration::from_millis(self.politeness_ms)
    }

    /// Builds the sample-description enhancer.
    pub fn build_enhancer(&self) -> anyhow::Result<Arc<dyn DescriptionEnhancer>> {
        if !self.enhance {
            return Ok(Arc::new(PassthroughEnhancer));
        }
        let api_key = self
            .provider
            .openai_api_key
            .as_deref()
            .context("OPENAI_API_KEY is required with --enhance")?;
        let enhancer = OpenAiEnhancer::new(
            api_key,
            &self.provider.openai_base_url,
            self.provider.timeout(),
            EnhancerSettings {
                model: self.chat_model.clone(),
                product: self.product.clone(),
                language: self.language.clone(),
                ..EnhancerSettings::default()
            },
        )?;
        Ok(Arc::new(enhancer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_map_to_controls() {
        let cli = CrawlCli::parse_from(["docrag-crawl"]);
        let controls = cli.build_controls();
        assert_eq!(controls.workers(), 1);
        assert_eq!(controls.batch_size(), 50);
        assert_eq!(controls.resume_marker(), None);
        assert_eq!(cli.root_path(), "20/3/0");
        assert_eq!(cli.fetch_timeout(), Duration::from_secs(30));
        assert_eq!(cli.provider.max_retries, 5);
        assert_eq!(cli.index.index, IndexBackend::Memory);
    }

    #[test]
    fn samples_target_uses_leaf_only_policy() {
        let cli = CrawlCli::parse_from([
            "docrag-crawl",
            "--target",
            "samples",
            "--resume-from",
            "Spur Gear Sample",
            "--workers",
            "0",
        ]);
        let controls = cli.build_controls();
        assert_eq!(cli.root_path(), "20/4");
        assert_eq!(controls.resume_marker(), Some("Spur Gear Sample"));
        assert_eq!(controls.workers(), 1);
        assert!(!controls.walk_policy(CrawlTarget::Samples).dispatch_interior);
        assert!(controls.walk_policy(CrawlTarget::Objects).dispatch_interior);
    }

    #[test]
    fn output_settings_reach_controls() {
        let cli = CrawlCli::parse_from([
            "docrag-crawl",
            "--root-sentinel",
            "Classes",
            "--max-sample-chars",
            "128",
            "--class-namespace",
            "classes",
            "--attr-namespace",
            "members",
        ]);
        let controls = cli.build_controls();
        assert_eq!(controls.class_namespace().as_str(), "classes");
        assert_eq!(controls.attr_namespace().as_str(), "members");
        assert_eq!(controls.sample_namespace().as_str(), "samples");
        assert_eq!(controls.formatter_config().max_sample_chars, 128);
        assert_eq!(controls.walk_policy(CrawlTarget::Objects).root_sentinel, "Classes");
    }

    #[test]
    fn invalid_namespace_is_rejected_at_parse_time() {
        let parsed = CrawlCli::try_parse_from(["docrag-crawl", "--class-namespace", "two words"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn blank_resume_marker_is_ignored() {
        let controls = CrawlControls::default().with_resume_marker(Some("  ".into()));
        assert_eq!(controls.resume_marker(), None);
    }
}
