//! Typed errors for each pipeline stage.
//!
//! Per-page failures ([`FetchError`], [`ExtractionError`], [`FormatError`]) are
//! contained at the taxonomy node that produced them. Provider and index
//! failures abort the current batch and surface through [`CrawlError`].

use thiserror::Error;

/// Failure retrieving a taxonomy document or page.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The relative path could not be joined onto the host prefix.
    #[error("invalid page path {path:?}: {source}")]
    InvalidPath {
        /// Offending path.
        path: String,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },

    /// Transport failure (connect, timeout, body read).
    #[error("request for {url} failed: {source}")]
    Http {
        /// Requested URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// Response status code.
        status: u16,
    },

    /// Reading a page from a local mirror failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Local file path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Failure extracting structured fields from a fetched page.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// A heading the page kind requires was not present.
    #[error("required section {section:?} missing")]
    MissingSection {
        /// Heading label that was searched for.
        section: &'static str,
    },

    /// A sample page had no code container.
    #[error("code container for {language} missing")]
    MissingCode {
        /// Configured code language label.
        language: String,
    },

    /// An attribute page heading could not be split into class and member.
    #[error("unrecognized member title {0:?}")]
    UnrecognizedTitle(String),
}

/// Failure turning extracted fields into an embeddable record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Text plus code exceed the configured sample budget.
    #[error("record {id} is {size} characters, limit is {limit}")]
    TooLarge {
        /// Record identifier.
        id: String,
        /// Combined text and code length.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },
}

/// Failure talking to an embedding or chat-completion provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport failure after retries were exhausted.
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status after retries were exhausted.
    #[error("provider returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The response decoded but did not match the request.
    #[error("malformed provider response: {0}")]
    Malformed(String),

    /// The request itself was rejected before sending.
    #[error("invalid provider request: {0}")]
    InvalidRequest(String),
}

/// Failure reading from or writing to the vector index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Namespace name failed validation.
    #[error("invalid namespace {0:?}")]
    InvalidNamespace(String),

    /// Transport failure.
    #[error("index request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status.
    #[error("index returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// Vector dimensions disagree with what the namespace already holds.
    #[error("vector for {id} has {actual} dimensions, namespace expects {expected}")]
    Dimension {
        /// Record identifier.
        id: String,
        /// Dimension already stored in the namespace.
        expected: usize,
        /// Dimension of the rejected vector.
        actual: usize,
    },

    /// Reading or writing a local index snapshot failed.
    #[error("index snapshot {path}: {source}")]
    Snapshot {
        /// Snapshot file path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A snapshot file did not decode.
    #[error("invalid index snapshot: {0}")]
    SnapshotFormat(#[from] serde_json::Error),
}

/// Failure decoding or navigating the taxonomy document.
#[derive(Debug, Error)]
pub enum TaxonomyError {
    /// The JSON document did not match the taxonomy shape.
    #[error("invalid taxonomy document: {0}")]
    Decode(#[from] serde_json::Error),

    /// A path segment was not a non-negative integer.
    #[error("invalid taxonomy path segment {0:?}")]
    InvalidPath(String),

    /// A path index was out of range.
    #[error("taxonomy path {path} has no node at depth {depth}")]
    OutOfRange {
        /// The full path being resolved.
        path: String,
        /// Zero-based depth where resolution failed.
        depth: usize,
    },
}

/// Pipeline-level failure that stops a crawl.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Taxonomy retrieval or navigation failed.
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),

    /// The taxonomy document could not be fetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The embedding provider gave up on a batch.
    #[error("embedding provider failed: {0}")]
    Provider(#[from] ProviderError),

    /// The index rejected an upsert.
    #[error("index write failed: {0}")]
    Index(#[from] IndexError),

    /// A worker thread panicked or its channel closed early.
    #[error("worker pool failed: {0}")]
    Worker(String),
}

/// Failure while answering a retrieval query.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The query text could not be embedded.
    #[error("query embedding failed: {0}")]
    Provider(#[from] ProviderError),

    /// The index query failed.
    #[error("index query failed: {0}")]
    Index(#[from] IndexError),

    /// The request was rejected before any provider call.
    #[error("invalid retrieval request: {0}")]
    InvalidRequest(String),
}
