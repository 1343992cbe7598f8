//! End-of-run accounting printed by the crawl binary.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::records::RecordKind;

/// Why a page produced no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The page could not be fetched.
    Fetch,
    /// A required section or code block was missing.
    Extraction,
    /// The record was rejected by the formatter.
    Format,
}

impl DropReason {
    /// Short label used in summaries.
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::Fetch => "fetch",
            DropReason::Extraction => "extraction",
            DropReason::Format => "format",
        }
    }
}

/// Counters for one crawl run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Taxonomy nodes inspected.
    pub nodes_seen: usize,
    /// Pages dispatched for extraction.
    pub pages_visited: usize,
    /// Nodes skipped because of the exclusion marker (subtree roots).
    pub skipped_excluded: usize,
    /// Nodes skipped before the resume marker.
    pub skipped_before_marker: usize,
    /// Records produced, per kind.
    pub records_extracted: BTreeMap<String, usize>,
    /// Pages dropped, per reason.
    pub records_dropped: BTreeMap<DropReason, usize>,
    /// Sample descriptions that fell back to the documented text.
    pub enhancer_fallbacks: usize,
    /// Batches upserted.
    pub batches_upserted: usize,
    /// Records upserted.
    pub records_upserted: usize,
    /// Batches that failed to persist.
    pub failed_batches: usize,
    /// Records still unpersisted when the run ended.
    pub records_unpersisted: usize,
    /// Whether the run stopped early.
    pub interrupted: bool,
}

impl RunSummary {
    /// Counts one extracted record.
    pub fn record_extracted(&mut self, kind: RecordKind) {
        *self
            .records_extracted
            .entry(kind.as_str().to_string())
            .or_default() += 1;
    }

    /// Counts one dropped page.
    pub fn record_dropped(&mut self, reason: DropReason) {
        *self.records_dropped.entry(reason).or_default() += 1;
    }

    /// Total records extracted across kinds.
    pub fn total_extracted(&self) -> usize {
        self.records_extracted.values().sum()
    }

    /// Total pages dropped across reasons.
    pub fn total_dropped(&self) -> usize {
        self.records_dropped.values().sum()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "nodes seen: {} | pages visited: {} | skipped: {} excluded, {} before marker",
            self.nodes_seen, self.pages_visited, self.skipped_excluded, self.skipped_before_marker
        )?;
        write!(f, "records extracted: {}", self.total_extracted())?;
        for (kind, count) in &self.records_extracted {
            write!(f, " {kind}={count}")?;
        }
        writeln!(f)?;
        write!(f, "records dropped: {}", self.total_dropped())?;
        for (reason, count) in &self.records_dropped {
            write!(f, " {}={count}", reason.as_str())?;
        }
        writeln!(f)?;
        if self.enhancer_fallbacks > 0 {
            writeln!(f, "enhancer fallbacks: {}", self.enhancer_fallbacks)?;
        }
        writeln!(
            f,
            "upserted: {} records in {} batches | failed batches: {} | unpersisted: {}",
            self.records_upserted,
            self.batches_upserted,
            self.failed_batches,
            self.records_unpersisted
        )?;
        write!(
            f,
            "status: {}",
            if self.interrupted {
                "interrupted"
            } else {
                "complete"
            }
        )
    }
}
