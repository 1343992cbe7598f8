//! Crawl runner: walks the taxonomy, fans page work out to a worker pool and
//! persists records in dispatch order.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::batcher::{BatcherConfig, EmbeddingBatcher};
use crate::controls::{CrawlControls, CrawlTarget};
use crate::embedder::Embedder;
use crate::enhancer::DescriptionEnhancer;
use crate::error::CrawlError;
use crate::extractor::{PageExtractor, PageKind, RawFields};
use crate::fetcher::PageSource;
use crate::records::{PageRecord, RecordFormatter, RecordKind};
use crate::summary::{DropReason, RunSummary};
use crate::taxonomy::{walk, TaxonomyDocument, TaxonomyNode, TaxonomyPath, VisitTarget, WalkState};
use crate::vector_store::{Namespace, VectorIndex};

/// External collaborators used by a crawl.
#[derive(Clone)]
pub struct CrawlServices {
    /// Page and taxonomy source.
    pub pages: Arc<dyn PageSource>,
    /// Embedding provider.
    pub embedder: Arc<dyn Embedder>,
    /// Destination index.
    pub index: Arc<dyn VectorIndex>,
    /// Sample description rewriter.
    pub enhancer: Arc<dyn DescriptionEnhancer>,
}

/// Result of [`CrawlRuntime::run`]: the summary is always present, the error only when the
/// run stopped on a pipeline-level failure.
#[derive(Debug)]
pub struct CrawlOutcome {
    /// Counters for the run.
    pub summary: RunSummary,
    /// First pipeline-level failure, if any.
    pub error: Option<CrawlError>,
}

impl CrawlOutcome {
    /// Converts into a `Result`, dropping the summary on failure.
    pub fn into_result(self) -> Result<RunSummary, CrawlError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.summary),
        }
    }
}

/// Coordinates one crawl run.
pub struct CrawlRuntime {
    services: CrawlServices,
    controls: CrawlControls,
    stop: Arc<AtomicBool>,
}

impl CrawlRuntime {
    /// Builds a runtime with a fresh stop flag.
    pub fn new(services: CrawlServices, controls: CrawlControls) -> Self {
        Self {
            services,
            controls,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shares an externally owned stop flag (e.g. raised by Ctrl-C).
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Fetches and decodes the taxonomy document at `path`.
    pub fn load_taxonomy(&self, path: &str) -> Result<TaxonomyDocument, CrawlError> {
        let body = self.services.pages.fetch(path)?;
        Ok(TaxonomyDocument::from_json(&body)?)
    }

    /// Loads the taxonomy at `taxonomy` and crawls the subtree at `root`.
    pub fn run_from(
        &self,
        taxonomy: &str,
        root: &TaxonomyPath,
        target: CrawlTarget,
    ) -> CrawlOutcome {
        let document = match self.load_taxonomy(taxonomy) {
            Ok(document) => document,
            Err(err) => return failed_before_start(err),
        };
        match document.resolve(root) {
            Ok(node) => {
                tracing::info!(root = %root, title = %node.title, ?target, "crawl root resolved");
                self.run(node, target)
            }
            Err(err) => failed_before_start(err.into()),
        }
    }

    /// Crawls `root`, persisting every record produced.
    ///
    /// The final flush runs even when the crawl loop fails, is cancelled or panics.
    pub fn run(&self, root: &TaxonomyNode, target: CrawlTarget) -> CrawlOutcome {
        let controls = &self.controls;
        let policy = controls.walk_policy(target);
        let mut state = WalkState::new(controls.resume_marker().map(str::to_string))
            .with_stop_flag(self.stop.clone());
        let batcher = EmbeddingBatcher::new(
            &*self.services.embedder,
            &*self.services.index,
            BatcherConfig {
                batch_size: controls.batch_size(),
                language: controls.language().to_string(),
            },
        );
        let mut collector = Collector::new(batcher, controls, &self.stop);

        let worker = PageWorker {
            pages: self.services.pages.clone(),
            extractor: Arc::new(PageExtractor::new(controls.extractor_config())),
            formatter: RecordFormatter::new(controls.formatter_config()),
            enhancer: self.services.enhancer.clone(),
        };
        let workers = controls.workers().max(1);
        let (task_tx, task_rx) = bounded::<PageJob>(workers * 2);
        let (result_tx, result_rx) = unbounded::<PageResult>();
        let handles = match spawn_workers(workers, &worker, &task_rx, &result_tx) {
            Ok(handles) => handles,
            Err(err) => return failed_before_start(err),
        };
        drop(task_rx);
        drop(result_tx);

        let walked = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut next_job = 0usize;
            walk(root, &policy, &mut state, |visit| -> Result<(), CrawlError> {
                let job = PageJob {
                    seq: next_job,
                    title: visit.title.to_string(),
                    link: visit.link.to_string(),
                    kind: page_kind(target, visit.target),
                };
                next_job += 1;
                task_tx
                    .send(job)
                    .map_err(|_| CrawlError::Worker("page workers exited early".into()))?;
                collector.drain_ready(&result_rx);
                Ok(())
            });
            drop(task_tx);
        }));
        if walked.is_err() {
            tracing::error!("crawl loop panicked; flushing collected records");
            collector.fail(CrawlError::Worker("crawl loop panicked".into()));
        }

        for result in result_rx.iter() {
            collector.accept(result);
        }
        for handle in handles {
            if handle.join().is_err() {
                collector.fail(CrawlError::Worker("page worker panicked".into()));
            }
        }
        collector.apply_stragglers();
        collector.flush_all();

        let report = state.into_report();
        let mut summary = collector.summary;
        summary.nodes_seen = report.nodes_seen;
        summary.pages_visited = report.dispatched;
        summary.skipped_excluded = report.excluded;
        summary.skipped_before_marker = report.before_marker;
        summary.records_unpersisted = collector.buffers.values().map(Vec::len).sum();
        summary.interrupted = report.interrupted && collector.error.is_none();
        tracing::info!(
            pages = summary.pages_visited,
            extracted = summary.total_extracted(),
            upserted = summary.records_upserted,
            "crawl finished"
        );
        CrawlOutcome {
            summary,
            error: collector.error,
        }
    }
}

fn failed_before_start(err: CrawlError) -> CrawlOutcome {
    CrawlOutcome {
        summary: RunSummary::default(),
        error: Some(err),
    }
}

fn page_kind(target: CrawlTarget, visit: VisitTarget) -> PageKind {
    match (target, visit) {
        (_, VisitTarget::Class) => PageKind::Class,
        (CrawlTarget::Objects, VisitTarget::Leaf) => PageKind::Member,
        (CrawlTarget::Samples, VisitTarget::Leaf) => PageKind::Sample,
    }
}

fn spawn_workers(
    count: usize,
    worker: &PageWorker,
    tasks: &Receiver<PageJob>,
    results: &Sender<PageResult>,
) -> Result<Vec<JoinHandle<()>>, CrawlError> {
    (0..count)
        .map(|worker_id| {
            let worker = worker.clone();
            let tasks = tasks.clone();
            let results = results.clone();
            thread::Builder::new()
                .name(format!("docrag-page-{worker_id}"))
                .spawn(move || {
                    for job in tasks.iter() {
                        let outcome = worker.process(&job);
                        let result = PageResult {
                            seq: job.seq,
                            outcome,
                        };
                        if results.send(result).is_err() {
                            break;
                        }
                    }
                })
                .map_err(|err| CrawlError::Worker(format!("failed to spawn page worker: {err}")))
        })
        .collect()
}

struct PageJob {
    seq: usize,
    title: String,
    link: String,
    kind: PageKind,
}

struct PageResult {
    seq: usize,
    outcome: PageOutcome,
}

enum PageOutcome {
    Ready {
        record: PageRecord,
        enhancer_fallback: bool,
    },
    Dropped(DropReason),
}

/// Fetch, extract, enhance and format for one page.
#[derive(Clone)]
struct PageWorker {
    pages: Arc<dyn PageSource>,
    extractor: Arc<PageExtractor>,
    formatter: RecordFormatter,
    enhancer: Arc<dyn DescriptionEnhancer>,
}

impl PageWorker {
    fn process(&self, job: &PageJob) -> PageOutcome {
        let html = match self.pages.fetch(&job.link) {
            Ok(html) => html,
            Err(err) => {
                tracing::warn!(
                    title = %job.title,
                    link = %job.link,
                    error = %err,
                    "fetch failed; skipping page"
                );
                return PageOutcome::Dropped(DropReason::Fetch);
            }
        };
        let fields = match self.extractor.extract(&html, job.kind, &job.title) {
            Ok(fields) => fields,
            Err(err) => {
                tracing::warn!(
                    title = %job.title,
                    link = %job.link,
                    error = %err,
                    "extraction failed; skipping page"
                );
                return PageOutcome::Dropped(DropReason::Extraction);
            }
        };
        let (fields, enhancer_fallback) = self.enhance(fields);
        match self.formatter.format(fields) {
            Ok(record) => PageOutcome::Ready {
                record,
                enhancer_fallback,
            },
            Err(err) => {
                tracing::warn!(title = %job.title, error = %err, "record rejected");
                PageOutcome::Dropped(DropReason::Format)
            }
        }
    }

    fn enhance(&self, fields: RawFields) -> (RawFields, bool) {
        let mut sample = match fields {
            RawFields::Sample(sample) => sample,
            other => return (other, false),
        };
        match self
            .enhancer
            .enhance(&sample.title, &sample.description, &sample.code)
        {
            Ok(description) => {
                sample.description = description;
                (RawFields::Sample(sample), false)
            }
            Err(err) => {
                tracing::warn!(
                    title = %sample.title,
                    error = %err,
                    "description enhancement failed; keeping documented text"
                );
                (RawFields::Sample(sample), true)
            }
        }
    }
}

/// Coordinator-side state: reorders worker results and feeds the batcher.
struct Collector<'a> {
    batcher: EmbeddingBatcher<'a>,
    controls: &'a CrawlControls,
    halt: &'a AtomicBool,
    buffers: BTreeMap<Namespace, Vec<PageRecord>>,
    reorder: BTreeMap<usize, PageOutcome>,
    next_seq: usize,
    summary: RunSummary,
    error: Option<CrawlError>,
}

impl<'a> Collector<'a> {
    fn new(
        batcher: EmbeddingBatcher<'a>,
        controls: &'a CrawlControls,
        halt: &'a AtomicBool,
    ) -> Self {
        Self {
            batcher,
            controls,
            halt,
            buffers: BTreeMap::new(),
            reorder: BTreeMap::new(),
            next_seq: 0,
            summary: RunSummary::default(),
            error: None,
        }
    }

    fn drain_ready(&mut self, results: &Receiver<PageResult>) {
        while let Ok(result) = results.try_recv() {
            self.accept(result);
        }
    }

    fn accept(&mut self, result: PageResult) {
        self.reorder.insert(result.seq, result.outcome);
        while let Some(outcome) = self.reorder.remove(&self.next_seq) {
            self.next_seq += 1;
            self.apply(outcome);
        }
    }

    /// Applies results stranded behind a job that never reported back.
    fn apply_stragglers(&mut self) {
        let stranded = std::mem::take(&mut self.reorder);
        for (seq, outcome) in stranded {
            self.next_seq = seq + 1;
            self.apply(outcome);
        }
    }

    fn apply(&mut self, outcome: PageOutcome) {
        let (record, enhancer_fallback) = match outcome {
            PageOutcome::Ready {
                record,
                enhancer_fallback,
            } => (record, enhancer_fallback),
            PageOutcome::Dropped(reason) => {
                self.summary.record_dropped(reason);
                return;
            }
        };
        let kind = record.kind();
        self.summary.record_extracted(kind);
        if enhancer_fallback {
            self.summary.enhancer_fallbacks += 1;
        }
        tracing::info!(id = %record.id, %kind, "record extracted");

        let namespace = self.namespace_for(kind).clone();
        let buffer = self.buffers.entry(namespace.clone()).or_default();
        buffer.push(record);
        if buffer.len() >= self.controls.batch_size() && self.error.is_none() {
            self.flush(&namespace);
        }
    }

    fn namespace_for(&self, kind: RecordKind) -> &'a Namespace {
        match kind {
            RecordKind::Class => self.controls.class_namespace(),
            RecordKind::Property | RecordKind::Method | RecordKind::Event => {
                self.controls.attr_namespace()
            }
            RecordKind::Sample => self.controls.sample_namespace(),
        }
    }

    fn flush(&mut self, namespace: &Namespace) {
        let records = match self.buffers.get_mut(namespace) {
            Some(buffer) if !buffer.is_empty() => std::mem::take(buffer),
            _ => return,
        };
        let report = self.batcher.persist(records, namespace);
        self.summary.batches_upserted += report.batches_upserted;
        self.summary.records_upserted += report.records_upserted;
        if let Some(err) = report.error {
            self.summary.failed_batches += 1;
            tracing::warn!(
                namespace = %namespace,
                retained = report.unpersisted.len(),
                "keeping unpersisted records for the final flush"
            );
            self.buffers.insert(namespace.clone(), report.unpersisted);
            self.fail(err);
        }
    }

    fn flush_all(&mut self) {
        let namespaces: Vec<Namespace> = self.buffers.keys().cloned().collect();
        for namespace in namespaces {
            self.flush(&namespace);
        }
    }

    /// Records the first pipeline failure and stops further dispatch.
    fn fail(&mut self, err: CrawlError) {
        self.halt.store(true, Ordering::Release);
        if self.error.is_none() {
            self.error = Some(err);
        } else {
            tracing::warn!(error = %err, "additional pipeline failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::SampleFields;
    use crate::testing::HashEmbedder;
    use crate::vector_store::MemoryIndex;

    fn sample_record(title: &str) -> PageRecord {
        RecordFormatter::default()
            .format(RawFields::Sample(SampleFields {
                title: title.to_string(),
                description: "Demo.".to_string(),
                code: "pass".to_string(),
            }))
            .unwrap()
    }

    fn ready(title: &str) -> PageOutcome {
        PageOutcome::Ready {
            record: sample_record(title),
            enhancer_fallback: false,
        }
    }

    #[test]
    fn leaf_kind_follows_crawl_target() {
        assert_eq!(page_kind(CrawlTarget::Objects, VisitTarget::Class), PageKind::Class);
        assert_eq!(page_kind(CrawlTarget::Objects, VisitTarget::Leaf), PageKind::Member);
        assert_eq!(page_kind(CrawlTarget::Samples, VisitTarget::Leaf), PageKind::Sample);
    }

    #[test]
    fn collector_reassembles_out_of_order_results() {
        let embedder = HashEmbedder::new(8);
        let index = MemoryIndex::new();
        let controls = CrawlControls::default().with_batch_size(2);
        let halt = AtomicBool::new(false);
        let batcher = EmbeddingBatcher::new(&embedder, &index, BatcherConfig::default());
        let mut collector = Collector::new(batcher, &controls, &halt);

        collector.accept(PageResult {
            seq: 1,
            outcome: ready("second"),
        });
        assert_eq!(collector.summary.total_extracted(), 0);
        collector.accept(PageResult {
            seq: 0,
            outcome: PageOutcome::Dropped(DropReason::Fetch),
        });
        collector.accept(PageResult {
            seq: 2,
            outcome: ready("third"),
        });
        assert_eq!(collector.summary.total_extracted(), 2);
        assert_eq!(collector.summary.total_dropped(), 1);
        assert_eq!(collector.summary.records_upserted, 2);
        assert_eq!(
            index.ids(controls.sample_namespace()),
            vec!["second".to_string(), "third".to_string()]
        );
    }

    #[test]
    fn stragglers_are_applied_in_sequence() {
        let embedder = HashEmbedder::new(8);
        let index = MemoryIndex::new();
        let controls = CrawlControls::default();
        let halt = AtomicBool::new(false);
        let batcher = EmbeddingBatcher::new(&embedder, &index, BatcherConfig::default());
        let mut collector = Collector::new(batcher, &controls, &halt);

        collector.accept(PageResult {
            seq: 2,
            outcome: ready("late"),
        });
        collector.apply_stragglers();
        collector.flush_all();
        assert_eq!(collector.summary.records_upserted, 1);
        assert!(collector.reorder.is_empty());
    }
}
