use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use docrag::enhancer::{DescriptionEnhancer, PassthroughEnhancer};
use docrag::records::keys;
use docrag::testing::{FlakyEmbedder, HashEmbedder, StaticPages};
use docrag::{
    CrawlControls, CrawlError, CrawlRuntime, CrawlServices, CrawlTarget, DropReason, MemoryIndex,
    Namespace, ProviderError, RetrievalEngine, RetrievalRequest, TaxonomyPath,
};
use pretty_assertions::assert_eq;

const TAXONOMY_PATH: &str = "/view/fusion360/ENU/data/toctree.json";
const FILES: &str = "/cloudhelp/ENU/Fusion-360-API/files";

fn pages() -> StaticPages {
    StaticPages::new()
        .with(TAXONOMY_PATH, include_str!("fixtures/toctree.json"))
        .with(
            format!("{FILES}/Sketch.htm"),
            include_str!("fixtures/html/sketch_class.htm"),
        )
        .with(
            format!("{FILES}/Sketch_isVisible.htm"),
            include_str!("fixtures/html/sketch_is_visible.htm"),
        )
        .with(
            format!("{FILES}/Sketch_project.htm"),
            include_str!("fixtures/html/sketch_project.htm"),
        )
        .with(
            format!("{FILES}/Sketch_deleteMe.htm"),
            include_str!("fixtures/html/no_description_method.htm"),
        )
        .with(
            format!("{FILES}/CommandDefinition_commandCreated.htm"),
            include_str!("fixtures/html/command_created.htm"),
        )
        .with(
            format!("{FILES}/SpurGear_Sample.htm"),
            include_str!("fixtures/html/spur_gear_sample.htm"),
        )
        .with(
            format!("{FILES}/Broken_Sample.htm"),
            include_str!("fixtures/html/broken_sample.htm"),
        )
}

struct Harness {
    index: Arc<MemoryIndex>,
    embedder: Arc<HashEmbedder>,
}

impl Harness {
    fn new() -> Self {
        Self {
            index: Arc::new(MemoryIndex::new()),
            embedder: Arc::new(HashEmbedder::new(64)),
        }
    }

    fn runtime(&self, controls: CrawlControls) -> CrawlRuntime {
        self.runtime_with(controls, Arc::new(PassthroughEnhancer))
    }

    fn runtime_with(
        &self,
        controls: CrawlControls,
        enhancer: Arc<dyn DescriptionEnhancer>,
    ) -> CrawlRuntime {
        CrawlRuntime::new(
            CrawlServices {
                pages: Arc::new(pages()),
                embedder: self.embedder.clone(),
                index: self.index.clone(),
                enhancer,
            },
            controls,
        )
    }
}

fn objects_root() -> TaxonomyPath {
    "0/0".parse().unwrap()
}

fn samples_root() -> TaxonomyPath {
    "0/1".parse().unwrap()
}

#[test]
fn objects_crawl_persists_class_and_member_records() {
    let harness = Harness::new();
    let outcome = harness
        .runtime(CrawlControls::default())
        .run_from(TAXONOMY_PATH, &objects_root(), CrawlTarget::Objects);
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    let summary = outcome.summary;

    assert_eq!(summary.nodes_seen, 10);
    assert_eq!(summary.pages_visited, 6);
    assert_eq!(summary.skipped_excluded, 1);
    assert_eq!(summary.total_extracted(), 4);
    assert_eq!(summary.records_dropped.get(&DropReason::Fetch), Some(&1));
    assert_eq!(summary.records_dropped.get(&DropReason::Extraction), Some(&1));
    assert_eq!(summary.records_upserted, 4);
    assert_eq!(summary.records_unpersisted, 0);
    assert!(!summary.interrupted);

    let objects = Namespace::objects();
    let attrs = Namespace::object_attrs();
    assert_eq!(harness.index.ids(&objects), vec!["Sketch"]);
    assert_eq!(
        harness.index.ids(&attrs),
        vec![
            "CommandDefinition.commandCreated",
            "Sketch.isVisible",
            "Sketch.project"
        ]
    );

    let sketch = harness.index.metadata(&objects, "Sketch").unwrap();
    assert_eq!(sketch[keys::KIND], "class");
    assert_eq!(
        sketch[keys::TEXT],
        "title: Sketch\ndescription: Represents a sketch within a component. A sketch contains curves and constraints."
    );
    assert_eq!(
        sketch[keys::METHODS],
        "methods[2]{name,description}:\n\tproject,Projects the specified entity onto the sketch.\n\tdeleteMe,Deletes the sketch."
    );
    assert_eq!(
        sketch[keys::PROPERTIES],
        "properties[2]{name,description}:\n\tisVisible,Gets and sets if the sketch is visible.\n\tname,Gets and sets the name of the sketch."
    );
    assert_eq!(sketch[keys::SAMPLE_IDS], "sampleIds[1]{name}:\n\tSpur Gear Sample");

    let visible = harness.index.metadata(&attrs, "Sketch.isVisible").unwrap();
    assert_eq!(visible[keys::KIND], "property");
    assert_eq!(visible[keys::CLASS_NAME], "Sketch");
    assert_eq!(visible[keys::ATTRIBUTE_NAME], "isVisible");
    assert_eq!(visible[keys::PROPERTY_NAME], "isVisible");
    assert_eq!(visible[keys::PROPERTY_TYPE], "boolean");
    assert_eq!(
        visible[keys::EXAMPLE_USAGE],
        "Python\nvalue = sketch_var.isVisible\nsketch_var.isVisible = True"
    );

    let project = harness.index.metadata(&attrs, "Sketch.project").unwrap();
    assert_eq!(
        project[keys::METHOD_PARAMS],
        "methodParams[1]{name,type,description}:\n\tentity,Base,The entity to project."
    );
    assert_eq!(
        project[keys::METHOD_RETURN_VALS],
        "methodReturnVals[1]{type,description}:\n\tObjectCollection,The sketch entities created by the projection."
    );

    let created = harness
        .index
        .metadata(&attrs, "CommandDefinition.commandCreated")
        .unwrap();
    assert_eq!(created[keys::KIND], "event");
    assert_eq!(created[keys::EVENT_NAME], "commandCreated");
}

#[test]
fn recrawl_is_idempotent() {
    let harness = Harness::new();
    let runtime = harness.runtime(CrawlControls::default());
    runtime
        .run_from(TAXONOMY_PATH, &objects_root(), CrawlTarget::Objects)
        .into_result()
        .unwrap();
    let attrs = Namespace::object_attrs();
    let first = harness.index.metadata(&attrs, "Sketch.project");

    runtime
        .run_from(TAXONOMY_PATH, &objects_root(), CrawlTarget::Objects)
        .into_result()
        .unwrap();
    assert_eq!(harness.index.len(&attrs), 3);
    assert_eq!(harness.index.metadata(&attrs, "Sketch.project"), first);
}

#[test]
fn resume_marker_skips_everything_before_it() {
    let harness = Harness::new();
    let controls = CrawlControls::default().with_resume_marker(Some("project".into()));
    let summary = harness
        .runtime(controls)
        .run_from(TAXONOMY_PATH, &objects_root(), CrawlTarget::Objects)
        .into_result()
        .unwrap();

    assert_eq!(summary.skipped_before_marker, 2);
    assert_eq!(summary.pages_visited, 4);
    assert!(harness.index.is_empty(&Namespace::objects()));
    assert_eq!(
        harness.index.ids(&Namespace::object_attrs()),
        vec!["CommandDefinition.commandCreated", "Sketch.project"]
    );
}

#[test]
fn worker_pool_matches_sequential_run() {
    let sequential = Harness::new();
    sequential
        .runtime(CrawlControls::default())
        .run_from(TAXONOMY_PATH, &objects_root(), CrawlTarget::Objects)
        .into_result()
        .unwrap();

    let pooled = Harness::new();
    let summary = pooled
        .runtime(CrawlControls::default().with_workers(4).with_batch_size(2))
        .run_from(TAXONOMY_PATH, &objects_root(), CrawlTarget::Objects)
        .into_result()
        .unwrap();

    assert_eq!(summary.records_upserted, 4);
    for namespace in [Namespace::objects(), Namespace::object_attrs()] {
        assert_eq!(pooled.index.ids(&namespace), sequential.index.ids(&namespace));
        for id in sequential.index.ids(&namespace) {
            assert_eq!(
                pooled.index.metadata(&namespace, &id),
                sequential.index.metadata(&namespace, &id)
            );
        }
    }
}

struct UnavailableEnhancer;

impl DescriptionEnhancer for UnavailableEnhancer {
    fn enhance(
        &self,
        _title: &str,
        _description: &str,
        _code: &str,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::Malformed("no completion".into()))
    }
}

struct PrefixEnhancer;

impl DescriptionEnhancer for PrefixEnhancer {
    fn enhance(
        &self,
        title: &str,
        description: &str,
        _code: &str,
    ) -> Result<String, ProviderError> {
        Ok(format!("{title}: {description}"))
    }
}

#[test]
fn samples_crawl_uses_enhanced_descriptions() {
    let harness = Harness::new();
    let summary = harness
        .runtime_with(CrawlControls::default(), Arc::new(PrefixEnhancer))
        .run_from(TAXONOMY_PATH, &samples_root(), CrawlTarget::Samples)
        .into_result()
        .unwrap();

    assert_eq!(summary.pages_visited, 2);
    assert_eq!(summary.records_extracted.get("sample"), Some(&1));
    assert_eq!(summary.records_dropped.get(&DropReason::Extraction), Some(&1));
    assert_eq!(summary.enhancer_fallbacks, 0);

    let samples = Namespace::samples();
    assert_eq!(harness.index.ids(&samples), vec!["Spur Gear Sample"]);
    let gear = harness.index.metadata(&samples, "Spur Gear Sample").unwrap();
    assert_eq!(gear[keys::SAMPLE_ID], "Spur Gear Sample");
    assert_eq!(
        gear[keys::CODE_SAMPLE],
        "import adsk.core\napp = adsk.core.Application.get()"
    );
    assert_eq!(
        gear[keys::TEXT],
        "title: Spur Gear Sample\ndescription: Spur Gear Sample: Creates a spur gear component driven by user parameters."
    );
}

#[test]
fn enhancer_failure_keeps_documented_description() {
    let harness = Harness::new();
    let summary = harness
        .runtime_with(CrawlControls::default(), Arc::new(UnavailableEnhancer))
        .run_from(TAXONOMY_PATH, &samples_root(), CrawlTarget::Samples)
        .into_result()
        .unwrap();

    assert_eq!(summary.enhancer_fallbacks, 1);
    let gear = harness
        .index
        .metadata(&Namespace::samples(), "Spur Gear Sample")
        .unwrap();
    assert_eq!(
        gear[keys::TEXT],
        "title: Spur Gear Sample\ndescription: Creates a spur gear component driven by user parameters."
    );
}

#[test]
fn failed_batch_is_retried_by_the_final_flush() {
    let index = Arc::new(MemoryIndex::new());
    let runtime = CrawlRuntime::new(
        CrawlServices {
            pages: Arc::new(pages()),
            embedder: Arc::new(FlakyEmbedder::new(HashEmbedder::new(16), 0)),
            index: index.clone(),
            enhancer: Arc::new(PassthroughEnhancer),
        },
        CrawlControls::default().with_batch_size(1),
    );
    let outcome = runtime.run_from(TAXONOMY_PATH, &objects_root(), CrawlTarget::Objects);

    assert!(matches!(outcome.error, Some(CrawlError::Provider(_))));
    assert_eq!(outcome.summary.failed_batches, 1);
    assert_eq!(outcome.summary.records_unpersisted, 0);
    assert!(!outcome.summary.interrupted);
    assert_eq!(index.ids(&Namespace::objects()), vec!["Sketch"]);
}

#[test]
fn raised_stop_flag_dispatches_nothing() {
    let harness = Harness::new();
    let runtime = harness
        .runtime(CrawlControls::default())
        .with_stop_flag(Arc::new(AtomicBool::new(true)));
    let summary = runtime
        .run_from(TAXONOMY_PATH, &objects_root(), CrawlTarget::Objects)
        .into_result()
        .unwrap();
    assert!(summary.interrupted);
    assert_eq!(summary.pages_visited, 0);
    assert!(harness.index.is_empty(&Namespace::object_attrs()));
}

#[test]
fn bad_root_path_fails_before_crawling() {
    let harness = Harness::new();
    let outcome = harness.runtime(CrawlControls::default()).run_from(
        TAXONOMY_PATH,
        &"0/9".parse().unwrap(),
        CrawlTarget::Objects,
    );
    assert!(matches!(outcome.error, Some(CrawlError::Taxonomy(_))));
    assert_eq!(outcome.summary.pages_visited, 0);
}

#[test]
fn crawled_index_answers_two_stage_queries() {
    let harness = Harness::new();
    harness
        .runtime(CrawlControls::default())
        .run_from(TAXONOMY_PATH, &objects_root(), CrawlTarget::Objects)
        .into_result()
        .unwrap();

    let engine = RetrievalEngine::new(harness.embedder.clone(), harness.index.clone());
    let result = engine
        .query(&RetrievalRequest::new("is the sketch visible"))
        .unwrap();
    assert!(!result.fallback);
    assert_eq!(result.parents.len(), 1);
    assert_eq!(result.parents[0].name, "Sketch");
    assert_eq!(result.attrs.len(), 2);
    assert!(result
        .attrs
        .iter()
        .all(|hit| hit.class_name() == Some("Sketch")));
    assert!(result
        .attrs
        .windows(2)
        .all(|pair| pair[0].score >= pair[1].score));
}
