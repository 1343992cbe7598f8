//! Documentation taxonomy model and the resumable pre-order walker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::TaxonomyError;

/// Glyph the reference site prefixes to experimental API entries.
pub const EXPERIMENTAL_GLYPH: &str = "\u{1F9EA}";
/// Label of the interior node that groups every class page.
pub const DEFAULT_ROOT_SENTINEL: &str = "Objects";
/// Structural attributes present on every class that carry no documentation value.
pub const BOILERPLATE_ATTRIBUTES: &[&str] = &["classType", "isValid", "objectType"];

/// One entry of the documentation sidebar tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyNode {
    /// Visible title.
    #[serde(rename = "ttl", alias = "title")]
    pub title: String,
    /// Relative page link; empty for pure grouping nodes.
    #[serde(rename = "ln", alias = "link", default)]
    pub link: String,
    /// Child entries; `None` marks a leaf.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TaxonomyNode>>,
}

impl TaxonomyNode {
    /// Builds a leaf node.
    pub fn leaf(title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
            children: None,
        }
    }

    /// Builds an interior node.
    pub fn interior(
        title: impl Into<String>,
        link: impl Into<String>,
        children: Vec<TaxonomyNode>,
    ) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
            children: Some(children),
        }
    }
}

/// Top-level taxonomy document (`{ "books": [...] }`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyDocument {
    /// One root per documentation book.
    pub books: Vec<TaxonomyNode>,
}

impl TaxonomyDocument {
    /// Decodes a taxonomy document from JSON text.
    pub fn from_json(text: &str) -> Result<Self, TaxonomyError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Navigates to the node addressed by `path`.
    pub fn resolve(&self, path: &TaxonomyPath) -> Result<&TaxonomyNode, TaxonomyError> {
        let out_of_range = |depth| TaxonomyError::OutOfRange {
            path: path.to_string(),
            depth,
        };
        let mut indices = path.0.iter().enumerate();
        let (_, &first) = indices.next().ok_or_else(|| out_of_range(0))?;
        let mut node = self.books.get(first).ok_or_else(|| out_of_range(0))?;
        for (depth, &index) in indices {
            node = node
                .children
                .as_ref()
                .and_then(|children| children.get(index))
                .ok_or_else(|| out_of_range(depth))?;
        }
        Ok(node)
    }
}

/// Index path into a [`TaxonomyDocument`], written as `20/3/0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyPath(Vec<usize>);

impl FromStr for TaxonomyPath {
    type Err = TaxonomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let indices = s
            .split(['/', ',', '.'])
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                segment
                    .parse::<usize>()
                    .map_err(|_| TaxonomyError::InvalidPath(segment.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if indices.is_empty() {
            return Err(TaxonomyError::InvalidPath(s.to_string()));
        }
        Ok(Self(indices))
    }
}

impl fmt::Display for TaxonomyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&rendered.join("/"))
    }
}

/// What kind of extraction a dispatched node should receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitTarget {
    /// Interior node carrying a class overview page.
    Class,
    /// Leaf node: a member page or a sample page, depending on the crawl.
    Leaf,
}

/// A node handed to the visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visit<'a> {
    /// Node title.
    pub title: &'a str,
    /// Node link (never empty).
    pub link: &'a str,
    /// Dispatch category.
    pub target: VisitTarget,
}

/// Static skip rules for one crawl.
#[derive(Debug, Clone)]
pub struct WalkPolicy {
    /// Substring that excludes a node and its subtree.
    pub exclusion_marker: String,
    /// Interior title that is never dispatched itself.
    pub root_sentinel: String,
    /// Leaf titles that are never dispatched.
    pub leaf_denylist: Vec<String>,
    /// Whether interior nodes with links are dispatched as class pages.
    pub dispatch_interior: bool,
}

impl Default for WalkPolicy {
    fn default() -> Self {
        Self {
            exclusion_marker: EXPERIMENTAL_GLYPH.to_string(),
            root_sentinel: DEFAULT_ROOT_SENTINEL.to_string(),
            leaf_denylist: BOILERPLATE_ATTRIBUTES
                .iter()
                .map(|name| name.to_string())
                .collect(),
            dispatch_interior: true,
        }
    }
}

impl WalkPolicy {
    /// Policy for sample crawls: leaves only, no class dispatch.
    pub fn samples() -> Self {
        Self {
            dispatch_interior: false,
            ..Self::default()
        }
    }

    fn is_excluded(&self, node: &TaxonomyNode) -> bool {
        !self.exclusion_marker.is_empty() && node.title.contains(&self.exclusion_marker)
    }

    fn is_denylisted(&self, title: &str) -> bool {
        self.leaf_denylist.iter().any(|name| name == title)
    }
}

/// Mutable per-run walk state: resume flag, cancellation, counters.
#[derive(Debug)]
pub struct WalkState {
    resume_marker: Option<String>,
    resume_active: bool,
    stop: Option<Arc<AtomicBool>>,
    report: WalkReport,
}

impl WalkState {
    /// Fresh state; dispatch starts immediately when `resume_marker` is `None`.
    pub fn new(resume_marker: Option<String>) -> Self {
        let resume_marker = resume_marker.filter(|marker| !marker.is_empty());
        Self {
            resume_active: resume_marker.is_none(),
            resume_marker,
            stop: None,
            report: WalkReport::default(),
        }
    }

    /// Attaches a shared stop flag checked before every node.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Counters collected so far.
    pub fn report(&self) -> &WalkReport {
        &self.report
    }

    /// Consumes the state, returning its counters.
    pub fn into_report(self) -> WalkReport {
        self.report
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Flips the resume flag when `title` is the marker. The transition is one-way.
    fn observe(&mut self, title: &str) -> bool {
        if !self.resume_active && self.resume_marker.as_deref() == Some(title) {
            self.resume_active = true;
        }
        self.resume_active
    }
}

/// Walk counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkReport {
    /// Nodes reached by the traversal (excluded subtrees count once).
    pub nodes_seen: usize,
    /// Nodes handed to the visitor.
    pub dispatched: usize,
    /// Visitor calls that returned an error.
    pub failed: usize,
    /// Nodes skipped because their title carried the exclusion marker.
    pub excluded: usize,
    /// Dispatchable nodes suppressed because the resume marker was not reached yet.
    pub before_marker: usize,
    /// True when the stop flag ended the walk early.
    pub interrupted: bool,
}

/// Walks `root` in pre-order, dispatching nodes that pass the skip rules.
///
/// A visitor error is logged and counted; the walk moves on to the next node.
pub fn walk<F, E>(
    root: &TaxonomyNode,
    policy: &WalkPolicy,
    state: &mut WalkState,
    mut visitor: F,
) where
    F: FnMut(Visit<'_>) -> Result<(), E>,
    E: fmt::Display,
{
    walk_node(root, policy, state, &mut visitor);
}

fn walk_node<F, E>(
    node: &TaxonomyNode,
    policy: &WalkPolicy,
    state: &mut WalkState,
    visitor: &mut F,
) where
    F: FnMut(Visit<'_>) -> Result<(), E>,
    E: fmt::Display,
{
    if state.report.interrupted {
        return;
    }
    if state.stop_requested() {
        tracing::info!(title = %node.title, "stop requested, ending walk");
        state.report.interrupted = true;
        return;
    }
    state.report.nodes_seen += 1;

    if policy.is_excluded(node) {
        tracing::debug!(title = %node.title, "skipping experimental subtree");
        state.report.excluded += 1;
        return;
    }
    let resume_active = state.observe(&node.title);

    let target = match &node.children {
        Some(_) if policy.dispatch_interior && node.title != policy.root_sentinel => {
            Some(VisitTarget::Class)
        }
        Some(_) => None,
        None if !policy.is_denylisted(&node.title) => Some(VisitTarget::Leaf),
        None => None,
    }
    .filter(|_| !node.link.is_empty());

    if let Some(target) = target {
        if resume_active {
            state.report.dispatched += 1;
            let visit = Visit {
                title: &node.title,
                link: &node.link,
                target,
            };
            if let Err(err) = visitor(visit) {
                state.report.failed += 1;
                tracing::warn!(
                    title = %node.title,
                    link = %node.link,
                    error = %err,
                    "node failed"
                );
            }
        } else {
            state.report.before_marker += 1;
        }
    }

    if let Some(children) = &node.children {
        for child in children {
            walk_node(child, policy, state, visitor);
        }
    }
}
