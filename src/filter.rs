//! Test selection
//!
//! A [`TestFilter`] is built from positional selection tokens such as
//! `unit`, `!unit.slow` or `quick` (a named group). It mirrors the shape of
//! the test hierarchy: every node carries a default [`Verdict`] for its
//! subtree, and more specific children override it for theirs.
//!
//! Nodes live in an arena and are addressed by path segments. Each node
//! remembers whether matching ever consulted it, so that tokens naming tests
//! that do not exist can be reported by [`TestFilter::check_use`].
//!
//! A [`PredicateFilter`] selects leaves with an arbitrary predicate instead of
//! by name, e.g. to re-select the tests that failed in a previous run.
//!
//! # Examples
//!
//! ```
//! use testframework::filter::{Groups, TestFilter};
//! use testframework::suite::{CommandTest, TestTree};
//!
//! let mut tree = TestTree::new();
//! tree.insert_path(&["unit", "alloc"], CommandTest::new("true")).unwrap();
//! tree.insert_path(&["unit", "slow"], CommandTest::new("true")).unwrap();
//! tree.insert_path(&["stress"], CommandTest::new("true")).unwrap();
//!
//! let args = vec!["unit".to_string(), "!unit.slow".to_string()];
//! let filter = TestFilter::parse(&args, &Groups::new()).unwrap();
//! let selected = tree.filter(&filter.selector());
//!
//! let names: Vec<String> = selected.iter().map(|(name, _)| name).collect();
//! assert_eq!(names, vec!["unit.alloc"]);
//! ```

use crate::error::{Error, Result};
use crate::suite::Test;
use crate::ui::UI;
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Named groups: group name to its list of selection tokens.
pub type Groups = BTreeMap<String, Vec<String>>;

/// Whether a subtree is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Include,
    Exclude,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Include => write!(f, "INCLUDE"),
            Verdict::Exclude => write!(f, "EXCLUDE"),
        }
    }
}

/// Where a filter rule came from.
///
/// A weak source was inherited rather than written for this exact path, and
/// gives way to a non-weak one when filters are combined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSource {
    group: Option<String>,
    weak: bool,
}

impl FilterSource {
    fn new(group: Option<String>) -> Self {
        FilterSource { group, weak: true }
    }

    fn inherited(&self) -> Self {
        FilterSource {
            group: self.group.clone(),
            weak: true,
        }
    }

    fn combined(&self, other: &FilterSource) -> FilterSource {
        if self.weak {
            other.clone()
        } else {
            self.clone()
        }
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn is_weak(&self) -> bool {
        self.weak
    }

    fn show(&self) -> String {
        match &self.group {
            Some(group) => format!("group {}", group),
            None => "user input".to_string(),
        }
    }
}

type NodeId = usize;

const ROOT: NodeId = 0;

#[derive(Debug)]
struct FilterNode {
    default: Verdict,
    children: BTreeMap<String, NodeId>,
    consulted: Cell<bool>,
    source: FilterSource,
}

impl FilterNode {
    fn new(default: Verdict, source: FilterSource) -> Self {
        FilterNode {
            default,
            children: BTreeMap::new(),
            consulted: Cell::new(false),
            source,
        }
    }
}

/// Position in a filter: a stored node, or a node that was never
/// registered and only carries the verdict of its closest stored ancestor.
#[derive(Debug, Clone)]
enum Cursor {
    Node(NodeId),
    Detached {
        default: Verdict,
        source: FilterSource,
    },
}

/// A name-based include/exclude decision tree.
#[derive(Debug)]
pub struct TestFilter {
    nodes: Vec<FilterNode>,
}

impl TestFilter {
    fn with_root(default: Verdict, source: FilterSource) -> Self {
        TestFilter {
            nodes: vec![FilterNode::new(default, source)],
        }
    }

    /// A filter that selects everything.
    pub fn include_all() -> Self {
        TestFilter::with_root(Verdict::Include, FilterSource::new(None))
    }

    /// Build a filter from selection tokens.
    ///
    /// `token` includes and `!token` excludes. A token naming a group expands
    /// to that group's tokens; any other token is a dotted test path, with an
    /// optional trailing `.*`. Later tokens override earlier ones for the
    /// same path. With no tokens every test is selected.
    pub fn parse(args: &[String], groups: &Groups) -> Result<TestFilter> {
        let mut active = Vec::new();
        Self::parse_group(args, groups, None, &mut active)
    }

    fn parse_group(
        args: &[String],
        groups: &Groups,
        group: Option<&str>,
        active: &mut Vec<String>,
    ) -> Result<TestFilter> {
        let source = FilterSource::new(group.map(str::to_string));
        let Some(first) = args.first() else {
            return Ok(TestFilter::with_root(Verdict::Include, source));
        };
        let default = if first.starts_with('!') {
            Verdict::Include
        } else {
            Verdict::Exclude
        };
        let mut filter = TestFilter::with_root(default, source);

        for arg in args {
            let (token, verdict) = match arg.strip_prefix('!') {
                Some(rest) => (rest, Verdict::Exclude),
                None => (arg.as_str(), Verdict::Include),
            };
            if token.is_empty() {
                return Err(Error::Selection(format!(
                    "Empty selection token '{}'",
                    arg
                )));
            }

            if let Some(patterns) = groups.get(token) {
                if active.iter().any(|g| g == token) {
                    return Err(Error::Selection(format!(
                        "Group {} includes itself",
                        token
                    )));
                }
                active.push(token.to_string());
                let sub = Self::parse_group(patterns, groups, Some(token), active)?;
                active.pop();
                filter.combine(ROOT, verdict, &sub, Cursor::Node(ROOT));
            } else {
                let mut path: Vec<&str> = token.split('.').collect();
                if path.last() == Some(&"*") {
                    path.pop();
                }
                let node = filter.at(&path);
                filter.reset(node, verdict, group);
            }
        }
        Ok(filter)
    }

    /// The node at `path`, registering any missing nodes on the way.
    fn at(&mut self, path: &[&str]) -> NodeId {
        path.iter()
            .fold(ROOT, |node, name| self.zoom_create(node, name))
    }

    fn zoom_create(&mut self, id: NodeId, name: &str) -> NodeId {
        if let Some(&child) = self.nodes[id].children.get(name) {
            return child;
        }
        let parent = &self.nodes[id];
        let node = FilterNode::new(parent.default, parent.source.inherited());
        let child = self.nodes.len();
        self.nodes.push(node);
        self.nodes[id].children.insert(name.to_string(), child);
        child
    }

    /// Override everything at and below `id`.
    fn reset(&mut self, id: NodeId, verdict: Verdict, group: Option<&str>) {
        let node = &mut self.nodes[id];
        node.default = verdict;
        node.children.clear();
        node.source = FilterSource {
            group: group.map(str::to_string),
            weak: false,
        };
    }

    fn zoom_cursor(&self, cursor: &Cursor, name: &str) -> Cursor {
        match cursor {
            Cursor::Node(id) => {
                let node = &self.nodes[*id];
                match node.children.get(name) {
                    Some(&child) => Cursor::Node(child),
                    None => Cursor::Detached {
                        default: node.default,
                        source: node.source.inherited(),
                    },
                }
            }
            Cursor::Detached { default, source } => Cursor::Detached {
                default: *default,
                source: source.inherited(),
            },
        }
    }

    fn cursor_state(&self, cursor: &Cursor) -> (Verdict, FilterSource) {
        match cursor {
            Cursor::Node(id) => {
                let node = &self.nodes[*id];
                (node.default, node.source.clone())
            }
            Cursor::Detached { default, source } => (*default, source.clone()),
        }
    }

    /// Merge `other` (at `theirs`) into this filter at `id`.
    ///
    /// Wherever `other` includes, the merged node takes `verdict`, unless
    /// `other`'s rule is weak and ours is not.
    fn combine(&mut self, id: NodeId, verdict: Verdict, other: &TestFilter, theirs: Cursor) {
        let (their_default, their_source) = other.cursor_state(&theirs);

        let mut names: BTreeSet<String> = self.nodes[id].children.keys().cloned().collect();
        if let Cursor::Node(other_id) = theirs {
            names.extend(other.nodes[other_id].children.keys().cloned());
        }
        for name in names {
            let child = self.zoom_create(id, &name);
            let their_child = other.zoom_cursor(&theirs, &name);
            self.combine(child, verdict, other, their_child);
        }

        let node = &mut self.nodes[id];
        if their_default == Verdict::Include && (node.source.weak || !their_source.weak) {
            node.default = verdict;
        }
        node.source = node.source.combined(&their_source);
    }

    /// Cursor at the root, for matching against a test hierarchy.
    pub fn selector(&self) -> Selector<'_> {
        Selector {
            kind: SelectorKind::Path(self, Cursor::Node(ROOT)),
        }
    }

    /// Cursor at `path` that registers nothing and marks nothing consulted.
    pub fn lookup(&self, path: &[&str]) -> Selector<'_> {
        let cursor = path
            .iter()
            .fold(Cursor::Node(ROOT), |cursor, name| self.zoom_cursor(&cursor, name));
        Selector {
            kind: SelectorKind::Path(self, cursor),
        }
    }

    /// Report every rule that never matched anything.
    ///
    /// Rules that come from a named group only produce a warning, since groups
    /// may name tests that are not part of the current suite. Anything else is
    /// a [`Error::Selection`].
    pub fn check_use(&self, ui: &mut dyn UI) -> Result<()> {
        let mut pending = vec![(ROOT, String::new())];
        while let Some((id, path)) = pending.pop() {
            let node = &self.nodes[id];
            if !node.consulted.get() {
                let message = format!("No such test {} (from {})", path, node.source.show());
                if node.source.group.is_some() {
                    ui.warning(&message)?;
                } else {
                    return Err(Error::Selection(message));
                }
            }
            for (name, &child) in node.children.iter().rev() {
                let child_path = if path.is_empty() {
                    name.clone()
                } else {
                    format!("{}.{}", path, name)
                };
                pending.push((child, child_path));
            }
        }
        Ok(())
    }
}

/// A filter that selects leaf tests with a predicate.
pub struct PredicateFilter {
    predicate: Box<dyn Fn(&Test) -> bool + Send + Sync>,
}

impl PredicateFilter {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Test) -> bool + Send + Sync + 'static,
    {
        PredicateFilter {
            predicate: Box::new(predicate),
        }
    }

    pub fn selector(&self) -> Selector<'_> {
        Selector {
            kind: SelectorKind::Predicate(self),
        }
    }
}

impl fmt::Debug for PredicateFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateFilter").finish_non_exhaustive()
    }
}

/// A position in a filter, handed down the test hierarchy while filtering.
#[derive(Debug, Clone)]
pub struct Selector<'f> {
    kind: SelectorKind<'f>,
}

#[derive(Debug, Clone)]
enum SelectorKind<'f> {
    Path(&'f TestFilter, Cursor),
    Predicate(&'f PredicateFilter),
}

impl<'f> Selector<'f> {
    /// True if the whole subtree below this point gets the same verdict.
    pub fn all_same(&self) -> bool {
        match &self.kind {
            SelectorKind::Path(filter, Cursor::Node(id)) => {
                let node = &filter.nodes[*id];
                node.consulted.set(true);
                node.children.is_empty()
            }
            SelectorKind::Path(_, Cursor::Detached { .. }) => true,
            SelectorKind::Predicate(_) => false,
        }
    }

    /// Whether `test` (or, without a test, this whole subtree) is selected.
    pub fn matches(&self, test: Option<&Test>) -> bool {
        match &self.kind {
            SelectorKind::Path(filter, Cursor::Node(id)) => {
                let node = &filter.nodes[*id];
                node.consulted.set(true);
                node.default == Verdict::Include
            }
            SelectorKind::Path(_, Cursor::Detached { default, .. }) => {
                *default == Verdict::Include
            }
            SelectorKind::Predicate(p) => test.map_or(true, |t| (p.predicate)(t)),
        }
    }

    /// The selector for the child called `name`.
    pub fn zoom(&self, name: &str) -> Selector<'f> {
        match &self.kind {
            SelectorKind::Path(filter, cursor) => Selector {
                kind: SelectorKind::Path(filter, filter.zoom_cursor(cursor, name)),
            },
            SelectorKind::Predicate(p) => Selector {
                kind: SelectorKind::Predicate(p),
            },
        }
    }
}
