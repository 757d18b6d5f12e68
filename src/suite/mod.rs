//! The test hierarchy
//!
//! A suite is a tree of named tests. Leaves are either native test programs
//! ([`CommandTest`]) or tests that already ran and were loaded back from a
//! results directory ([`RecordedTest`]). Filtering, configuration and
//! requirement gathering all walk the same [`Test`] enum.

use crate::error::{Error, Result};
use crate::filter::Selector;
use std::collections::{btree_map, BTreeMap, BTreeSet};
use std::fmt;

pub mod command;
pub mod recorded;

pub use command::CommandTest;
pub use recorded::{load_results_as_tests, RecordedTest};

/// A single test or a named tree of tests.
#[derive(Debug, Clone)]
pub enum Test {
    /// A native test program.
    Command(CommandTest),
    /// A test loaded from the output directory of a previous run.
    Recorded(RecordedTest),
    /// A named collection of tests.
    Tree(TestTree),
}

impl Test {
    /// Returns the part of this test selected by `selector`, or `None` if
    /// nothing was selected.
    pub fn filter(&self, selector: &Selector<'_>) -> Option<Test> {
        match self {
            Test::Tree(tree) => Some(Test::Tree(tree.filter(selector))),
            leaf => {
                if selector.matches(Some(leaf)) {
                    Some(leaf.clone())
                } else {
                    None
                }
            }
        }
    }

    /// Returns a copy of this test with `conf` injected into every leaf.
    pub fn configure(&self, conf: &Configuration) -> Test {
        match self {
            Test::Command(test) => Test::Command(test.configure(conf)),
            Test::Recorded(test) => Test::Recorded(test.clone()),
            Test::Tree(tree) => Test::Tree(tree.configure(conf)),
        }
    }

    /// All requirements of all leaves. Duplicates are not removed.
    pub fn requirements(&self) -> impl Iterator<Item = &str> + '_ {
        self.iter()
            .flat_map(|(_, leaf)| leaf.leaf_requirements().iter().map(String::as_str))
    }

    fn leaf_requirements(&self) -> &[String] {
        match self {
            Test::Command(test) => test.requirements(),
            Test::Recorded(_) | Test::Tree(_) => &[],
        }
    }

    /// Timeout override in seconds, if this test has one.
    pub fn timeout(&self) -> Option<u64> {
        match self {
            Test::Command(test) => test.timeout(),
            Test::Recorded(_) | Test::Tree(_) => None,
        }
    }

    /// Iterates over `(dotted name, leaf)` pairs in lexicographic order.
    ///
    /// A leaf yields itself once, with an empty name.
    pub fn iter(&self) -> Iter<'_> {
        match self {
            Test::Tree(tree) => tree.iter(),
            leaf => Iter {
                single: Some(leaf),
                stack: Vec::new(),
            },
        }
    }

    fn is_empty_tree(&self) -> bool {
        matches!(self, Test::Tree(tree) if tree.is_empty())
    }
}

impl fmt::Display for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Test::Command(test) => write!(f, "{}", test),
            Test::Recorded(test) => write!(f, "{}", test),
            Test::Tree(tree) => {
                for (name, _) in tree {
                    writeln!(f, "{}", name)?;
                }
                Ok(())
            }
        }
    }
}

impl From<CommandTest> for Test {
    fn from(test: CommandTest) -> Self {
        Test::Command(test)
    }
}

impl From<TestTree> for Test {
    fn from(tree: TestTree) -> Self {
        Test::Tree(tree)
    }
}

/// A tree of named tests
#[derive(Debug, Clone, Default)]
pub struct TestTree {
    tests: BTreeMap<String, Test>,
}

impl TestTree {
    pub fn new() -> Self {
        TestTree::default()
    }

    /// Add a test under `name`, failing if the name is already taken.
    pub fn add(&mut self, name: impl Into<String>, test: impl Into<Test>) -> Result<()> {
        let name = name.into();
        if self.tests.contains_key(&name) {
            return Err(Error::DuplicateTest(name));
        }
        self.tests.insert(name, test.into());
        Ok(())
    }

    /// Set or replace the test under `name`.
    ///
    /// `None` and empty trees remove the name instead.
    pub fn set(&mut self, name: impl Into<String>, test: Option<Test>) {
        let name = name.into();
        match test {
            Some(test) if !test.is_empty_tree() => {
                self.tests.insert(name, test);
            }
            _ => {
                self.tests.remove(&name);
            }
        }
    }

    /// Add a test at a dotted path, creating intermediate trees as needed.
    pub fn insert_path(&mut self, path: &[&str], test: impl Into<Test>) -> Result<()> {
        match path {
            [] => Err(Error::Other("cannot insert a test at an empty path".to_string())),
            [name] => self.add(*name, test),
            [name, rest @ ..] => {
                let child = self
                    .tests
                    .entry(name.to_string())
                    .or_insert_with(|| Test::Tree(TestTree::new()));
                match child {
                    Test::Tree(tree) => tree.insert_path(rest, test).map_err(|e| match e {
                        Error::DuplicateTest(sub) => {
                            Error::DuplicateTest(format!("{}.{}", name, sub))
                        }
                        e => e,
                    }),
                    _ => Err(Error::DuplicateTest(name.to_string())),
                }
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Test> {
        self.tests.get(name)
    }

    pub fn has_test(&self, name: &str) -> bool {
        self.tests.contains_key(name)
    }

    /// Returns the tests selected by `selector`.
    pub fn filter(&self, selector: &Selector<'_>) -> TestTree {
        if selector.all_same() {
            return if selector.matches(None) {
                self.clone()
            } else {
                TestTree::new()
            };
        }
        let mut trimmed = TestTree::new();
        for (name, test) in &self.tests {
            let sub = selector.zoom(name);
            trimmed.set(name.clone(), test.filter(&sub));
        }
        trimmed
    }

    pub fn configure(&self, conf: &Configuration) -> TestTree {
        TestTree {
            tests: self
                .tests
                .iter()
                .map(|(name, test)| (name.clone(), test.configure(conf)))
                .collect(),
        }
    }

    /// All requirements of all leaves. Duplicates are not removed.
    pub fn requirements(&self) -> impl Iterator<Item = &str> + '_ {
        self.iter()
            .flat_map(|(_, leaf)| leaf.leaf_requirements().iter().map(String::as_str))
    }

    /// Iterates over `(dotted name, leaf)` pairs in lexicographic order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            single: None,
            stack: vec![(String::new(), self.tests.iter())],
        }
    }

    /// Number of leaf tests in the tree.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl<'a> IntoIterator for &'a TestTree {
    type Item = (String, &'a Test);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

/// Depth-first iterator over the leaves of a test hierarchy.
pub struct Iter<'a> {
    single: Option<&'a Test>,
    stack: Vec<(String, btree_map::Iter<'a, String, Test>)>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (String, &'a Test);

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(leaf) = self.single.take() {
            return Some((String::new(), leaf));
        }
        loop {
            let (prefix, children) = self.stack.last_mut()?;
            let Some((name, test)) = children.next() else {
                self.stack.pop();
                continue;
            };
            let full_name = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", prefix, name)
            };
            match test {
                Test::Tree(tree) => self.stack.push((full_name, tree.tests.iter())),
                leaf => return Some((full_name, leaf)),
            }
        }
    }
}

/// Resolved configuration injected into every leaf test.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    values: BTreeMap<String, String>,
}

impl Configuration {
    pub fn new() -> Self {
        Configuration::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Configuration {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Configuration {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Turns the set of requirements gathered from the selected tests into a
/// configuration.
pub trait Configurator {
    fn configure(&self, requirements: &BTreeSet<String>) -> Result<Configuration>;
}

impl<F> Configurator for F
where
    F: Fn(&BTreeSet<String>) -> Result<Configuration>,
{
    fn configure(&self, requirements: &BTreeSet<String>) -> Result<Configuration> {
        self(requirements)
    }
}
