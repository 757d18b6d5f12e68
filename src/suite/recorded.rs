//! Tests loaded back from a previous run's results directory

use crate::error::Result;
use crate::suite::{Test, TestTree};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// A test that has already run, backed by its output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTest {
    dir: PathBuf,
}

impl RecordedTest {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        RecordedTest { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A test passed unless it left a `fail_message` behind.
    pub fn passed(&self) -> bool {
        !self.dir.join("fail_message").exists()
    }

    pub fn killed(&self) -> bool {
        self.dir.join("killed").exists()
    }

    pub fn read_file(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.dir.join(name)).ok()
    }

    /// Copy one of the test's files to `out`.
    pub fn dump_file(&self, name: &str, out: &mut dyn Write) -> Result<()> {
        let mut file = fs::File::open(self.dir.join(name))?;
        io::copy(&mut file, out)?;
        Ok(())
    }

    /// Paths of every file the test produced, relative to its directory.
    pub fn list_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let mut pending = vec![self.dir.clone()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if entry.file_type()?.is_dir() {
                    pending.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.dir) {
                    files.push(rel.to_string_lossy().into_owned());
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

impl fmt::Display for RecordedTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.read_file("description") {
            Some(description) => write!(f, "{}", description),
            None => write!(f, "unknown test"),
        }
    }
}

/// Rebuild a test hierarchy from the per-test directories of a results directory.
///
/// Directory names are dotted test names; repeated runs (`name.1`, `name.2`)
/// become children of `name`.
pub fn load_results_as_tests(path: &Path) -> Result<TestTree> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            entries.push(entry);
        }
    }
    entries.sort_by_key(|entry| entry.file_name());

    let mut tests = TestTree::new();
    for entry in entries {
        let dir_name = entry.file_name().to_string_lossy().into_owned();
        let segments: Vec<&str> = dir_name.split('.').collect();
        let test = Test::Recorded(RecordedTest::new(entry.path()));
        if let Err(e) = tests.insert_path(&segments, test) {
            warn!("skipping results directory {}: {}", dir_name, e);
        }
    }
    Ok(tests)
}
