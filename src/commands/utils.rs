//! Utility functions for command implementation

use crate::config::SuiteConfig;
use crate::error::Result;
use crate::filter::{Groups, TestFilter};
use crate::suite::TestTree;
use std::path::Path;

/// Load the suite manifest: `config_path` if given, otherwise the one in
/// `base_path` (or the current directory if None).
pub fn load_suite(base_path: Option<&str>, config_path: Option<&str>) -> Result<SuiteConfig> {
    match config_path {
        Some(path) => SuiteConfig::load_from_file(Path::new(path)),
        None => {
            let base = base_path.map(Path::new).unwrap_or_else(|| Path::new("."));
            SuiteConfig::discover(base)
        }
    }
}

/// Parse the selection tokens and apply them to `tests`.
///
/// The filter is returned so the caller can check which tokens went unused.
pub fn select_tests(
    tests: &TestTree,
    filters: &[String],
    groups: &Groups,
) -> Result<(TestTree, TestFilter)> {
    let filter = TestFilter::parse(filters, groups)?;
    let selected = tests.filter(&filter.selector());
    Ok((selected, filter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MANIFEST_FILE;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_suite_from_base_path() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(MANIFEST_FILE), "[test:a]\ncommand=true\n").unwrap();
        let path = temp.path().to_string_lossy().to_string();
        let suite = load_suite(Some(&path), None).unwrap();
        assert_eq!(suite.tests.len(), 1);
    }

    #[test]
    fn test_load_suite_explicit_file() {
        let temp = TempDir::new().unwrap();
        let manifest = temp.path().join("other.conf");
        fs::write(&manifest, "[test:a]\ncommand=true\n[test:b]\ncommand=true\n").unwrap();
        let suite = load_suite(None, Some(&manifest.to_string_lossy())).unwrap();
        assert_eq!(suite.tests.len(), 2);
        assert_eq!(suite.base_dir, temp.path());
    }

    #[test]
    fn test_load_suite_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().to_string_lossy().to_string();
        assert!(load_suite(Some(&path), None).is_err());
    }

    #[test]
    fn test_select_tests() {
        let suite = SuiteConfig::parse(
            "[test:a]\ncommand=true\n[test:b.c]\ncommand=true\n",
            Path::new("."),
        )
        .unwrap();
        let (selected, _filter) =
            select_tests(&suite.tests, &["b".to_string()], &suite.groups).unwrap();
        let names: Vec<String> = selected.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["b.c"]);
    }
}
