//! Suite manifest (.testf.conf) parsing and handling
//!
//! The manifest is an INI file. `[DEFAULT]` holds run defaults, `[config]`
//! holds values for test requirements, every `[test:<dotted.name>]` section
//! declares one test and every `[group:<name>]` section declares a named
//! group of selection tokens.

use crate::error::{Error, Result};
use crate::filter::Groups;
use crate::suite::{CommandTest, Configuration, Configurator, TestTree};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// File name of the suite manifest.
pub const MANIFEST_FILE: &str = ".testf.conf";

const TEST_PREFIX: &str = "test:";
const GROUP_PREFIX: &str = "group:";

/// A parsed suite manifest.
#[derive(Debug, Clone)]
pub struct SuiteConfig {
    /// Directory the manifest lives in; relative paths resolve against it.
    pub base_dir: PathBuf,
    /// Root for timestamped results directories.
    pub results_dir: PathBuf,
    /// Default per-test timeout in seconds.
    pub timeout: Option<u64>,
    /// Default concurrency; 0 means one job per CPU.
    pub jobs: Option<usize>,
    /// Requirement values from `[config]`.
    pub values: BTreeMap<String, String>,
    pub tests: TestTree,
    pub groups: Groups,
}

impl SuiteConfig {
    /// Load the manifest from `dir`.
    pub fn discover(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Err(Error::Config(format!(
                "No {} found in {}",
                MANIFEST_FILE,
                dir.display()
            )));
        }
        Self::load_from_file(&path)
    }

    /// Load the manifest from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::parse(&contents, &base_dir)
    }

    /// Parse a manifest, resolving relative paths against `base_dir`.
    pub fn parse(contents: &str, base_dir: &Path) -> Result<Self> {
        let ini: HashMap<String, HashMap<String, String>> = serde_ini::from_str(contents)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", MANIFEST_FILE, e)))?;

        let empty = HashMap::new();
        let defaults = ini.get("DEFAULT").unwrap_or(&empty);
        let results_dir = base_dir.join(
            defaults
                .get("results_dir")
                .map(String::as_str)
                .unwrap_or("results"),
        );
        let timeout = parse_number(defaults, "timeout", "DEFAULT")?;
        let jobs = parse_number(defaults, "jobs", "DEFAULT")?;

        let values = ini
            .get("config")
            .map(|section| {
                section
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let mut sections: Vec<(&String, &HashMap<String, String>)> = ini.iter().collect();
        sections.sort_by(|a, b| a.0.cmp(b.0));

        let mut tests = TestTree::new();
        let mut groups = Groups::new();
        for (name, section) in sections {
            if let Some(test_name) = name.strip_prefix(TEST_PREFIX) {
                let test = parse_test(name, section)?;
                let path: Vec<&str> = test_name.split('.').collect();
                if path.iter().any(|segment| segment.is_empty()) {
                    return Err(Error::Config(format!("Invalid test name in [{}]", name)));
                }
                tests.insert_path(&path, test)?;
            } else if let Some(group_name) = name.strip_prefix(GROUP_PREFIX) {
                groups.insert(group_name.to_string(), parse_group(name, section, base_dir)?);
            } else if name != "DEFAULT" && name != "config" {
                warn!("ignoring unknown section [{}] in {}", name, MANIFEST_FILE);
            }
        }

        Ok(SuiteConfig {
            base_dir: base_dir.to_path_buf(),
            results_dir,
            timeout,
            jobs,
            values,
            tests,
            groups,
        })
    }

    /// Concurrency to use when none is given on the command line.
    pub fn default_jobs(&self) -> usize {
        match self.jobs {
            None => 1,
            Some(0) => num_cpus::get(),
            Some(n) => n,
        }
    }
}

impl Configurator for SuiteConfig {
    /// Resolve every requirement from the environment, falling back to the
    /// manifest's `[config]` section.
    fn configure(&self, requirements: &BTreeSet<String>) -> Result<Configuration> {
        let mut conf = Configuration::new();
        for name in requirements {
            let value = env::var(name)
                .ok()
                .or_else(|| self.values.get(name).cloned())
                .ok_or_else(|| {
                    Error::Config(format!(
                        "No value for requirement {} (set it in [config] or the environment)",
                        name
                    ))
                })?;
            conf.insert(name.clone(), value);
        }
        Ok(conf)
    }
}

fn parse_number<T: std::str::FromStr>(
    section: &HashMap<String, String>,
    key: &str,
    section_name: &str,
) -> Result<Option<T>> {
    section
        .get(key)
        .map(|value| {
            value.trim().parse().map_err(|_| {
                Error::Config(format!(
                    "Invalid {} '{}' in [{}]",
                    key, value, section_name
                ))
            })
        })
        .transpose()
}

fn parse_test(section_name: &str, section: &HashMap<String, String>) -> Result<CommandTest> {
    let command = section
        .get("command")
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| Error::Config(format!("No command option in [{}]", section_name)))?;
    let mut test = CommandTest::new(command.trim());
    if let Some(timeout) = parse_number(section, "timeout", section_name)? {
        test = test.with_timeout(timeout);
    }
    if let Some(requires) = section.get("requires") {
        test = test.with_requirements(requires.split_whitespace());
    }
    if let Some(env) = section.get("env") {
        for pair in env.split_whitespace() {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                Error::Config(format!(
                    "Invalid env entry '{}' in [{}], expected KEY=VALUE",
                    pair, section_name
                ))
            })?;
            test = test.with_env(key, value);
        }
    }
    Ok(test)
}

fn parse_group(
    section_name: &str,
    section: &HashMap<String, String>,
    base_dir: &Path,
) -> Result<Vec<String>> {
    let mut tokens: Vec<String> = section
        .get("patterns")
        .map(|p| p.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    if let Some(file) = section.get("file") {
        tokens.extend(group_from_file(&base_dir.join(file.trim()))?);
    }
    if !section.contains_key("patterns") && !section.contains_key("file") {
        return Err(Error::Config(format!(
            "[{}] needs patterns or file",
            section_name
        )));
    }
    Ok(tokens)
}

/// Read a group file: whitespace-separated tokens, `#` starts a comment.
pub fn group_from_file(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read group file {}: {}", path.display(), e))
    })?;
    Ok(contents
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default())
        .flat_map(str::split_whitespace)
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::Test;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
[DEFAULT]
results_dir=out
timeout=120
jobs=4

[config]
SERVER=build/server

[test:unit.alloc]
command=build/unit_alloc --server $SERVER
timeout=30
requires=SERVER
env=MALLOC_CHECK_=3 LANG=C

[test:unit.parse]
command=build/unit_parse

[test:stress]
command=build/stress

[group:quick]
patterns=unit !unit.alloc
"#;

    #[test]
    fn test_parse_full_manifest() {
        let config = SuiteConfig::parse(MANIFEST, Path::new("/suite")).unwrap();
        assert_eq!(config.results_dir, PathBuf::from("/suite/out"));
        assert_eq!(config.timeout, Some(120));
        assert_eq!(config.jobs, Some(4));
        assert_eq!(config.default_jobs(), 4);
        assert_eq!(config.values.get("SERVER").unwrap(), "build/server");

        let names: Vec<String> = config.tests.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["stress", "unit.alloc", "unit.parse"]);

        let Some(Test::Tree(unit)) = config.tests.get("unit") else {
            panic!("unit should be a tree");
        };
        let Some(Test::Command(alloc)) = unit.get("alloc") else {
            panic!("unit.alloc should be a command");
        };
        assert_eq!(alloc.timeout(), Some(30));
        assert_eq!(alloc.requirements(), ["SERVER"]);
        assert_eq!(alloc.env().get("LANG").unwrap(), "C");

        assert_eq!(
            config.groups.get("quick").unwrap(),
            &vec!["unit".to_string(), "!unit.alloc".to_string()]
        );
    }

    #[test]
    fn test_parse_minimal_manifest() {
        let config = SuiteConfig::parse("[test:a]\ncommand=true\n", Path::new(".")).unwrap();
        assert_eq!(config.results_dir, PathBuf::from("./results"));
        assert_eq!(config.timeout, None);
        assert_eq!(config.default_jobs(), 1);
        assert_eq!(config.tests.len(), 1);
    }

    #[test]
    fn test_jobs_zero_means_cpus() {
        let config = SuiteConfig::parse("[DEFAULT]\njobs=0\n", Path::new(".")).unwrap();
        assert_eq!(config.default_jobs(), num_cpus::get());
    }

    #[test]
    fn test_missing_command_is_config_error() {
        let err = SuiteConfig::parse("[test:a]\ntimeout=3\n", Path::new(".")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("No command option in [test:a]"));
    }

    #[test]
    fn test_bad_timeout_is_config_error() {
        let err = SuiteConfig::parse("[DEFAULT]\ntimeout=soon\n", Path::new(".")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_bad_env_is_config_error() {
        let err = SuiteConfig::parse("[test:a]\ncommand=true\nenv=NOEQUALS\n", Path::new("."))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_group_file_ignores_comments() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("quick.group"),
            "# quick tests\nunit.alloc unit.parse # the parsers\n\n!unit.slow\n",
        )
        .unwrap();
        let tokens = group_from_file(&temp.path().join("quick.group")).unwrap();
        assert_eq!(tokens, vec!["unit.alloc", "unit.parse", "!unit.slow"]);

        let manifest = "[group:quick]\npatterns=stress\nfile=quick.group\n";
        let config = SuiteConfig::parse(manifest, temp.path()).unwrap();
        assert_eq!(
            config.groups.get("quick").unwrap(),
            &vec!["stress", "unit.alloc", "unit.parse", "!unit.slow"]
        );
    }

    #[test]
    fn test_missing_group_file_is_config_error() {
        let temp = TempDir::new().unwrap();
        let err = SuiteConfig::parse("[group:g]\nfile=nope\n", temp.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_configurator_prefers_environment() {
        let config = SuiteConfig::parse(
            "[config]\nTESTF_CONFIG_TEST_A=manifest\nTESTF_CONFIG_TEST_B=manifest\n",
            Path::new("."),
        )
        .unwrap();
        env::set_var("TESTF_CONFIG_TEST_B", "environment");
        let requirements: BTreeSet<String> = ["TESTF_CONFIG_TEST_A", "TESTF_CONFIG_TEST_B"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let conf = config.configure(&requirements).unwrap();
        assert_eq!(conf.get("TESTF_CONFIG_TEST_A"), Some("manifest"));
        assert_eq!(conf.get("TESTF_CONFIG_TEST_B"), Some("environment"));
        env::remove_var("TESTF_CONFIG_TEST_B");
    }

    #[test]
    fn test_configurator_missing_value() {
        let config = SuiteConfig::parse("[DEFAULT]\ntimeout=5\n", Path::new(".")).unwrap();
        let requirements: BTreeSet<String> =
            ["TESTF_CONFIG_TEST_MISSING".to_string()].into_iter().collect();
        let err = config.configure(&requirements).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_discover_missing_manifest() {
        let temp = TempDir::new().unwrap();
        let err = SuiteConfig::discover(temp.path()).unwrap_err();
        assert!(err.to_string().contains(MANIFEST_FILE));
    }
}
