//! Inspect the results of a previous run

use crate::commands::utils::load_suite;
use crate::commands::Command;
use crate::error::{Error, Result};
use crate::filter::{Groups, PredicateFilter, TestFilter};
use crate::runner::TestStatus;
use crate::suite::{load_results_as_tests, RecordedTest, Test};
use crate::ui::UI;
use crate::view::format_event;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Command to load the per-test directories of an earlier run and report on
/// them as if they had just run.
#[derive(Debug, Default)]
pub struct LoadCommand {
    pub base_path: Option<String>,
    pub config_path: Option<String>,
    /// Results directory to load. Defaults to the newest one.
    pub from: Option<String>,
    pub filters: Vec<String>,
    /// Only tests that left a fail message.
    pub only_failed: bool,
    /// List the files each test produced.
    pub tree: bool,
    /// Only list test names.
    pub list: bool,
    /// Dump each test's stdout and stderr.
    pub verbose: bool,
}

impl LoadCommand {
    pub fn new(base_path: Option<String>) -> Self {
        LoadCommand {
            base_path,
            ..Default::default()
        }
    }

    fn status_of(test: &RecordedTest) -> TestStatus {
        if !test.passed() {
            TestStatus::Failed
        } else if test.killed() {
            TestStatus::Killed
        } else {
            TestStatus::Success
        }
    }

    fn dump_log(test: &RecordedTest, ui: &mut dyn UI) -> Result<()> {
        for name in ["stdout", "stderr"] {
            let mut buf = Vec::new();
            if let Err(e) = test.dump_file(name, &mut buf) {
                debug!("no {} for {}: {}", name, test.dir().display(), e);
            }
            ui.output_bytes(&buf)?;
        }
        Ok(())
    }
}

/// The most recently modified directory under `root`.
pub fn newest_results_dir(root: &Path) -> Result<PathBuf> {
    let entries = fs::read_dir(root).map_err(|e| {
        Error::Config(format!("No previous results in {}: {}", root.display(), e))
    })?;
    let mut newest = None;
    for entry in entries {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_dir() {
            continue;
        }
        let modified = metadata.modified()?;
        if newest.as_ref().map_or(true, |(time, _)| modified > *time) {
            newest = Some((modified, entry.path()));
        }
    }
    newest
        .map(|(_, path)| path)
        .ok_or_else(|| Error::Config(format!("No previous results in {}", root.display())))
}

impl Command for LoadCommand {
    fn execute(&self, ui: &mut dyn UI) -> Result<i32> {
        let suite = load_suite(self.base_path.as_deref(), self.config_path.as_deref());
        let (groups, load_path) = match (suite, &self.from) {
            (Ok(suite), Some(from)) => (suite.groups, PathBuf::from(from)),
            (Err(e), Some(from)) => {
                debug!("loading without a manifest: {}", e);
                (Groups::new(), PathBuf::from(from))
            }
            (Ok(suite), None) => {
                let path = newest_results_dir(&suite.results_dir)?;
                ui.output(&format!("Loading tests from {}", path.display()))?;
                (suite.groups, path)
            }
            (Err(e), None) => return Err(e),
        };

        let filter = TestFilter::parse(&self.filters, &groups)?;
        let mut tests = load_results_as_tests(&load_path)?.filter(&filter.selector());
        filter.check_use(ui)?;
        if self.only_failed {
            let failed = PredicateFilter::new(|test: &Test| match test {
                Test::Recorded(recorded) => !recorded.passed(),
                _ => false,
            });
            tests = tests.filter(&failed.selector());
        }

        for (name, test) in &tests {
            let Test::Recorded(recorded) = test else {
                continue;
            };
            if self.list {
                if self.verbose {
                    ui.output(&format!("{}:", name))?;
                    for line in recorded.to_string().lines() {
                        ui.output(&format!("  {}", line))?;
                    }
                } else {
                    ui.output(&name)?;
                }
                continue;
            }
            if self.verbose {
                Self::dump_log(recorded, ui)?;
            }
            ui.output(&format_event(Self::status_of(recorded), &name, None, false))?;
            if self.tree {
                for file in recorded.list_files()? {
                    ui.output(&format!("  {}", file))?;
                }
            }
        }
        Ok(0)
    }

    fn name(&self) -> &str {
        "load"
    }

    fn help(&self) -> &str {
        "Show the results of a previous run"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::test_ui::TestUI;
    use tempfile::TempDir;

    /// A results directory with `a` passed, `b.c` failed and `b.d` killed.
    fn results() -> TempDir {
        let temp = TempDir::new().unwrap();
        for (name, fail, killed) in [("a", false, false), ("b.c", true, false), ("b.d", false, true)] {
            let dir = temp.path().join(name);
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join("description"), format!("command: {}\n", name)).unwrap();
            fs::write(dir.join("stdout"), format!("{} out\n", name)).unwrap();
            fs::write(dir.join("stderr"), "").unwrap();
            if fail {
                fs::write(dir.join("fail_message"), "Failed").unwrap();
            }
            if killed {
                fs::write(dir.join("killed"), "Test killed").unwrap();
            }
        }
        temp
    }

    fn command(results: &TempDir) -> LoadCommand {
        let mut cmd = LoadCommand::new(Some(results.path().join("no-suite").to_string_lossy().to_string()));
        cmd.from = Some(results.path().to_string_lossy().to_string());
        cmd
    }

    #[test]
    fn test_load_reports_statuses() {
        let results = results();
        let mut ui = TestUI::new();
        assert_eq!(command(&results).execute(&mut ui).unwrap(), 0);
        assert_eq!(ui.output, vec!["OK   a", "FAIL b.c", "KILL b.d"]);
    }

    #[test]
    fn test_load_only_failed() {
        let results = results();
        let mut cmd = command(&results);
        cmd.only_failed = true;
        let mut ui = TestUI::new();
        cmd.execute(&mut ui).unwrap();
        assert_eq!(ui.output, vec!["FAIL b.c"]);
    }

    #[test]
    fn test_load_with_filter_and_list() {
        let results = results();
        let mut cmd = command(&results);
        cmd.filters = vec!["b".to_string()];
        cmd.list = true;
        let mut ui = TestUI::new();
        cmd.execute(&mut ui).unwrap();
        assert_eq!(ui.output, vec!["b.c", "b.d"]);
    }

    #[test]
    fn test_load_tree_lists_files() {
        let results = results();
        let mut cmd = command(&results);
        cmd.filters = vec!["a".to_string()];
        cmd.tree = true;
        let mut ui = TestUI::new();
        cmd.execute(&mut ui).unwrap();
        assert_eq!(
            ui.output,
            vec!["OK   a", "  description", "  stderr", "  stdout"]
        );
    }

    #[test]
    fn test_load_verbose_dumps_logs() {
        let results = results();
        let mut cmd = command(&results);
        cmd.filters = vec!["a".to_string()];
        cmd.verbose = true;
        let mut ui = TestUI::new();
        cmd.execute(&mut ui).unwrap();
        assert_eq!(ui.bytes_output, vec![b"a out\n".to_vec(), Vec::new()]);
    }

    #[test]
    fn test_load_unknown_filter() {
        let results = results();
        let mut cmd = command(&results);
        cmd.filters = vec!["zzz".to_string()];
        let mut ui = TestUI::new();
        assert!(matches!(cmd.execute(&mut ui), Err(Error::Selection(_))));
    }

    #[test]
    fn test_newest_results_dir() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("old")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::create_dir(temp.path().join("new")).unwrap();
        fs::write(temp.path().join("stray"), "").unwrap();
        assert_eq!(newest_results_dir(temp.path()).unwrap(), temp.path().join("new"));

        let empty = TempDir::new().unwrap();
        assert!(newest_results_dir(empty.path()).is_err());
    }
}
