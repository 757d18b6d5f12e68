//! Run the selected tests

use crate::commands::utils::{load_suite, select_tests};
use crate::commands::Command;
use crate::error::Result;
use crate::runner::{RunnerOptions, TestRunner, DEFAULT_GRACE, DEFAULT_TIMEOUT};
use crate::signal::InterruptFlag;
use crate::suite::Configurator;
use crate::ui::UI;
use crate::view::View;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Command to run tests from the suite manifest.
///
/// Options left unset fall back to the manifest's `[DEFAULT]` section.
#[derive(Default)]
pub struct RunCommand {
    pub base_path: Option<String>,
    pub config_path: Option<String>,
    pub filters: Vec<String>,
    pub jobs: Option<usize>,
    pub timeout: Option<u64>,
    pub grace: Option<Duration>,
    pub repeat: usize,
    pub kontinue: bool,
    pub abort_fast: bool,
    pub verbose: bool,
    pub output_dir: Option<String>,
    pub run_dir: Option<String>,
    pub dry_run: bool,
    pub print_config: bool,
    pub interrupt: InterruptFlag,
    /// Overrides the view picked from the terminal.
    pub view: Option<Arc<dyn View>>,
}

impl RunCommand {
    pub fn new(base_path: Option<String>) -> Self {
        RunCommand {
            base_path,
            repeat: 1,
            ..Default::default()
        }
    }
}

impl Command for RunCommand {
    fn execute(&self, ui: &mut dyn UI) -> Result<i32> {
        let suite = load_suite(self.base_path.as_deref(), self.config_path.as_deref())?;
        let (selected, filter) = select_tests(&suite.tests, &self.filters, &suite.groups)?;

        let requirements: BTreeSet<String> =
            selected.requirements().map(str::to_string).collect();
        let conf = suite.configure(&requirements)?;
        if self.print_config {
            for (key, value) in conf.iter() {
                ui.output(&format!("{} = {}", key, value))?;
            }
        }
        let tests = selected.configure(&conf);
        filter.check_use(ui)?;

        if self.dry_run {
            return Ok(0);
        }

        let jobs = match self.jobs {
            Some(0) => num_cpus::get(),
            Some(n) => n,
            None => suite.default_jobs(),
        };
        let timeout = self
            .timeout
            .or(suite.timeout)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);
        let options = RunnerOptions {
            jobs,
            timeout,
            grace: self.grace.unwrap_or(DEFAULT_GRACE),
            output_dir: self.output_dir.as_ref().map(PathBuf::from),
            results_root: suite.results_dir.clone(),
            run_dir: self.run_dir.as_ref().map(PathBuf::from),
            verbose: self.verbose,
            repeat: self.repeat.max(1),
            kontinue: self.kontinue,
            abort_fast: self.abort_fast,
            interrupt: self.interrupt.clone(),
        };

        let runner = match &self.view {
            Some(view) => TestRunner::with_view(&tests, options, Arc::clone(view))?,
            None => TestRunner::new(&tests, options)?,
        };
        let summary = runner.run(ui)?;
        Ok(summary.exit_code())
    }

    fn name(&self) -> &str {
        "run"
    }

    fn help(&self) -> &str {
        "Run the selected tests"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MANIFEST_FILE;
    use crate::error::Error;
    use crate::ui::test_ui::TestUI;
    use crate::view::TextView;
    use std::fs;
    use tempfile::TempDir;

    fn suite(manifest: &str) -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(MANIFEST_FILE), manifest).unwrap();
        temp
    }

    fn command(temp: &TempDir) -> RunCommand {
        let mut cmd = RunCommand::new(Some(temp.path().to_string_lossy().to_string()));
        cmd.view = Some(Arc::new(TextView::new(false)));
        cmd
    }

    #[test]
    fn test_run_all_passing() {
        let temp = suite("[test:a]\ncommand=true\n[test:b]\ncommand=exit 0\n");
        let mut ui = TestUI::new();
        let code = command(&temp).execute(&mut ui).unwrap();
        assert_eq!(code, 0);
        assert!(ui.output[0].starts_with("Running 2 tests (output_dir: "));
        assert!(ui.output.contains(&"All tests passed successfully".to_string()));
        assert!(ui.output.last().unwrap().starts_with("Saved test results to "));
        assert!(temp.path().join("results").is_dir());
    }

    #[test]
    fn test_run_with_failure() {
        let temp = suite("[test:a]\ncommand=true\n[test:b]\ncommand=exit 2\n");
        let mut ui = TestUI::new();
        let code = command(&temp).execute(&mut ui).unwrap();
        assert_eq!(code, 1);
        assert!(ui.output.contains(&"1 of 2 tests failed".to_string()));
    }

    #[test]
    fn test_dry_run_creates_nothing() {
        let temp = suite("[test:a]\ncommand=false\n");
        let mut cmd = command(&temp);
        cmd.dry_run = true;
        let mut ui = TestUI::new();
        assert_eq!(cmd.execute(&mut ui).unwrap(), 0);
        assert!(ui.output.is_empty());
        assert!(!temp.path().join("results").exists());
    }

    #[test]
    fn test_print_config() {
        let temp = suite(
            "[config]\nTESTF_RUN_TEST_SERVER=/opt/server\n\n\
             [test:a]\ncommand=test -n $TESTF_RUN_TEST_SERVER\nrequires=TESTF_RUN_TEST_SERVER\n",
        );
        let mut cmd = command(&temp);
        cmd.print_config = true;
        cmd.dry_run = true;
        let mut ui = TestUI::new();
        cmd.execute(&mut ui).unwrap();
        assert_eq!(ui.output, vec!["TESTF_RUN_TEST_SERVER = /opt/server"]);
    }

    #[test]
    fn test_unknown_filter_is_error() {
        let temp = suite("[test:a]\ncommand=true\n");
        let mut cmd = command(&temp);
        cmd.filters = vec!["nope".to_string()];
        let mut ui = TestUI::new();
        let err = cmd.execute(&mut ui).unwrap_err();
        assert!(matches!(err, Error::Selection(_)));
    }

    #[test]
    fn test_missing_requirement_is_error() {
        let temp = suite("[test:a]\ncommand=true\nrequires=TESTF_RUN_TEST_UNSET\n");
        let mut ui = TestUI::new();
        let err = command(&temp).execute(&mut ui).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
