//! Concurrent test scheduling
//!
//! [`TestRunner`] launches every selected leaf test `repeat` times, never
//! more than `jobs` at once. Each launched instance is a [`TestProcess`] whose
//! supervisor reports back through the shared [`RunContext`]. When launching
//! is done the runner drains the running set, and on interrupt or abort-fast
//! it gracefully kills whatever is still running before returning.

use crate::error::{Error, Result};
use crate::signal::InterruptFlag;
use crate::suite::{Test, TestTree};
use crate::supervisor::{ProcessSettings, TestProcess};
use crate::sync::{lock, Semaphore};
use crate::ui::UI;
use crate::view::{TermView, TextView, View, ViewEvent};
use console::Term;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Default per-test timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
/// How long past its timeout a test may take before it is torn down.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// One run of one test: its dotted name and zero-based repeat index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TestInstanceId {
    pub name: String,
    pub repeat: usize,
}

impl fmt::Display for TestInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.name, self.repeat + 1)
    }
}

/// State of a test instance as reported by its supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestStatus {
    Started,
    Success,
    Failed,
    TimedOut,
    Killed,
}

impl TestStatus {
    /// Four-character code used in per-test output lines.
    pub fn short_code(&self) -> &'static str {
        match self {
            TestStatus::Started => "....",
            TestStatus::Success => "OK  ",
            TestStatus::Failed => "FAIL",
            TestStatus::TimedOut => "TIME",
            TestStatus::Killed => "KILL",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TestStatus::Started)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestStatus::Started => "STARTED",
            TestStatus::Success => "SUCCESS",
            TestStatus::Failed => "FAILED",
            TestStatus::TimedOut => "TIMED_OUT",
            TestStatus::Killed => "KILLED",
        };
        write!(f, "{}", s)
    }
}

/// Settings for one invocation of the runner.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Maximum number of tests in flight.
    pub jobs: usize,
    /// Timeout for tests without their own.
    pub timeout: Duration,
    pub grace: Duration,
    /// Exact results directory. Must not exist yet.
    pub output_dir: Option<PathBuf>,
    /// Where timestamped results directories are created when no
    /// `output_dir` is given.
    pub results_root: PathBuf,
    /// Root for separate per-test working directories.
    pub run_dir: Option<PathBuf>,
    pub verbose: bool,
    pub repeat: usize,
    /// Keep repeating tests that already failed.
    pub kontinue: bool,
    /// Stop everything on the first failure.
    pub abort_fast: bool,
    pub interrupt: InterruptFlag,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        RunnerOptions {
            jobs: 1,
            timeout: DEFAULT_TIMEOUT,
            grace: DEFAULT_GRACE,
            output_dir: None,
            results_root: PathBuf::from("results"),
            run_dir: None,
            verbose: false,
            repeat: 1,
            kontinue: false,
            abort_fast: false,
            interrupt: InterruptFlag::noop(),
        }
    }
}

/// Outcome of [`TestRunner::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub launched: usize,
    pub failed: usize,
    pub killed: usize,
    pub skipped: usize,
    pub all_passed: bool,
    pub results_dir: PathBuf,
}

impl RunSummary {
    pub fn exit_code(&self) -> i32 {
        if self.all_passed {
            0
        } else {
            1
        }
    }
}

/// State shared between the runner and the supervisors of one run.
pub struct RunContext {
    semaphore: Semaphore,
    running: Mutex<BTreeMap<TestInstanceId, Arc<TestProcess>>>,
    failed: Mutex<BTreeSet<String>>,
    aborting: AtomicBool,
    view: Arc<dyn View>,
    interrupt: InterruptFlag,
    repeat: usize,
    kontinue: bool,
    abort_fast: bool,
    verbose: bool,
}

impl RunContext {
    fn new(options: &RunnerOptions, view: Arc<dyn View>) -> Self {
        RunContext {
            semaphore: Semaphore::new(options.jobs.max(1)),
            running: Mutex::new(BTreeMap::new()),
            failed: Mutex::new(BTreeSet::new()),
            aborting: AtomicBool::new(false),
            view,
            interrupt: options.interrupt.clone(),
            repeat: options.repeat,
            kontinue: options.kontinue,
            abort_fast: options.abort_fast,
            verbose: options.verbose,
        }
    }

    /// Record a status change of `process`.
    ///
    /// A terminal status removes the process from the running set and frees
    /// its concurrency slot after the view has been told.
    pub fn tell(&self, status: TestStatus, process: &TestProcess) {
        let id = process.id();
        if !status.is_terminal() {
            self.view.tell(ViewEvent::Started(id.name.clone()));
            return;
        }
        debug!("{} finished: {}", id, status);

        let failed = status == TestStatus::Failed;
        let error = if failed && !self.is_aborting() && !self.verbose {
            Some(process.tail_error())
        } else {
            None
        };

        lock(&self.running).remove(id);
        if failed && self.abort_fast {
            self.aborting.store(true, Ordering::SeqCst);
        }
        if matches!(status, TestStatus::Failed | TestStatus::TimedOut) {
            lock(&self.failed).insert(id.name.clone());
            let cancelled = self.repeat.saturating_sub(id.repeat + 1);
            if !self.kontinue && cancelled > 0 {
                self.view.tell(ViewEvent::Cancel(cancelled));
            }
        }
        self.view.tell(ViewEvent::Finished {
            status,
            name: id.name.clone(),
            error,
        });
        self.semaphore.release();
    }

    pub fn is_aborting(&self) -> bool {
        self.aborting.load(Ordering::SeqCst)
    }

    fn abort(&self) {
        self.aborting.store(true, Ordering::SeqCst);
    }

    fn has_failed(&self, name: &str) -> bool {
        lock(&self.failed).contains(name)
    }

    fn failed_count(&self) -> usize {
        lock(&self.failed).len()
    }

    fn first_running(&self) -> Option<(TestInstanceId, Arc<TestProcess>)> {
        lock(&self.running)
            .iter()
            .next()
            .map(|(id, process)| (id.clone(), Arc::clone(process)))
    }

    fn running_snapshot(&self) -> Vec<(TestInstanceId, Arc<TestProcess>)> {
        lock(&self.running)
            .iter()
            .map(|(id, process)| (id.clone(), Arc::clone(process)))
            .collect()
    }

    fn is_running(&self, id: &TestInstanceId) -> bool {
        lock(&self.running).contains_key(id)
    }
}

/// Runs a selection of tests.
pub struct TestRunner {
    tests: Vec<(String, Test)>,
    options: RunnerOptions,
    results_dir: PathBuf,
    run_dir: Option<PathBuf>,
    ctx: Arc<RunContext>,
}

impl TestRunner {
    /// Create a runner with the view suited to stdout.
    ///
    /// This creates the results directory.
    pub fn new(tests: &TestTree, options: RunnerOptions) -> Result<Self> {
        let view: Arc<dyn View> = if Term::stdout().is_term() && !options.verbose {
            Arc::new(TermView::new(tests.len() * options.repeat)?)
        } else {
            Arc::new(TextView::for_stdout())
        };
        Self::with_view(tests, options, view)
    }

    pub fn with_view(tests: &TestTree, options: RunnerOptions, view: Arc<dyn View>) -> Result<Self> {
        let timestamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S.").to_string();
        let results_dir = match &options.output_dir {
            Some(dir) => {
                fs::create_dir(dir).map_err(|e| {
                    Error::Config(format!(
                        "Could not create output directory ({}): {}",
                        dir.display(),
                        e
                    ))
                })?;
                dir.clone()
            }
            None => make_timestamped_dir(&options.results_root, &timestamp)?,
        };
        let run_dir = options
            .run_dir
            .as_deref()
            .map(|root| make_timestamped_dir(root, &timestamp))
            .transpose()?;

        let tests = tests
            .iter()
            .map(|(name, test)| (name, test.clone()))
            .collect();
        let ctx = Arc::new(RunContext::new(&options, view));
        Ok(TestRunner {
            tests,
            options,
            results_dir,
            run_dir,
            ctx,
        })
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Run every test, wait for all of them and report the totals through `ui`.
    pub fn run(&self, ui: &mut dyn UI) -> Result<RunSummary> {
        let total = self.tests.len();
        let mut launched = BTreeSet::new();
        let mut killed = BTreeSet::new();

        ui.output(&format!(
            "Running {} tests (output_dir: {})",
            total,
            self.results_dir.display()
        ))?;

        match self.launch_all(&mut launched) {
            Ok(()) => {}
            Err(Error::Interrupted) => {
                info!("run stopped early");
                self.ctx.abort();
            }
            Err(e) => {
                self.ctx.abort();
                ui.error(&e.to_string())?;
                ui.error("Waiting for tests to finish...")?;
                let interrupted = || self.ctx.interrupt.is_set();
                if let Err(e) = self.wait_for_running_tests(&interrupted) {
                    debug!("wait cut short: {}", e);
                }
            }
        }

        let running = self.ctx.running_snapshot();
        if !running.is_empty() {
            ui.output("Killing remaining tasks...")?;
            for (id, process) in &running {
                killed.insert(id.clone());
                process.terminate(true);
            }
            for (_, process) in &running {
                process.join(None)?;
            }
            for (id, process) in &running {
                self.fail_unreported(id, process);
            }
        }
        self.ctx.view.close();

        let failed = self.ctx.failed_count();
        let mut summary = RunSummary {
            total,
            launched: launched.len(),
            failed,
            killed: killed.len(),
            skipped: total - launched.len(),
            all_passed: false,
            results_dir: self.results_dir.clone(),
        };
        if summary.launched != total || summary.killed > 0 {
            if failed > 0 {
                ui.output(&format!("{} tests failed", failed))?;
            }
            if summary.killed > 0 {
                ui.output(&format!("{} tests killed", summary.killed))?;
            }
            ui.output(&format!("{} tests skipped", summary.skipped))?;
        } else if failed > 0 {
            ui.output(&format!("{} of {} tests failed", failed, total))?;
        } else {
            summary.all_passed = true;
            ui.output("All tests passed successfully")?;
        }
        ui.output(&format!(
            "Saved test results to {}",
            self.results_dir.display()
        ))?;
        Ok(summary)
    }

    fn launch_all(&self, launched: &mut BTreeSet<String>) -> Result<()> {
        let ctx = &self.ctx;
        let settings = ProcessSettings {
            timeout: self.options.timeout,
            grace: self.options.grace,
            verbose: self.options.verbose,
        };
        let repeat = self.options.repeat;

        'passes: for pass in 0..repeat {
            if ctx.failed_count() == self.tests.len() {
                break;
            }
            for (name, test) in &self.tests {
                if ctx.is_aborting() {
                    break 'passes;
                }
                ctx.semaphore.acquire(&ctx.interrupt)?;
                if ctx.is_aborting() {
                    ctx.semaphore.release();
                    break 'passes;
                }
                if !self.options.kontinue && ctx.has_failed(name) {
                    ctx.semaphore.release();
                    continue;
                }

                let id = TestInstanceId {
                    name: name.clone(),
                    repeat: pass,
                };
                let subdir = if repeat == 1 {
                    name.clone()
                } else {
                    format!("{}.{}", name, pass + 1)
                };
                let process = Arc::new(TestProcess::new(
                    id.clone(),
                    test.clone(),
                    self.results_dir.join(&subdir),
                    self.run_dir.as_ref().map(|dir| dir.join(&subdir)),
                    &settings,
                ));
                lock(&ctx.running).insert(id, Arc::clone(&process));
                launched.insert(name.clone());
                process.start(ctx)?;
            }
        }
        let stopped = || ctx.interrupt.is_set() || ctx.is_aborting();
        self.wait_for_running_tests(&stopped)
    }

    /// Join every supervisor, failing instances that never reported.
    ///
    /// Gives up with [`Error::Interrupted`] once `stop` returns true.
    fn wait_for_running_tests(&self, stop: &dyn Fn() -> bool) -> Result<()> {
        while let Some((id, process)) = self.ctx.first_running() {
            process.join(Some(stop))?;
            self.fail_unreported(&id, &process);
        }
        Ok(())
    }

    /// Record a FAILED status for an instance whose supervisor is gone
    /// without having reported one.
    fn fail_unreported(&self, id: &TestInstanceId, process: &TestProcess) {
        if self.ctx.is_running(id) {
            process.write_fail_message("Test failed to report success or failure status");
            self.ctx.tell(TestStatus::Failed, process);
        }
    }
}

fn make_timestamped_dir(root: &Path, timestamp: &str) -> Result<PathBuf> {
    fs::create_dir_all(root).map_err(|e| {
        Error::Config(format!(
            "Could not create results directory ({}): {}",
            root.display(),
            e
        ))
    })?;
    let dir = tempfile::Builder::new()
        .prefix(timestamp)
        .tempdir_in(root)
        .map_err(|e| {
            Error::Config(format!(
                "Could not create directory in {}: {}",
                root.display(),
                e
            ))
        })?;
    Ok(dir.keep())
}
