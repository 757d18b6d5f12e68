//! Per-test process supervision
//!
//! Every launched test gets a [`TestProcess`]. Starting it creates the test's
//! output directory and spawns a supervising thread, which in turn spawns the
//! test program and a host thread that owns the child. The host thread arms a
//! [`TimeoutGuard`], waits for the child, collects files from the run
//! directory and sends a single [`HostReport`] back.
//!
//! The supervisor waits for that report for the test's timeout plus a grace
//! period. If nothing arrives, the process group is torn down with an
//! escalating sequence of signals and the test is recorded as FAILED.

use crate::error::{Error, Result};
use crate::runner::{RunContext, TestInstanceId, TestStatus};
use crate::suite::Test;
use crate::sync::{lock, ExitLatch};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub mod capture;
pub mod timeout;

pub use capture::{OutputCapture, TeeWriter};
pub use timeout::TimeoutGuard;

/// How long the ladder waits for the leader after the first SIGTERM.
const LADDER_JOIN: Duration = Duration::from_secs(5);
/// Pause between the group-wide signals of the ladder.
const LADDER_INTERVAL: Duration = Duration::from_secs(2);
const LADDER_SIGNALS: [Signal; 3] = [Signal::SIGTERM, Signal::SIGABRT, Signal::SIGKILL];

const JOIN_POLL: Duration = Duration::from_millis(100);
/// How long the host waits for the output pipes after the test exited.
const TEE_DRAIN: Duration = Duration::from_millis(500);
/// How long a supervisor waits for its host thread after the outcome is known.
const HOST_JOIN: Duration = Duration::from_secs(5);

/// Number of lines shown under a failed test.
pub const TAIL_LINES: usize = 10;

/// What the host thread saw of the child.
#[derive(Debug, Clone, Copy)]
pub struct HostReport {
    pub status: ExitStatus,
    pub timed_out: bool,
}

/// Supervision settings shared by every test of a run.
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    pub timeout: Duration,
    pub grace: Duration,
    pub verbose: bool,
}

/// One launched test instance.
pub struct TestProcess {
    id: TestInstanceId,
    test: Test,
    dir: PathBuf,
    run_dir: Option<PathBuf>,
    timeout: Duration,
    grace: Duration,
    verbose: bool,
    pid: Mutex<Option<Pid>>,
    graceful_kill: AtomicBool,
    terminator: Mutex<Option<JoinHandle<()>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    exited: Arc<ExitLatch>,
}

impl TestProcess {
    pub fn new(
        id: TestInstanceId,
        test: Test,
        dir: PathBuf,
        run_dir: Option<PathBuf>,
        settings: &ProcessSettings,
    ) -> Self {
        let timeout = test
            .timeout()
            .map(Duration::from_secs)
            .unwrap_or(settings.timeout);
        TestProcess {
            id,
            test,
            dir,
            run_dir,
            timeout,
            grace: settings.grace,
            verbose: settings.verbose,
            pid: Mutex::new(None),
            graceful_kill: AtomicBool::new(false),
            terminator: Mutex::new(None),
            supervisor: Mutex::new(None),
            exited: Arc::new(ExitLatch::new()),
        }
    }

    pub fn id(&self) -> &TestInstanceId {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn pid(&self) -> Option<Pid> {
        *lock(&self.pid)
    }

    /// Prepare the output directory and hand the test to a supervising thread.
    pub fn start(self: &Arc<Self>, ctx: &Arc<RunContext>) -> Result<()> {
        ctx.tell(TestStatus::Started, self);
        fs::create_dir(&self.dir)?;
        if let Some(run_dir) = &self.run_dir {
            fs::create_dir(run_dir)?;
        }
        fs::write(self.dir.join("description"), self.test.to_string())?;

        let process = Arc::clone(self);
        let ctx = Arc::clone(ctx);
        let handle = thread::Builder::new()
            .name(format!("supervisor:{}", self.id.name))
            .spawn(move || process.supervise(&ctx))?;
        *lock(&self.supervisor) = Some(handle);
        Ok(())
    }

    fn supervise(self: &Arc<Self>, ctx: &RunContext) {
        let (tx, rx) = bounded(1);
        let host = match self.launch(tx) {
            Ok(Some(host)) => host,
            Ok(None) => {
                self.write_killed();
                ctx.tell(TestStatus::Killed, self);
                return;
            }
            Err(e) => {
                self.write_fail_message(&format!("Test could not be started: {}", e));
                ctx.tell(TestStatus::Failed, self);
                return;
            }
        };

        let report = rx.recv_timeout(self.timeout + self.grace);
        self.join_terminator();

        let status = if self.graceful_kill.load(Ordering::SeqCst) {
            self.write_killed();
            TestStatus::Killed
        } else {
            match report {
                Err(RecvTimeoutError::Timeout) => {
                    self.terminate(false);
                    self.join_terminator();
                    self.write_fail_message(&format!(
                        "Test failed to exit after timeout of {} seconds",
                        self.timeout.as_secs()
                    ));
                    TestStatus::Failed
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.write_fail_message("Test did not fail, but failed to report its success");
                    TestStatus::Failed
                }
                Ok(report) => self.classify(report),
            }
        };

        self.join_host(host);
        ctx.tell(status, self);
    }

    /// Wait for the host thread to finish collecting files, up to [`HOST_JOIN`].
    fn join_host(&self, host: JoinHandle<()>) {
        let deadline = Instant::now() + HOST_JOIN;
        while !host.is_finished() && Instant::now() < deadline {
            thread::sleep(JOIN_POLL);
        }
        if !host.is_finished() {
            warn!("host thread for {} still running after {:?}", self.id, HOST_JOIN);
            return;
        }
        if host.join().is_err() {
            warn!("host thread for {} panicked", self.id);
        }
    }

    fn classify(&self, report: HostReport) -> TestStatus {
        if report.timed_out {
            self.write_fail_message(&format!(
                "Test timed out after {} seconds",
                self.timeout.as_secs()
            ));
            return TestStatus::TimedOut;
        }
        match (report.status.code(), report.status.signal()) {
            (Some(0), _) => TestStatus::Success,
            (Some(code), _) => {
                self.write_fail_message(&format!("Test exited abnormally with error code {}", code));
                TestStatus::Failed
            }
            (None, Some(signal)) => {
                self.write_fail_message(&format!("Test was terminated by signal {}", signal));
                TestStatus::Failed
            }
            (None, None) => {
                self.write_fail_message("Test did not fail, but failed to report its success");
                TestStatus::Failed
            }
        }
    }

    /// Spawn the child and its host thread.
    ///
    /// Returns `None` when a graceful kill was requested before the child
    /// could be started.
    fn launch(&self, tx: Sender<HostReport>) -> Result<Option<JoinHandle<()>>> {
        let Test::Command(command) = &self.test else {
            return Err(Error::CommandExecution(format!(
                "{} is not a runnable test",
                self.id.name
            )));
        };
        let mut cmd = command.to_command();
        cmd.current_dir(self.run_dir.as_deref().unwrap_or(&self.dir))
            .stdin(Stdio::null())
            .process_group(0);
        let capture = OutputCapture::redirect(&mut cmd, &self.dir, self.verbose)?;

        // The pid slot is held across spawning so that a concurrent
        // terminate either prevents the spawn or sees the pid.
        let mut pid = lock(&self.pid);
        if self.graceful_kill.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let mut child = cmd.spawn().map_err(|e| {
            Error::CommandExecution(format!("failed to spawn '{}': {}", command.command(), e))
        })?;
        let child_pid = Pid::from_raw(child.id() as i32);
        *pid = Some(child_pid);
        drop(pid);
        debug!("started {} as pid {}", self.id, child_pid);

        let tees = match capture.start(&mut child) {
            Ok(tees) => tees,
            Err(e) => {
                let _ = killpg(child_pid, Signal::SIGKILL);
                let _ = child.wait();
                return Err(e.into());
            }
        };

        let host = Host {
            child,
            pid: child_pid,
            timeout: self.timeout,
            dir: self.dir.clone(),
            run_dir: self.run_dir.clone(),
            exited: Arc::clone(&self.exited),
        };
        let handle = thread::Builder::new()
            .name(format!("host:{}", self.id.name))
            .spawn(move || {
                if let Some(report) = host.run(tees) {
                    let _ = tx.send(report);
                }
            })?;
        Ok(Some(handle))
    }

    /// Ask the test to stop, escalating until its process group is gone.
    ///
    /// With `graceful` the outcome is recorded as KILLED. Only the first call
    /// starts the escalation.
    pub fn terminate(self: &Arc<Self>, graceful: bool) {
        if graceful {
            self.graceful_kill.store(true, Ordering::SeqCst);
        }
        let mut terminator = lock(&self.terminator);
        if terminator.is_some() {
            return;
        }
        let process = Arc::clone(self);
        match thread::Builder::new()
            .name(format!("terminate:{}", self.id.name))
            .spawn(move || process.terminate_thorough())
        {
            Ok(handle) => *terminator = Some(handle),
            Err(e) => {
                warn!("could not spawn terminator for {}: {}", self.id, e);
                drop(terminator);
                self.terminate_thorough();
            }
        }
    }

    fn terminate_thorough(&self) {
        let Some(pid) = self.pid() else {
            return;
        };
        debug!("terminating {} (pid {})", self.id, pid);
        let _ = kill(pid, Signal::SIGTERM);
        self.exited.wait(LADDER_JOIN);
        for signal in LADDER_SIGNALS {
            if let Err(e) = killpg(pid, signal) {
                debug!("process group {} gone ({}), stopping at {}", pid, e, signal);
                break;
            }
            thread::sleep(LADDER_INTERVAL);
        }
    }

    fn join_terminator(&self) {
        let handle = lock(&self.terminator).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("terminator for {} panicked", self.id);
            }
        }
    }

    /// Wait for the supervising thread to finish.
    ///
    /// With a `stop` check, gives up with [`Error::Interrupted`] as soon as it
    /// returns true.
    pub fn join(&self, stop: Option<&dyn Fn() -> bool>) -> Result<()> {
        loop {
            {
                let mut slot = lock(&self.supervisor);
                let finished = slot.as_ref().map_or(true, JoinHandle::is_finished);
                if finished {
                    if let Some(handle) = slot.take() {
                        if handle.join().is_err() {
                            warn!("supervisor for {} panicked", self.id);
                        }
                    }
                    break;
                }
            }
            if stop.is_some_and(|stop| stop()) {
                return Err(Error::Interrupted);
            }
            thread::sleep(JOIN_POLL);
        }
        self.join_terminator();
        Ok(())
    }

    /// Append `message` to both the test's stderr log and its fail message.
    pub fn write_fail_message(&self, message: &str) {
        for name in ["stderr", "fail_message"] {
            if let Err(e) = append(&self.dir.join(name), message) {
                warn!("could not record failure of {}: {}", self.id, e);
            }
        }
    }

    fn write_killed(&self) {
        if let Err(e) = append(&self.dir.join("killed"), "Test killed") {
            warn!("could not mark {} as killed: {}", self.id, e);
        }
    }

    /// The last lines of the test's stderr, padded with stdout when stderr is
    /// short.
    pub fn tail_error(&self) -> String {
        tail_error(&self.dir, TAIL_LINES)
    }
}

/// Last `count` lines of `dir/stderr`, preceded by the last lines of
/// `dir/stdout` if stderr has fewer than `count`.
pub fn tail_error(dir: &Path, count: usize) -> String {
    let read_lines = |name: &str| -> Vec<String> {
        fs::read_to_string(dir.join(name))
            .map(|text| text.lines().map(str::to_string).collect())
            .unwrap_or_default()
    };
    let stderr = read_lines("stderr");
    let mut lines: Vec<String> = stderr[stderr.len().saturating_sub(count)..].to_vec();
    if lines.len() < count {
        let stdout = read_lines("stdout");
        let wanted = count - lines.len();
        let mut padded = stdout[stdout.len().saturating_sub(wanted)..].to_vec();
        padded.append(&mut lines);
        lines = padded;
    }
    lines.join("\n")
}

fn append(path: &Path, message: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(message.as_bytes())
}

/// The thread that owns a test's child process.
struct Host {
    child: Child,
    pid: Pid,
    timeout: Duration,
    dir: PathBuf,
    run_dir: Option<PathBuf>,
    exited: Arc<ExitLatch>,
}

impl Host {
    fn run(mut self, tees: capture::TeeThreads) -> Option<HostReport> {
        let pid = self.pid;
        let waited = TimeoutGuard::arm(self.timeout, move || {
            let _ = killpg(pid, Signal::SIGTERM);
        })
        .and_then(|guard| {
            let status = self.child.wait()?;
            Ok((status, guard.fired()))
        });
        self.exited.set();
        tees.finish_within(TEE_DRAIN);

        if let Some(run_dir) = &self.run_dir {
            if let Err(e) = move_dir_contents(run_dir, &self.dir) {
                warn!("could not collect files from {}: {}", run_dir.display(), e);
            }
        }

        match waited {
            Ok((status, timed_out)) => Some(HostReport { status, timed_out }),
            Err(e) => {
                warn!("lost track of pid {}: {}", pid, e);
                None
            }
        }
    }
}

/// Move every entry of `from` into `to`, then remove `from`.
pub fn move_dir_contents(from: &Path, to: &Path) -> io::Result<()> {
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        move_entry(&entry.path(), &to.join(entry.file_name()))?;
    }
    fs::remove_dir(from)
}

fn move_entry(from: &Path, to: &Path) -> io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    // Renames fail across file systems; fall back to copying.
    if fs::symlink_metadata(from)?.is_dir() {
        fs::create_dir_all(to)?;
        move_dir_contents(from, to)
    } else {
        fs::copy(from, to)?;
        fs::remove_file(from)
    }
}
