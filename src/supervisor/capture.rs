//! Test process output capture
//!
//! A test's stdout and stderr always end up in the `stdout` and `stderr`
//! files of its output directory. In verbose mode both streams are piped
//! through a tee thread that also copies them to the console.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const DRAIN_POLL: Duration = Duration::from_millis(10);

/// A writer that tees output to both a file and the console
pub struct TeeWriter<W: Write, C: Write> {
    writer: W,
    console: C,
}

impl<W: Write, C: Write> TeeWriter<W, C> {
    pub fn new(writer: W, console: C) -> Self {
        TeeWriter { writer, console }
    }
}

impl<W: Write, C: Write> Write for TeeWriter<W, C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write_all(buf)?;
        // Console errors are ignored.
        let _ = self.console.write_all(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.console.flush();
        self.writer.flush()
    }
}

/// Output redirection for one test process.
pub struct OutputCapture {
    tee_files: Option<(File, File)>,
}

impl OutputCapture {
    /// Point `cmd`'s stdout and stderr at the log files in `dir`.
    pub fn redirect(cmd: &mut Command, dir: &Path, verbose: bool) -> io::Result<Self> {
        let stdout = File::create(dir.join("stdout"))?;
        let stderr = File::create(dir.join("stderr"))?;
        if verbose {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            Ok(OutputCapture {
                tee_files: Some((stdout, stderr)),
            })
        } else {
            cmd.stdout(stdout).stderr(stderr);
            Ok(OutputCapture { tee_files: None })
        }
    }

    /// Start copying the child's pipes, if any.
    pub fn start(self, child: &mut Child) -> io::Result<TeeThreads> {
        let mut handles = Vec::new();
        if let Some((stdout_file, stderr_file)) = self.tee_files {
            if let Some(stdout) = child.stdout.take() {
                handles.push(spawn_tee("tee:stdout", stdout, stdout_file, io::stdout())?);
            }
            if let Some(stderr) = child.stderr.take() {
                handles.push(spawn_tee("tee:stderr", stderr, stderr_file, io::stderr())?);
            }
        }
        Ok(TeeThreads { handles })
    }
}

/// Handles of the running tee threads.
pub struct TeeThreads {
    handles: Vec<JoinHandle<io::Result<()>>>,
}

impl TeeThreads {
    /// Wait up to `limit` for the child's pipes to be drained.
    ///
    /// Background processes of the test may keep a pipe open after the test
    /// itself exited. Their tee threads are left running and keep copying
    /// until the pipe closes.
    pub fn finish_within(self, limit: Duration) {
        let deadline = Instant::now() + limit;
        for handle in self.handles {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(DRAIN_POLL);
            }
            if !handle.is_finished() {
                debug!("output pipe still open after {:?}, not waiting", limit);
                continue;
            }
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("failed to capture test output: {}", e),
                Err(_) => warn!("output capture thread panicked"),
            }
        }
    }
}

/// Spawn a thread to tee a stream to both its log file and the console
pub fn spawn_tee<R, W, C>(
    name: &str,
    mut reader: R,
    writer: W,
    console: C,
) -> io::Result<JoinHandle<io::Result<()>>>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
    C: Write + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || -> io::Result<()> {
            let mut tee = TeeWriter::new(writer, console);
            io::copy(&mut reader, &mut tee)?;
            tee.flush()?;
            Ok(())
        })
}
