//! Live progress display
//!
//! The runner reports every state change of every test to a [`View`].
//! [`TextView`] prints one line per finished test. [`TermView`] additionally
//! keeps a status line at the bottom of the terminal showing the counts of
//! passed, failed, running and remaining tests, the elapsed time and the names
//! of the running tests.

use crate::runner::TestStatus;
use crate::sync::lock;
use console::{style, Term};
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::warn;

const REFRESH_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_COLUMNS: usize = 80;

/// Something that happened to a test instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    Started(String),
    Finished {
        status: TestStatus,
        name: String,
        error: Option<String>,
    },
    /// This many scheduled runs will not happen after all.
    Cancel(usize),
}

/// Receives progress events from the runner.
pub trait View: Send + Sync {
    fn tell(&self, event: ViewEvent);

    /// Flush everything. No events are sent after this.
    fn close(&self);
}

/// Format a finished test as `CODE name`, followed by its error tail.
pub fn format_event(status: TestStatus, name: &str, error: Option<&str>, colored: bool) -> String {
    let line = format!("{} {}", status.short_code(), name);
    let mut buf = if colored {
        let styled = style(line).bold().force_styling(true);
        match status {
            TestStatus::Success => styled.green(),
            TestStatus::Killed => styled.yellow(),
            _ => styled.red(),
        }
        .to_string()
    } else {
        line
    };
    if let Some(error) = error.filter(|e| !e.is_empty()) {
        buf.push('\n');
        buf.push_str(error);
    }
    buf
}

/// Render elapsed time as `1h2m3s`, `2m3s` or `3s`.
pub fn format_duration(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total / 60) % 60, total % 60);
    let mut ret = format!("{}s", seconds);
    if minutes > 0 || hours > 0 {
        ret = format!("{}m{}", minutes, ret);
    }
    if hours > 0 {
        ret = format!("{}h{}", hours, ret);
    }
    ret
}

/// Plain line-per-test output.
#[derive(Debug)]
pub struct TextView {
    colored: bool,
}

impl TextView {
    pub fn new(colored: bool) -> Self {
        TextView { colored }
    }

    /// Colour when stdout is a terminal.
    pub fn for_stdout() -> Self {
        TextView::new(Term::stdout().is_term())
    }
}

impl View for TextView {
    fn tell(&self, event: ViewEvent) {
        if let ViewEvent::Finished {
            status,
            name,
            error,
        } = event
        {
            println!("{}", format_event(status, &name, error.as_deref(), self.colored));
        }
    }

    fn close(&self) {}
}

/// State behind the terminal status line.
#[derive(Debug)]
pub struct StatusLine {
    running: Vec<String>,
    passed: usize,
    failed: usize,
    total: i64,
    start: Instant,
    colored: bool,
}

impl StatusLine {
    pub fn new(total: usize, colored: bool) -> Self {
        StatusLine {
            running: Vec::new(),
            passed: 0,
            failed: 0,
            total: total as i64,
            start: Instant::now(),
            colored,
        }
    }

    /// Apply an event, returning the line to print above the status line, if any.
    pub fn update(&mut self, event: ViewEvent) -> Option<String> {
        match event {
            ViewEvent::Started(name) => {
                self.running.push(name);
                None
            }
            ViewEvent::Cancel(count) => {
                self.total -= count as i64;
                None
            }
            ViewEvent::Finished {
                status,
                name,
                error,
            } => {
                if status == TestStatus::Success {
                    self.passed += 1;
                } else {
                    self.failed += 1;
                }
                if let Some(pos) = self.running.iter().position(|n| *n == name) {
                    self.running.remove(pos);
                }
                Some(format_event(status, &name, error.as_deref(), self.colored))
            }
        }
    }

    fn running_names(&self, max: usize) -> String {
        let mut ret = self.running[..max].join(", ");
        if self.running.len() > max {
            ret.push_str(if max == 0 { "..." } else { ", ..." });
        }
        ret
    }

    /// `[passed/failed/running/remaining elapsed names]`, fitted to `columns`.
    ///
    /// Empty while nothing is running.
    pub fn render(&self, columns: usize, elapsed: Duration) -> String {
        if self.running.is_empty() {
            return String::new();
        }
        let running = self.running.len();
        let remaining = self.total - (self.passed + self.failed + running) as i64;
        let duration = format_duration(elapsed);
        let line = |passed: &str, failed: &str, names: &str| {
            format!(
                "[{}/{}/{}/{} {} {}]",
                passed, failed, running, remaining, duration, names
            )
        };
        let (passed, failed) = (self.passed.to_string(), self.failed.to_string());

        let mut names = String::new();
        for max in 0..=running {
            let candidate = self.running_names(max);
            if line(&passed, &failed, &candidate).chars().count() > columns.saturating_sub(1) {
                break;
            }
            names = candidate;
        }

        if !self.colored {
            return line(&passed, &failed, &names);
        }
        let passed = if self.passed > 0 {
            style(passed).green().bold().force_styling(true).to_string()
        } else {
            passed
        };
        let failed = if self.failed > 0 {
            style(failed).red().bold().force_styling(true).to_string()
        } else {
            failed
        };
        line(&passed, &failed, &names)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

enum Message {
    Event(ViewEvent),
    Exit,
}

/// Interactive terminal view with a live status line.
///
/// Events are queued to a background thread, which also refreshes the status
/// line once a second while idle.
pub struct TermView {
    queue: Sender<Message>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TermView {
    /// Start the display thread for a run of `total` test instances.
    pub fn new(total: usize) -> std::io::Result<Self> {
        let (queue, events) = unbounded();
        let thread = thread::Builder::new()
            .name("TermView".to_string())
            .spawn(move || {
                let term = Term::stdout();
                let colored = term.is_term();
                let mut status = StatusLine::new(total, colored);
                let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stdout());
                if let Ok(bar_style) = ProgressStyle::with_template("{msg}") {
                    bar.set_style(bar_style);
                }
                let columns = || {
                    term.size_checked()
                        .map(|(_, cols)| cols as usize)
                        .unwrap_or(DEFAULT_COLUMNS)
                };
                loop {
                    match events.recv_timeout(REFRESH_INTERVAL) {
                        Ok(Message::Event(event)) => {
                            if let Some(line) = status.update(event) {
                                bar.println(line);
                            }
                        }
                        Ok(Message::Exit) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    bar.set_message(status.render(columns(), status.elapsed()));
                }
                bar.finish_and_clear();
            })?;
        Ok(TermView {
            queue,
            thread: Mutex::new(Some(thread)),
        })
    }
}

impl View for TermView {
    fn tell(&self, event: ViewEvent) {
        let _ = self.queue.send(Message::Event(event));
    }

    fn close(&self) {
        let _ = self.queue.send(Message::Exit);
        if let Some(thread) = lock(&self.thread).take() {
            if thread.join().is_err() {
                warn!("terminal view thread panicked");
            }
        }
    }
}

impl Drop for TermView {
    fn drop(&mut self) {
        self.close();
    }
}
