//! testframework - A concurrent runner for native test suites
//!
//! Tests are external commands, named by dotted paths (`unit.alloc`,
//! `stress.mmap`) and declared in a `.testf.conf` manifest. Every test runs
//! in its own process group with its own results directory, under a timeout,
//! with a bounded number of tests in flight at once.
//!
//! # Architecture
//!
//! The library is organized into several key modules:
//!
//! - [`suite`]: The test hierarchy and the leaf test kinds
//! - [`config`]: `.testf.conf` manifest parsing and configuration values
//! - [`filter`]: Selection of tests by name, group or predicate
//! - [`supervisor`]: One child process per test, its timeout and kill ladder
//! - [`runner`]: Scheduling of test instances under a concurrency limit
//! - [`view`]: Live progress reporting on the terminal
//! - [`commands`]: All user-facing commands (run, list, groups, load)
//! - [`ui`]: User interface abstraction for output
//! - [`error`]: Error types and Result alias
//!
//! # Results Format
//!
//! Each run creates a timestamped directory under the results root holding
//! one directory per test instance (`name`, or `name.N` when repeated):
//!
//! - `description`: What was run
//! - `stdout`, `stderr`: Captured output
//! - `fail_message`: Present only if the test did not pass
//! - `killed`: Present only if the run was aborted while the test ran
//!
//! # Example
//!
//! ```no_run
//! use testframework::commands::{Command, RunCommand};
//! use testframework::ui::UI;
//!
//! # fn main() -> testframework::error::Result<()> {
//! struct SimpleUI;
//! impl UI for SimpleUI {
//!     fn output(&mut self, msg: &str) -> testframework::error::Result<()> {
//!         println!("{}", msg);
//!         Ok(())
//!     }
//!     fn error(&mut self, msg: &str) -> testframework::error::Result<()> {
//!         eprintln!("Error: {}", msg);
//!         Ok(())
//!     }
//!     fn warning(&mut self, msg: &str) -> testframework::error::Result<()> {
//!         eprintln!("Warning: {}", msg);
//!         Ok(())
//!     }
//! }
//!
//! let mut cmd = RunCommand::new(Some(".".to_string()));
//! cmd.filters = vec!["unit".to_string(), "!unit.slow".to_string()];
//! cmd.jobs = Some(4);
//! let code = cmd.execute(&mut SimpleUI)?;
//! std::process::exit(code);
//! # }
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod filter;
pub mod runner;
pub mod signal;
pub mod suite;
pub mod supervisor;
pub mod sync;
pub mod ui;
pub mod view;

pub use error::{Error, Result};
