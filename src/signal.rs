//! Ctrl-C handling
//!
//! The orchestrator catches interrupt and termination signals and turns them
//! into a flag that blocking waits poll. Test processes run in their own
//! process groups, so a Ctrl-C on the terminal only reaches the orchestrator,
//! which then shuts the tests down itself.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

static INTERRUPTED: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// Shared flag raised when the user interrupts the run.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    flag: Arc<AtomicBool>,
}

impl InterruptFlag {
    /// Returns the flag connected to the process's Ctrl-C handler,
    /// installing the handler on first use.
    pub fn install() -> Result<Self> {
        if let Some(flag) = INTERRUPTED.get() {
            return Ok(InterruptFlag {
                flag: Arc::clone(flag),
            });
        }
        let flag = Arc::new(AtomicBool::new(false));
        let handler_flag = Arc::clone(&flag);
        ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst)).map_err(|e| {
            Error::Other(format!("Failed to install signal handler: {}", e))
        })?;
        let flag = INTERRUPTED.get_or_init(|| flag);
        Ok(InterruptFlag {
            flag: Arc::clone(flag),
        })
    }

    /// A flag no signal will ever raise. Useful for tests.
    pub fn noop() -> Self {
        InterruptFlag::default()
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
