//! Scoped single-shot alarm

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Runs an action once if it is still armed after a timeout.
///
/// Dropping the guard disarms it. The action never runs after the guard is
/// dropped, and runs at most once.
pub struct TimeoutGuard {
    disarm: Option<Sender<()>>,
    timer: Option<JoinHandle<()>>,
    fired: Arc<AtomicBool>,
}

impl TimeoutGuard {
    pub fn arm<F>(timeout: Duration, on_expiry: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (disarm, disarmed) = bounded::<()>(0);
        let fired = Arc::new(AtomicBool::new(false));
        let timer = {
            let fired = Arc::clone(&fired);
            thread::Builder::new()
                .name("timeout".to_string())
                .spawn(move || {
                    if let Err(RecvTimeoutError::Timeout) = disarmed.recv_timeout(timeout) {
                        fired.store(true, Ordering::SeqCst);
                        on_expiry();
                    }
                })?
        };
        Ok(TimeoutGuard {
            disarm: Some(disarm),
            timer: Some(timer),
            fired,
        })
    }

    /// Whether the alarm went off.
    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        // Closing the channel wakes the timer thread up.
        self.disarm.take();
        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }
    }
}
