//! Small synchronization primitives shared by the runner and the supervisor

use crate::error::{Error, Result};
use crate::signal::InterruptFlag;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lock a mutex, carrying on with the data if another thread panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Counting semaphore bounding the number of tests in flight.
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Semaphore {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Take a permit, blocking until one is free.
    ///
    /// Gives up with [`Error::Interrupted`] once `interrupt` is raised.
    pub fn acquire(&self, interrupt: &InterruptFlag) -> Result<()> {
        let mut permits = lock(&self.permits);
        while *permits == 0 {
            if interrupt.is_set() {
                return Err(Error::Interrupted);
            }
            permits = self
                .available
                .wait_timeout(permits, POLL_INTERVAL)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        *permits -= 1;
        Ok(())
    }

    pub fn release(&self) {
        *lock(&self.permits) += 1;
        self.available.notify_one();
    }

    pub fn available(&self) -> usize {
        *lock(&self.permits)
    }
}

/// One-shot flag a thread raises when it is done, and others can wait on.
#[derive(Debug, Default)]
pub struct ExitLatch {
    done: Mutex<bool>,
    changed: Condvar,
}

impl ExitLatch {
    pub fn new() -> Self {
        ExitLatch::default()
    }

    pub fn set(&self) {
        *lock(&self.done) = true;
        self.changed.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *lock(&self.done)
    }

    /// Wait up to `timeout` for the latch. Returns whether it is set.
    pub fn wait(&self, timeout: Duration) -> bool {
        let done = lock(&self.done);
        let (done, _) = self
            .changed
            .wait_timeout_while(done, timeout, |done| !*done)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_semaphore_counts_permits() {
        let sem = Semaphore::new(2);
        let flag = InterruptFlag::noop();
        sem.acquire(&flag).unwrap();
        sem.acquire(&flag).unwrap();
        assert_eq!(sem.available(), 0);
        sem.release();
        assert_eq!(sem.available(), 1);
    }

    #[test]
    fn test_semaphore_blocks_until_release() {
        let sem = Arc::new(Semaphore::new(1));
        let flag = InterruptFlag::noop();
        sem.acquire(&flag).unwrap();

        let releaser = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(200));
                sem.release();
            })
        };
        let start = Instant::now();
        sem.acquire(&flag).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(150));
        releaser.join().unwrap();
    }

    #[test]
    fn test_semaphore_acquire_interrupted() {
        let sem = Semaphore::new(0);
        let flag = InterruptFlag::noop();
        flag.set();
        assert!(matches!(sem.acquire(&flag), Err(Error::Interrupted)));
    }

    #[test]
    fn test_exit_latch() {
        let latch = Arc::new(ExitLatch::new());
        assert!(!latch.wait(Duration::from_millis(10)));

        let setter = {
            let latch = Arc::clone(&latch);
            thread::spawn(move || latch.set())
        };
        assert!(latch.wait(Duration::from_secs(5)));
        assert!(latch.is_set());
        setter.join().unwrap();
    }
}
