// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Interruptible shutdown signal.
//!
//! Atomic flag for the hot checks inside worker loops, condvar for the
//! sleeps (flush debounce, health interval) so they end as soon as
//! shutdown is requested.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub(crate) struct ShutdownSignal {
    /// Lock-free copy of `stopped` for polling
    triggered: AtomicBool,
    stopped: Mutex<bool>,
    condvar: Condvar,
}

impl ShutdownSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every sleeper.
    ///
    /// Returns `false` if shutdown was already requested.
    pub(crate) fn trigger(&self) -> bool {
        let mut stopped = self.stopped.lock();
        if *stopped {
            return false;
        }
        *stopped = true;
        self.triggered.store(true, Ordering::Release);
        self.condvar.notify_all();
        true
    }

    #[inline]
    pub(crate) fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// Sleep for `timeout` or until shutdown is requested.
    ///
    /// Returns `true` if shutdown was requested.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.condvar.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_times_out() {
        let signal = ShutdownSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_trigger_wakes_sleeper() {
        let signal = Arc::new(ShutdownSignal::new());
        let sleeper = Arc::clone(&signal);
        let handle = thread::spawn(move || {
            let start = Instant::now();
            let stopped = sleeper.wait_timeout(Duration::from_secs(30));
            (stopped, start.elapsed())
        });

        thread::sleep(Duration::from_millis(20));
        assert!(signal.trigger());
        assert!(!signal.trigger());

        let (stopped, elapsed) = handle.join().unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(10));
        assert!(signal.is_triggered());
    }
}
