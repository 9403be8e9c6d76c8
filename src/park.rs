// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Worker parking.
//!
//! Executors rest their idle workers on a counting [`Semaphore`]: `enqueue`
//! paths post a token per claimed sleeper, workers consume one token per
//! wakeup. Tokens are never lost, so a signal raced against a worker that is
//! still on its way to sleep simply wakes it straight back up.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub(crate) struct Semaphore {
    permits: Mutex<usize>,
    cv: Condvar,
}

impl Semaphore {
    pub(crate) const fn new() -> Self {
        Self {
            permits: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    /// Post one token and wake a sleeper.
    pub(crate) fn signal(&self) {
        let mut permits = self.permits.lock().unwrap();
        *permits += 1;
        self.cv.notify_one();
    }

    /// Block until a token is available, then consume it.
    pub(crate) fn wait(&self) {
        let mut permits = self.permits.lock().unwrap();
        while *permits == 0 {
            permits = self.cv.wait(permits).unwrap();
        }
        *permits -= 1;
    }

    /// Block until a token is available or `timeout` elapses.
    ///
    /// Returns `true` if a token was consumed, `false` on timeout.
    pub(crate) fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut permits = self.permits.lock().unwrap();
        while *permits == 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self.cv.wait_timeout(permits, deadline - now).unwrap();
            permits = guard;
            if result.timed_out() && *permits == 0 {
                return false;
            }
        }
        *permits -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn signal_before_wait_is_not_lost() {
        let sem = Semaphore::new();
        sem.signal();
        sem.wait();
    }

    #[test]
    fn wait_for_times_out() {
        let sem = Semaphore::new();
        assert!(!sem.wait_for(Duration::from_millis(10)));
    }

    #[test]
    fn cross_thread_signal() {
        let sem = Arc::new(Semaphore::new());
        let sem2 = Arc::clone(&sem);

        let waiter = thread::spawn(move || {
            assert!(sem2.wait_for(Duration::from_secs(5)));
        });

        sem.signal();
        waiter.join().unwrap();
    }
}
