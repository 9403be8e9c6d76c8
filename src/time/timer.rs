// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use spin::Mutex;

use crate::park::Semaphore;
use crate::sync::SingleTrigger;
use crate::time::sleep::Sleep;

/// A delay service: one thread, one deadline-ordered heap.
///
/// Producers push `(deadline, trigger)` entries; the service thread pulls
/// each trigger once its deadline passes, which resumes the sleeping task
/// through its recorded executor. The thread is only signalled when the
/// earliest deadline changes, otherwise it sleeps until the current top
/// expires. Entries with equal deadlines are dispatched in arbitrary order.
#[derive(Debug)]
pub struct Timer {
    shared: Arc<Shared>,
    thread: Option<thread::JoinHandle<()>>,
}

#[derive(Debug)]
pub(crate) struct Shared {
    heap: Mutex<BinaryHeap<Sleeper>>,
    signal: Semaphore,
    stop: AtomicBool,
}

struct Sleeper {
    deadline: Instant,
    trigger: Arc<SingleTrigger>,
}

// earliest deadline on top
impl Ord for Sleeper {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.deadline.cmp(&self.deadline)
    }
}

impl PartialOrd for Sleeper {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Sleeper {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}

impl Eq for Sleeper {}

impl core::fmt::Debug for Sleeper {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Sleeper")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

// === impl Timer ===

impl Timer {
    /// Start a timer with its own service thread.
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            heap: Mutex::new(BinaryHeap::new()),
            signal: Semaphore::new(),
            stop: AtomicBool::new(false),
        });

        let worker = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("spindle-timer".into())
            .spawn(move || worker.run())
            .expect("failed to spawn timer thread");

        Self {
            shared,
            thread: Some(thread),
        }
    }

    /// The process-wide timer, started on first use.
    ///
    /// Its service thread is never joined; at process exit any outstanding
    /// entries are simply not woken.
    pub fn global() -> &'static Timer {
        static GLOBAL: OnceLock<Timer> = OnceLock::new();
        GLOBAL.get_or_init(Timer::new)
    }

    /// Wait until `duration` has elapsed.
    pub fn sleep(&self, duration: Duration) -> Sleep<'_> {
        self.sleep_until(Instant::now() + duration)
    }

    /// Wait until `deadline` has been reached.
    pub fn sleep_until(&self, deadline: Instant) -> Sleep<'_> {
        Sleep::new(self, deadline)
    }

    /// Park `trigger` until `deadline`; the service thread pulls it then.
    pub(crate) fn register(&self, deadline: Instant, trigger: Arc<SingleTrigger>) {
        self.shared.add(Sleeper { deadline, trigger });
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.signal.signal();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

// === impl Shared ===

impl Shared {
    fn add(&self, sleeper: Sleeper) {
        let wake = {
            let mut heap = self.heap.lock();
            let earlier = match heap.peek() {
                None => true,
                Some(top) => sleeper.deadline < top.deadline,
            };
            heap.push(sleeper);
            earlier
        };
        // only a new earliest deadline changes what the thread waits for
        if wake {
            self.signal.signal();
        }
    }

    fn run(self: Arc<Self>) {
        let _span = tracing::debug_span!("timer service").entered();

        loop {
            if self.stop.load(Ordering::Acquire) {
                break;
            }

            let mut heap = self.heap.lock();
            match heap.peek() {
                None => {
                    drop(heap);
                    self.signal.wait();
                }
                Some(top) => {
                    let now = Instant::now();
                    if now >= top.deadline {
                        let sleeper = heap.pop().expect("peeked entry vanished");
                        drop(heap);
                        tracing::trace!(deadline = ?sleeper.deadline, "deadline expired");
                        sleeper.trigger.pull();
                    } else {
                        let timeout = top.deadline - now;
                        drop(heap);
                        self.signal.wait_for(timeout);
                    }
                }
            }
        }
        tracing::debug!("timer service exiting");
    }
}
