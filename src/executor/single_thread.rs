// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::thread;

use crate::executor::queue::{FifoQueue, RunQueue};
use crate::executor::{CurrentGuard, Entry, Executor, ExecutorRef};
use crate::park::Semaphore;

/// An executor owning exactly one worker thread and a FIFO queue.
///
/// Dropping the executor shuts it down in order: a stop task is enqueued
/// behind everything already submitted, the worker observes it after
/// draining, and the destructor joins the thread.
#[derive(Debug)]
pub struct SingleThreadExecutor {
    inner: Arc<Inner>,
    thread: Option<thread::JoinHandle<()>>,
}

#[derive(Debug)]
struct Inner {
    queue: FifoQueue,
    signal: Semaphore,
    parked: AtomicIsize,
    running: AtomicBool,
}

impl Executor for Inner {
    fn enqueue(&self, entry: Entry) {
        self.queue.add(entry);
        self.wake_one();
    }
}

impl Inner {
    fn wake_one(&self) {
        loop {
            let parked = self.parked.load(Ordering::Acquire);
            if parked <= 0 {
                return;
            }
            if self
                .parked
                .compare_exchange(parked, parked - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.signal.signal();
                return;
            }
        }
    }

    fn rest(&self) {
        self.parked.fetch_add(1, Ordering::AcqRel);
        if self.queue.has_work() || !self.running.load(Ordering::Acquire) {
            // a submission may have raced our way into sleep without seeing
            // the parked count; wake one worker (possibly ourselves) so it
            // cannot stall
            self.wake_one();
        }
        self.signal.wait();
    }

    fn run(self: Arc<Self>) {
        let _span = tracing::debug_span!("single-thread worker").entered();
        let exec: ExecutorRef = Arc::clone(&self) as ExecutorRef;
        let _current = CurrentGuard::install(exec);

        while self.running.load(Ordering::Acquire) {
            while let Some(entry) = self.queue.next() {
                entry.run();
            }
            if self.running.load(Ordering::Acquire) {
                self.rest();
            }
        }
        tracing::debug!("single-thread worker exiting");
    }
}

impl SingleThreadExecutor {
    pub fn new() -> Self {
        let inner = Arc::new(Inner {
            queue: FifoQueue::new(),
            signal: Semaphore::new(),
            parked: AtomicIsize::new(0),
            running: AtomicBool::new(true),
        });

        let worker = Arc::clone(&inner);
        let thread = thread::Builder::new()
            .name("spindle-worker".into())
            .spawn(move || worker.run())
            .expect("failed to spawn executor thread");

        Self {
            inner,
            thread: Some(thread),
        }
    }

    /// A shareable handle for `spawn_on`, `switch_to` and friends.
    pub fn handle(&self) -> ExecutorRef {
        Arc::clone(&self.inner) as ExecutorRef
    }
}

impl Default for SingleThreadExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for SingleThreadExecutor {
    fn enqueue(&self, entry: Entry) {
        self.inner.enqueue(entry);
    }
}

impl Drop for SingleThreadExecutor {
    fn drop(&mut self) {
        let inner = Arc::clone(&self.inner);
        // runs after everything already in the queue
        drop(crate::task::spawn_on(self.handle(), async move {
            inner.running.store(false, Ordering::Release);
        }));
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::trace_init;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn runs_submitted_tasks() {
        let _trace = trace_init();
        let counter = Arc::new(AtomicUsize::new(0));

        let exec = SingleThreadExecutor::new();
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let counter = Arc::clone(&counter);
                crate::task::spawn_on(exec.handle(), async move {
                    counter.fetch_add(1, Ordering::Relaxed);
                })
            })
            .collect();

        crate::executor::run_blocking(async move {
            for task in tasks {
                task.await;
            }
        });
        assert_eq!(counter.load(Ordering::Relaxed), 16);
    }

    #[test]
    fn shutdown_drains_queue_first() {
        let _trace = trace_init();
        let counter = Arc::new(AtomicUsize::new(0));

        let exec = SingleThreadExecutor::new();
        for _ in 0..64 {
            let counter = Arc::clone(&counter);
            drop(crate::task::spawn_on(exec.handle(), async move {
                // a little suspension so the queue is not empty at drop time
                crate::ops::redispatch().await;
                counter.fetch_add(1, Ordering::Relaxed);
            }));
        }
        drop(exec);

        assert_eq!(counter.load(Ordering::Relaxed), 64);
    }

    #[test]
    fn worker_thread_is_bound_to_executor() {
        let _trace = trace_init();
        let exec = SingleThreadExecutor::new();
        let handle = exec.handle();

        let bound = crate::executor::run_blocking({
            let handle = Arc::clone(&handle);
            async move {
                let task = crate::task::spawn_on(Arc::clone(&handle), async move {
                    crate::executor::current_executor().is_some()
                });
                task.await
            }
        });
        assert!(bound);

        // the worker parks and wakes back up for late submissions
        std::thread::sleep(Duration::from_millis(20));
        let late = crate::executor::run_blocking(async move {
            crate::task::spawn_on(handle, async move { 7 }).await
        });
        assert_eq!(late, 7);
    }
}
