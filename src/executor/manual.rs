// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::Arc;

use crate::executor::queue::{FifoQueue, RunQueue};
use crate::executor::{CurrentGuard, Entry, Executor, ExecutorRef};

/// An executor with no thread of its own.
///
/// Submissions accumulate until the host calls [`drain_once`], which runs
/// them inline on the calling thread. Intended for event loops that want to
/// cooperate with the runtime on their own schedule.
///
/// [`drain_once`]: Self::drain_once
#[derive(Debug, Default)]
pub struct ManualDrainExecutor {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    queue: FifoQueue,
}

impl Executor for Inner {
    fn enqueue(&self, entry: Entry) {
        self.queue.add(entry);
    }
}

impl ManualDrainExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// A shareable handle for `spawn_on`, `switch_to` and friends.
    pub fn handle(&self) -> ExecutorRef {
        Arc::clone(&self.inner) as ExecutorRef
    }

    /// Drain the queue inline until it is empty.
    ///
    /// The calling thread is bound to this executor for the duration, so
    /// drained tasks observe it as their current executor.
    pub fn drain_once(&self) {
        let _current = CurrentGuard::install(self.handle());
        while let Some(entry) = self.inner.queue.next() {
            entry.run();
        }
    }
}

impl Executor for ManualDrainExecutor {
    fn enqueue(&self, entry: Entry) {
        self.inner.enqueue(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn tasks_run_only_on_drain() {
        let exec = ManualDrainExecutor::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let task = {
            let counter = Arc::clone(&counter);
            crate::task::spawn_on(exec.handle(), async move {
                counter.fetch_add(1, Ordering::Relaxed);
            })
        };

        assert_eq!(counter.load(Ordering::Relaxed), 0);
        exec.drain_once();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        drop(task);
    }

    #[test]
    fn drained_tasks_observe_the_executor() {
        let exec = ManualDrainExecutor::new();

        let task = crate::task::spawn_on(exec.handle(), async {
            crate::executor::current_executor().is_some()
        });
        exec.drain_once();

        let bound = crate::executor::run_blocking(task);
        assert!(bound);
    }

    #[test]
    fn redispatch_lands_back_in_the_queue() {
        let exec = ManualDrainExecutor::new();
        let counter = Arc::new(AtomicUsize::new(0));

        drop({
            let counter = Arc::clone(&counter);
            crate::task::spawn_on(exec.handle(), async move {
                counter.fetch_add(1, Ordering::Relaxed);
                crate::ops::redispatch().await;
                counter.fetch_add(1, Ordering::Relaxed);
            })
        });

        exec.drain_once();
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }
}
