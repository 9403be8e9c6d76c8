// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};

use crate::executor::queue::{FifoQueue, RunQueue};
use crate::executor::{CurrentGuard, Entry, Executor};
use crate::park::Semaphore;
use crate::task::value::ValueCell;

/// Run a future to completion, commandeering the calling thread as a
/// temporary executor.
///
/// The thread is installed as the current executor, the future is started
/// as a task on a private FIFO queue, and the thread drains that queue
/// (parking when it is empty) until the task completes. Resumptions
/// enqueued from other threads (trigger pulls, timer wakeups) land in the
/// queue and are executed here.
///
/// The future's value is returned; a panic inside the future propagates to
/// the caller.
pub fn run_blocking<F: Future>(fut: F) -> F::Output {
    let inner = Arc::new(Inner {
        queue: FifoQueue::new(),
        signal: Semaphore::new(),
        parked: AtomicIsize::new(0),
        stop: AtomicBool::new(false),
    });
    let _current = CurrentGuard::install(Arc::clone(&inner) as _);
    // a blocking scope nested inside a task poll must not let its root
    // rebind the host task
    let _binding = crate::task::suspend_binding();

    // single-threaded by construction: the root only ever runs here
    let outcome = Rc::new(ValueCell::<F::Output>::new());
    let root = {
        let inner = Arc::clone(&inner);
        let outcome = Rc::clone(&outcome);
        async move {
            let value = fut.await;
            outcome.put(Ok(value));
            inner.stop.store(true, Ordering::Release);
        }
    };

    let schedule = {
        let inner = Arc::clone(&inner);
        move |runnable| inner.enqueue(Entry::new(runnable))
    };
    // Safety: the task is polled and dropped exclusively by this thread
    // (its entries only ever land in the private queue drained below), and
    // it cannot outlive `fut`'s captures: the scope does not return until
    // the task has completed, and a completed task has dropped its future.
    // Late wakeups from surviving wakers find the task completed and do
    // not resurrect an entry.
    let (runnable, task) = unsafe {
        async_task::Builder::new().spawn_unchecked(move |_: &()| root, schedule)
    };
    task.detach();
    runnable.schedule();

    tracing::trace!("entering blocking scope");
    loop {
        while let Some(entry) = inner.queue.next() {
            entry.run();
        }
        if inner.stop.load(Ordering::Acquire) && !inner.queue.has_work() {
            break;
        }
        inner.rest();
    }
    tracing::trace!("leaving blocking scope");

    outcome.take()
}

struct Inner {
    queue: FifoQueue,
    signal: Semaphore,
    parked: AtomicIsize,
    stop: AtomicBool,
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
        if self.queue.has_work() || self.stop.load(Ordering::Acquire) {
            self.wake_one();
        }
        self.signal.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::trace_init;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    #[test]
    fn trivial_value() {
        let _trace = trace_init();
        assert_eq!(run_blocking(async { 42 }), 42);
    }

    #[test]
    fn unit_value() {
        run_blocking(async {});
    }

    #[test]
    fn non_trivial_value() {
        let out = run_blocking(async { String::from("TEST") });
        assert_eq!(out, "TEST");
    }

    #[test]
    fn propagates_panics() {
        let result = catch_unwind(AssertUnwindSafe(|| {
            run_blocking(async {
                panic!("boom");
            })
        }));
        let payload = result.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));
    }

    #[test]
    fn borrows_the_callers_stack() {
        let nums = [1, 2, 3];
        let sum = run_blocking(async { nums.iter().sum::<i32>() });
        assert_eq!(sum, 6);
    }

    #[test]
    fn root_observes_the_blocking_executor() {
        let bound = run_blocking(async { crate::executor::current_executor().is_some() });
        assert!(bound);
    }

    #[test]
    fn nested_blocking_scopes() {
        let out = run_blocking(async { run_blocking(async { 5 }) + 1 });
        assert_eq!(out, 6);
    }
}
