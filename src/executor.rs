// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Executors: objects that own a task queue and the thread(s) draining it.
//!
//! An executor receives ready-to-run [`Entry`]s through [`Executor::enqueue`]
//! and resumes them on one of the threads it owns. Each worker thread binds
//! itself to its executor through a thread-local slot for the duration of
//! its loop, so that code running on it can ask "where am I?" with
//! [`current_executor`]. That binding is what makes "resume where you were"
//! the default for suspended tasks.

mod bag;
mod block_on;
mod manual;
mod queue;
mod scaling;
mod single_thread;

use core::fmt;
use std::cell::RefCell;
use std::sync::Arc;

use async_task::Runnable;

pub use bag::BagQueue;
pub use block_on::run_blocking;
pub use manual::ManualDrainExecutor;
pub use queue::{FifoQueue, RunQueue};
pub use scaling::{ScalingExecutor, scaling_bag, scaling_fifo};
pub use single_thread::SingleThreadExecutor;

/// A ready-to-run resumption of a suspended task.
///
/// Entries are opaque and relocatable; [`run`](Self::run) resumes the task
/// until its next suspension point, dropping an entry destroys it.
pub struct Entry {
    runnable: Runnable,
}

impl Entry {
    pub(crate) fn new(runnable: Runnable) -> Self {
        Self { runnable }
    }

    /// Resume the task until it completes or suspends again.
    pub fn run(self) {
        self.runnable.run();
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry").finish_non_exhaustive()
    }
}

/// A pluggable task scheduler.
pub trait Executor: Send + Sync {
    /// Place a ready entry into the queue and wake one worker.
    fn enqueue(&self, entry: Entry);
}

/// Shared handle to an executor.
pub type ExecutorRef = Arc<dyn Executor>;

thread_local! {
    static CURRENT: RefCell<Option<ExecutorRef>> = const { RefCell::new(None) };
}

/// The executor that owns the calling thread, if any.
///
/// Worker threads install their executor on entry and clear it on exit;
/// threads not owned by any executor observe `None`.
pub fn current_executor() -> Option<ExecutorRef> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Installs `exec` as the calling thread's executor, restoring the previous
/// binding on drop.
pub(crate) struct CurrentGuard {
    prev: Option<ExecutorRef>,
}

impl CurrentGuard {
    pub(crate) fn install(exec: ExecutorRef) -> Self {
        let prev = CURRENT.with(|current| current.borrow_mut().replace(exec));
        Self { prev }
    }
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT.with(|current| *current.borrow_mut() = prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;
    impl Executor for Nop {
        fn enqueue(&self, _entry: Entry) {}
    }

    #[test]
    fn current_slot_installs_and_restores() {
        assert!(current_executor().is_none());

        let exec: ExecutorRef = Arc::new(Nop);
        {
            let _guard = CurrentGuard::install(exec.clone());
            assert!(current_executor().is_some());

            let inner: ExecutorRef = Arc::new(Nop);
            {
                let _guard = CurrentGuard::install(inner.clone());
                assert!(Arc::ptr_eq(&current_executor().unwrap(), &inner));
            }
            assert!(Arc::ptr_eq(&current_executor().unwrap(), &exec));
        }
        assert!(current_executor().is_none());
    }
}
