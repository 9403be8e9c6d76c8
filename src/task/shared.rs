// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::error::Failure;
use crate::executor::{ExecutorRef, current_executor};
use crate::ops::Configured;
use crate::sync::FifoTrigger;
use crate::task::value::ValueCell;

/// Spawn a shared task on the calling thread's executor.
///
/// # Panics
///
/// Panics if the calling thread is not bound to an executor.
pub fn spawn_shared<F>(fut: F) -> Shared<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Clone + Send + 'static,
{
    let exec = current_executor().expect("spawn_shared requires an executor bound to this thread");
    spawn_shared_on(exec, fut)
}

/// Spawn a shared task on `exec`.
///
/// The handle is clonable and may be awaited any number of times, from any
/// tasks; every await yields a clone of the value.
pub fn spawn_shared_on<F>(exec: ExecutorRef, fut: F) -> Shared<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Clone + Send + 'static,
{
    let state = Arc::new(SharedState {
        value: ValueCell::new(),
        done: FifoTrigger::new(),
    });

    let completion = Completion {
        state: Arc::clone(&state),
        armed: true,
    };
    let body = async move {
        let outcome = AssertUnwindSafe(fut).catch_unwind().await;
        completion.finish(outcome.map_err(Failure::new));
    };
    crate::task::spawn_raw(exec, body);

    Shared { state }
}

/// An eagerly-started task with shared ownership of its result.
///
/// All clones reference the same state; current and future awaiters are
/// woken by the same fire, in the order they parked.
#[must_use = "dropping every Shared handle makes the result unobservable"]
pub struct Shared<T> {
    state: Arc<SharedState<T>>,
}

struct SharedState<T> {
    value: ValueCell<T>,
    done: FifoTrigger,
}

struct Completion<T> {
    state: Arc<SharedState<T>>,
    armed: bool,
}

impl<T> Completion<T> {
    fn finish(mut self, outcome: Result<T, Failure>) {
        self.armed = false;
        self.state.value.put(outcome);
        self.state.done.pull();
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if self.armed {
            self.state
                .value
                .put(Err(Failure::msg("task dropped before completion")));
            self.state.done.pull();
        }
    }
}

impl<T: Clone> Shared<T> {
    /// Await the task's value without consuming the handle.
    pub fn wait(&self) -> SharedWait<T> {
        SharedWait {
            state: Arc::clone(&self.state),
            key: None,
            done: false,
        }
    }

    /// Await this task, resuming the awaiter on `exec` instead of the
    /// executor it suspended on.
    pub fn configure(&self, exec: ExecutorRef) -> Configured<SharedWait<T>> {
        Configured::new(self.wait(), exec)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone> IntoFuture for Shared<T> {
    type Output = T;
    type IntoFuture = SharedWait<T>;

    fn into_future(self) -> SharedWait<T> {
        self.wait()
    }
}

impl<T> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("done", &self.state.done.is_fired())
            .finish_non_exhaustive()
    }
}

/// Future returned by [`Shared::wait`]; yields a clone of the task's value.
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct SharedWait<T> {
    state: Arc<SharedState<T>>,
    key: Option<u64>,
    done: bool,
}

impl<T: Clone> Future for SharedWait<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        assert!(!this.done, "shared wait polled after completion");

        match core::task::ready!(this.state.done.poll_register(&mut this.key, cx)) {
            Ok(()) => {
                this.done = true;
                Poll::Ready(this.state.value.clone_out())
            }
            // the completion guard always pulls, never closes
            Err(closed) => unreachable!("result trigger closed: {closed}"),
        }
    }
}

impl<T> Drop for SharedWait<T> {
    fn drop(&mut self) {
        if !self.done
            && let Some(key) = self.key
        {
            self.state.done.deregister(key);
        }
    }
}

impl<T> fmt::Debug for SharedWait<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedWait")
            .field("key", &self.key)
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::run_blocking;
    use crate::test_util::trace_init;

    #[test]
    fn two_consumers_observe_the_same_value() {
        let _trace = trace_init();
        let exec = crate::executor::SingleThreadExecutor::new();

        let shared = spawn_shared_on(exec.handle(), async { 7 });
        let other = shared.clone();

        let (a, b) = run_blocking(async move {
            let first = crate::task::spawn_on(
                crate::executor::current_executor().unwrap(),
                async move { other.await },
            );
            let second = shared.wait().await;
            (first.await, second)
        });
        assert_eq!((a, b), (7, 7));
    }

    #[test]
    fn value_can_be_awaited_many_times() {
        let _trace = trace_init();
        let exec = crate::executor::SingleThreadExecutor::new();

        let shared = spawn_shared_on(exec.handle(), async { String::from("many") });
        let out = run_blocking(async {
            let first = shared.wait().await;
            let second = shared.wait().await;
            format!("{first}-{second}")
        });
        assert_eq!(out, "many-many");
    }

    #[test]
    fn panic_reaches_every_consumer_as_failure() {
        let _trace = trace_init();
        let exec = crate::executor::SingleThreadExecutor::new();

        let shared = spawn_shared_on::<_>(exec.handle(), async {
            panic!("shared boom");
        });

        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            run_blocking(shared.wait());
        }));
        assert!(result.is_err());
    }
}
