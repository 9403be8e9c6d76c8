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
use crate::sync::SingleTrigger;
use crate::task::value::ValueCell;

/// Spawn an eager task on the calling thread's executor.
///
/// # Panics
///
/// Panics if the calling thread is not bound to an executor.
pub fn spawn<F>(fut: F) -> Eager<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let exec = current_executor().expect("spawn requires an executor bound to this thread");
    spawn_on(exec, fut)
}

/// Spawn an eager task on `exec`.
///
/// The body starts executing immediately; the returned [`Eager`] handle
/// resolves to its result.
pub fn spawn_on<F>(exec: ExecutorRef, fut: F) -> Eager<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let state = Arc::new(EagerState {
        value: ValueCell::new(),
        done: SingleTrigger::new(),
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

    Eager { state, taken: false }
}

/// An eagerly-started task delivering its value to a single consumer.
///
/// Awaiting the handle yields the body's output (re-raising its panic if it
/// failed). Dropping the handle without awaiting it detaches the task: the
/// body still runs to completion, and its state is freed once both the body
/// and the handle have let go of it.
#[must_use = "dropping an Eager detaches the task"]
pub struct Eager<T> {
    state: Arc<EagerState<T>>,
    taken: bool,
}

struct EagerState<T> {
    value: ValueCell<T>,
    done: SingleTrigger,
}

/// Publishes the body's outcome. Firing from `Drop` covers bodies that are
/// dropped unrun (executor teardown), so the consumer can never be left
/// parked forever.
struct Completion<T> {
    state: Arc<EagerState<T>>,
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

impl<T> Eager<T> {
    /// Await this task, resuming the awaiter on `exec` instead of the
    /// executor it suspended on.
    pub fn configure(self, exec: ExecutorRef) -> Configured<Self> {
        Configured::new(self, exec)
    }
}

impl<T> Future for Eager<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        assert!(!this.taken, "eager task polled after completion");

        match core::task::ready!(this.state.done.poll_wait(cx)) {
            Ok(()) => {
                this.taken = true;
                Poll::Ready(this.state.value.take())
            }
            // the completion guard always pulls, never closes
            Err(closed) => unreachable!("result trigger closed: {closed}"),
        }
    }
}

impl<T> fmt::Debug for Eager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Eager")
            .field("done", &self.state.done.is_fired())
            .finish_non_exhaustive()
    }
}
