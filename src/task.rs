// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Task shapes.
//!
//! [`spawn`]/[`spawn_on`] start an [`Eager`] task: the body begins executing
//! right away and the handle represents its future result. [`spawn_shared`]
//! starts a [`Shared`] task whose clonable handle can be awaited any number
//! of times. [`Lazy`] keeps its state inside the object itself and delivers
//! its value by reference. The promise pairs [`value_future`] and
//! [`shared_future`] expose the same machinery without a task body.
//!
//! Every spawned task records the executor it belongs to in a *binding*.
//! Waking the task re-enqueues it through the binding, so a resumption
//! always lands on the task's recorded executor. Rebinding (see
//! [`switch_to`](crate::ops::switch_to) and `configure`) is how a task
//! migrates.

mod eager;
pub(crate) mod future;
mod lazy;
mod shared;
pub(crate) mod value;

use std::cell::RefCell;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_task::Runnable;
use pin_project::pin_project;

use crate::executor::{Entry, ExecutorRef};

pub use eager::{Eager, spawn, spawn_on};
pub use future::{SharedFuture, SharedPromise, ValueFuture, ValuePromise, shared_future, value_future};
pub use lazy::{Lazy, LazyPromise, LazyWait};
pub use shared::{Shared, SharedWait, spawn_shared, spawn_shared_on};

/// The executor a task resumes on. Shared between the task's wakers and the
/// operations that rebind it.
pub(crate) struct Binding {
    exec: spin::Mutex<ExecutorRef>,
}

impl Binding {
    pub(crate) fn new(exec: ExecutorRef) -> Self {
        Self {
            exec: spin::Mutex::new(exec),
        }
    }

    pub(crate) fn rebind(&self, exec: ExecutorRef) {
        *self.exec.lock() = exec;
    }

    fn dispatch(&self, runnable: Runnable) {
        let exec = self.exec.lock().clone();
        exec.enqueue(Entry::new(runnable));
    }
}

thread_local! {
    /// The binding of the task currently being polled on this thread.
    static ACTIVE: RefCell<Option<Arc<Binding>>> = const { RefCell::new(None) };
}

/// Rebind the currently running task to `exec`.
///
/// Returns `false` when the caller is not running inside a spawned task
/// (e.g. the root of a blocking scope, which cannot migrate).
pub(crate) fn rebind_active(exec: &ExecutorRef) -> bool {
    ACTIVE.with(|active| match &*active.borrow() {
        Some(binding) => {
            binding.rebind(Arc::clone(exec));
            true
        }
        None => false,
    })
}

/// Clears the active binding for the duration of a nested blocking scope:
/// its root is pinned to the scope's thread and must not rebind the task
/// that hosts the scope.
pub(crate) struct SuspendedBinding {
    prev: Option<Arc<Binding>>,
}

pub(crate) fn suspend_binding() -> SuspendedBinding {
    SuspendedBinding {
        prev: ACTIVE.with(|active| active.borrow_mut().take()),
    }
}

impl Drop for SuspendedBinding {
    fn drop(&mut self) {
        let prev = self.prev.take();
        ACTIVE.with(|active| *active.borrow_mut() = prev);
    }
}

/// Wraps a task body so its binding is observable while it is polled.
#[pin_project]
pub(crate) struct Bound<F> {
    #[pin]
    inner: F,
    binding: Arc<Binding>,
}

impl<F> Bound<F> {
    pub(crate) fn new(inner: F, binding: Arc<Binding>) -> Self {
        Self { inner, binding }
    }
}

impl<F: Future> Future for Bound<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        struct Restore(Option<Arc<Binding>>);
        impl Drop for Restore {
            fn drop(&mut self) {
                let prev = self.0.take();
                ACTIVE.with(|active| *active.borrow_mut() = prev);
            }
        }

        let this = self.project();
        let prev = ACTIVE.with(|active| {
            active
                .borrow_mut()
                .replace(Arc::clone(this.binding))
        });
        let _restore = Restore(prev);
        this.inner.poll(cx)
    }
}

/// Allocate and immediately enqueue a task running `body` on `exec`.
///
/// The task handle is detached; completion is observed through whatever
/// state `body` captures.
pub(crate) fn spawn_raw<F>(exec: ExecutorRef, body: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let binding = Arc::new(Binding::new(exec));
    let schedule = {
        let binding = Arc::clone(&binding);
        move |runnable| binding.dispatch(runnable)
    };
    let (runnable, task) = async_task::spawn(Bound::new(body, binding), schedule);
    task.detach();
    runnable.schedule();
}
