// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Promise/future pairs: the task shapes without a task body.
//!
//! [`value_future`] pairs a single-consumer [`ValueFuture`] with a
//! [`ValuePromise`]; [`shared_future`] pairs a clonable [`SharedFuture`]
//! (value delivered by copy) with a clonable [`SharedPromise`]. The
//! reference-returning member of the family is [`Lazy`](crate::task::Lazy),
//! whose state is embedded rather than shared.

use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::sync::Arc;

use crate::error::Failure;
use crate::executor::ExecutorRef;
use crate::ops::Configured;
use crate::sync::{FifoTrigger, SingleTrigger};
use crate::task::value::ValueCell;

/// Create a single-consumer promise/future pair.
///
/// The future resolves to the promised value; the promise side may fulfil
/// it from any thread or task.
pub fn value_future<T>() -> (ValuePromise<T>, ValueFuture<T>) {
    let inner = Arc::new(ValueInner {
        value: ValueCell::new(),
        done: SingleTrigger::new(),
    });
    (
        ValuePromise {
            inner: Some(Arc::clone(&inner)),
        },
        ValueFuture { inner, taken: false },
    )
}

/// Create a multi-consumer promise/future pair.
///
/// Both sides are clonable; every await on (a clone of) the future yields a
/// clone of the promised value.
pub fn shared_future<T: Clone>() -> (SharedPromise<T>, SharedFuture<T>) {
    let inner = Arc::new(SharedInner {
        value: ValueCell::new(),
        done: FifoTrigger::new(),
    });
    (
        SharedPromise {
            inner: Arc::clone(&inner),
            token: Arc::new(PromiseToken {
                inner: Arc::clone(&inner),
            }),
        },
        SharedFuture {
            inner,
            key: None,
            done: false,
        },
    )
}

struct ValueInner<T> {
    value: ValueCell<T>,
    done: SingleTrigger,
}

struct SharedInner<T> {
    value: ValueCell<T>,
    done: FifoTrigger,
}

// === impl ValuePromise ===

/// Producer side of [`value_future`].
///
/// Dropping the promise without fulfilling it closes the rendezvous; the
/// consumer then panics rather than staying parked forever.
pub struct ValuePromise<T> {
    inner: Option<Arc<ValueInner<T>>>,
}

impl<T> ValuePromise<T> {
    /// Fulfil the promise with a value.
    pub fn set(mut self, value: T) {
        let inner = self.inner.take().expect("promise already consumed");
        inner.value.put(Ok(value));
        inner.done.pull();
    }

    /// Fulfil the promise with a failure, re-raised at the awaiter.
    pub fn fail(mut self, failure: Failure) {
        let inner = self.inner.take().expect("promise already consumed");
        inner.value.put(Err(failure));
        inner.done.pull();
    }
}

impl<T> Drop for ValuePromise<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.done.close();
        }
    }
}

impl<T> fmt::Debug for ValuePromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValuePromise")
            .field("pending", &self.inner.is_some())
            .finish()
    }
}

// === impl ValueFuture ===

/// Consumer side of [`value_future`]; yields the promised value exactly
/// once.
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct ValueFuture<T> {
    inner: Arc<ValueInner<T>>,
    taken: bool,
}

impl<T> ValueFuture<T> {
    /// Await the promise, resuming the awaiter on `exec` instead of the
    /// executor it suspended on.
    pub fn configure(self, exec: ExecutorRef) -> Configured<Self> {
        Configured::new(self, exec)
    }
}

impl<T> Future for ValueFuture<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        assert!(!this.taken, "value future polled after completion");

        match core::task::ready!(this.inner.done.poll_wait(cx)) {
            Ok(()) => {
                this.taken = true;
                Poll::Ready(this.inner.value.take())
            }
            Err(_) => panic!("promise dropped without completing"),
        }
    }
}

impl<T> fmt::Debug for ValueFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueFuture")
            .field("done", &self.inner.done.is_fired())
            .finish_non_exhaustive()
    }
}

// === impl SharedPromise ===

/// Tracks the last promise clone so an unfulfilled promise closes the
/// rendezvous instead of leaving consumers parked.
struct PromiseToken<T> {
    inner: Arc<SharedInner<T>>,
}

impl<T> Drop for PromiseToken<T> {
    fn drop(&mut self) {
        self.inner.done.close();
    }
}

/// Producer side of [`shared_future`]. Clonable; `set`/`fail` may be called
/// once across all clones.
pub struct SharedPromise<T> {
    inner: Arc<SharedInner<T>>,
    token: Arc<PromiseToken<T>>,
}

impl<T> SharedPromise<T> {
    /// Fulfil the promise with a value, waking all current and future
    /// awaiters.
    ///
    /// # Panics
    ///
    /// Panics if another clone already fulfilled it.
    pub fn set(self, value: T) {
        self.inner.value.put(Ok(value));
        self.inner.done.pull();
    }

    /// Fulfil the promise with a failure, re-raised at every awaiter.
    pub fn fail(self, failure: Failure) {
        self.inner.value.put(Err(failure));
        self.inner.done.pull();
    }
}

impl<T> Clone for SharedPromise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            token: Arc::clone(&self.token),
        }
    }
}

impl<T> fmt::Debug for SharedPromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedPromise").finish_non_exhaustive()
    }
}

// === impl SharedFuture ===

/// Consumer side of [`shared_future`]; clonable, yields a clone of the
/// promised value.
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct SharedFuture<T> {
    inner: Arc<SharedInner<T>>,
    key: Option<u64>,
    done: bool,
}

impl<T: Clone> SharedFuture<T> {
    /// Await the promise, resuming the awaiter on `exec` instead of the
    /// executor it suspended on.
    pub fn configure(&self, exec: ExecutorRef) -> Configured<Self> {
        Configured::new(self.clone(), exec)
    }
}

impl<T> Clone for SharedFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            key: None,
            done: false,
        }
    }
}

impl<T: Clone> Future for SharedFuture<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        assert!(!this.done, "shared future polled after completion");

        match core::task::ready!(this.inner.done.poll_register(&mut this.key, cx)) {
            Ok(()) => {
                this.done = true;
                Poll::Ready(this.inner.value.clone_out())
            }
            Err(_) => panic!("promise dropped without completing"),
        }
    }
}

impl<T> Drop for SharedFuture<T> {
    fn drop(&mut self) {
        if !self.done
            && let Some(key) = self.key
        {
            self.inner.done.deregister(key);
        }
    }
}

impl<T> fmt::Debug for SharedFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedFuture")
            .field("done", &self.inner.done.is_fired())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::run_blocking;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    #[test]
    fn value_promise_set_then_await() {
        let (promise, fut) = value_future();
        promise.set(9);
        assert_eq!(run_blocking(fut), 9);
    }

    #[test]
    fn value_promise_resolves_a_parked_awaiter() {
        run_blocking(async {
            let (promise, fut) = value_future();
            let exec = crate::executor::current_executor().unwrap();
            let task = crate::task::spawn_on(exec, async move { fut.await });
            promise.set(String::from("later"));
            assert_eq!(task.await, "later");
        });
    }

    #[test]
    fn value_promise_failure_rethrows() {
        let (promise, fut) = value_future::<u32>();
        promise.fail(Failure::msg("promised boom"));

        let result = catch_unwind(AssertUnwindSafe(|| run_blocking(fut)));
        assert!(result.is_err());
    }

    #[test]
    fn dropped_value_promise_panics_the_awaiter() {
        let (promise, fut) = value_future::<u32>();
        drop(promise);

        let result = catch_unwind(AssertUnwindSafe(|| run_blocking(fut)));
        assert!(result.is_err());
    }

    #[test]
    fn shared_promise_fans_out_by_copy() {
        let (promise, fut) = shared_future();
        let other = fut.clone();
        promise.set(vec![1, 2, 3]);

        let (a, b) = run_blocking(async move { (fut.await, other.await) });
        assert_eq!(a, b);
        assert_eq!(a, vec![1, 2, 3]);
    }

    #[test]
    fn shared_promise_clones_share_one_fulfilment() {
        let (promise, fut) = shared_future::<u8>();
        let other_promise = promise.clone();
        drop(other_promise);
        // dropping a clone must not close the rendezvous
        promise.set(5);
        assert_eq!(run_blocking(fut), 5);
    }
}
