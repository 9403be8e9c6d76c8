// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll};

use crate::error::Failure;
use crate::sync::FifoTrigger;
use crate::task::value::ValueCell;

/// A rendezvous whose state lives inside the object itself.
///
/// Unlike [`Eager`](crate::task::Eager) and [`Shared`](crate::task::Shared)
/// there is no heap state: the value store and trigger are embedded in the
/// `Lazy`, the producer fulfills it through a borrowing [`LazyPromise`],
/// and awaiters receive the value *by reference*. The borrows enforce the
/// lifecycle: the `Lazy` cannot move or die while a promise or awaiter
/// exists.
///
/// Any number of tasks may await the same `Lazy`; they are released in the
/// order they parked.
pub struct Lazy<T> {
    value: ValueCell<T>,
    done: FifoTrigger,
}

/// Producer handle for a [`Lazy`].
pub struct LazyPromise<'a, T> {
    lazy: &'a Lazy<T>,
}

/// Future returned by [`Lazy::wait`]; yields a reference to the value.
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct LazyWait<'a, T> {
    lazy: &'a Lazy<T>,
    key: Option<u64>,
    done: bool,
}

// === impl Lazy ===

impl<T> Lazy<T> {
    crate::loom::loom_const_fn! {
        pub fn new() -> Self {
            Self {
                value: ValueCell::new(),
                done: FifoTrigger::new(),
            }
        }
    }

    /// The producer-side handle. `set`/`fail` may be called once across
    /// all handles.
    pub fn promise(&self) -> LazyPromise<'_, T> {
        LazyPromise { lazy: self }
    }

    /// Park until the value is produced, then borrow it.
    pub fn wait(&self) -> LazyWait<'_, T> {
        LazyWait {
            lazy: self,
            key: None,
            done: false,
        }
    }

    /// The value, if it was already produced.
    pub fn try_get(&self) -> Option<&T> {
        self.done.is_fired().then(|| self.value.borrow())
    }
}

impl<T> Default for Lazy<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy")
            .field("done", &self.done.is_fired())
            .finish_non_exhaustive()
    }
}

// === impl LazyPromise ===

impl<T> LazyPromise<'_, T> {
    /// Store the value and release every parked awaiter.
    pub fn set(self, value: T) {
        self.lazy.value.put(Ok(value));
        self.lazy.done.pull();
    }

    /// Store a failure; awaiters re-raise it when they read.
    pub fn fail(self, failure: Failure) {
        self.lazy.value.put(Err(failure));
        self.lazy.done.pull();
    }
}

impl<T> fmt::Debug for LazyPromise<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyPromise").finish_non_exhaustive()
    }
}

// === impl LazyWait ===

impl<'a, T> Future for LazyWait<'a, T> {
    type Output = &'a T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        assert!(!this.done, "lazy wait polled after completion");

        match core::task::ready!(this.lazy.done.poll_register(&mut this.key, cx)) {
            Ok(()) => {
                this.done = true;
                Poll::Ready(this.lazy.value.borrow())
            }
            // nothing closes the embedded trigger: the `Lazy` outlives all
            // of its awaiters by construction
            Err(closed) => unreachable!("embedded trigger closed: {closed}"),
        }
    }
}

impl<T> Drop for LazyWait<'_, T> {
    fn drop(&mut self) {
        if !self.done
            && let Some(key) = self.key
        {
            self.lazy.done.deregister(key);
        }
    }
}

impl<T> fmt::Debug for LazyWait<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyWait")
            .field("key", &self.key)
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::run_blocking;
    use futures::future::join;

    #[test]
    fn set_before_wait() {
        let lazy = Lazy::new();
        lazy.promise().set(11);
        assert_eq!(run_blocking(lazy.wait()), &11);
        assert_eq!(lazy.try_get(), Some(&11));
    }

    #[test]
    fn multiple_awaiters_borrow_the_same_value() {
        let lazy = Lazy::new();

        let (a, b) = run_blocking(async {
            let waits = join(lazy.wait(), lazy.wait());
            lazy.promise().set(String::from("shared"));
            waits.await
        });
        assert!(core::ptr::eq(a, b));
        assert_eq!(a, "shared");
    }

    #[test]
    fn failure_rethrows_at_the_reader() {
        let lazy = Lazy::<u32>::new();
        lazy.promise().fail(Failure::msg("lazy boom"));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            run_blocking(lazy.wait());
        }));
        assert!(result.is_err());
    }

    #[test]
    fn try_get_is_none_until_set() {
        let lazy = Lazy::<u32>::new();
        assert!(lazy.try_get().is_none());
        lazy.promise().set(3);
        assert_eq!(lazy.try_get(), Some(&3));
    }
}
