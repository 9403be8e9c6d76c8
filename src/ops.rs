// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Scheduling operations.

use core::pin::Pin;
use core::task::{Context, Poll};
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use pin_project::pin_project;

use crate::executor::{ExecutorRef, run_blocking};

/// Move the current task to `target`: at the suspension point the task's
/// entry is enqueued on `target`, and the task continues there.
///
/// Outside a spawned task (e.g. in the root of a blocking scope, which
/// cannot leave its thread) this degrades to a plain yield.
pub fn switch_to(target: ExecutorRef) -> SwitchTo {
    SwitchTo {
        target: Some(target),
    }
}

/// Future returned by [`switch_to`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct SwitchTo {
    target: Option<ExecutorRef>,
}

impl core::fmt::Debug for SwitchTo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SwitchTo")
            .field("pending", &self.target.is_some())
            .finish()
    }
}

impl Future for SwitchTo {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.target.take() {
            Some(target) => {
                crate::task::rebind_active(&target);
                // suspend once; the wake routes the entry through the
                // (re)bound executor
                cx.waker().wake_by_ref();
                Poll::Pending
            }
            None => Poll::Ready(()),
        }
    }
}

/// Yield: re-enqueue the current task on its own executor, letting
/// everything already queued there run first.
pub fn redispatch() -> Redispatch {
    Redispatch { yielded: false }
}

/// Future returned by [`redispatch`].
#[derive(Debug)]
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Redispatch {
    yielded: bool,
}

impl Future for Redispatch {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Awaits a future with the awaiter rebound to another executor first, so
/// the resumption is delivered there. Created by the `configure` methods.
#[pin_project]
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Configured<F> {
    #[pin]
    inner: F,
    target: Option<ExecutorRef>,
}

impl<F> Configured<F> {
    pub(crate) fn new(inner: F, target: ExecutorRef) -> Self {
        Self {
            inner,
            target: Some(target),
        }
    }
}

impl<F: Future> Future for Configured<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Some(target) = this.target.take() {
            crate::task::rebind_active(&target);
        }
        this.inner.poll(cx)
    }
}

/// Sequentially await every element of `futures`; the returned future
/// completes when all of them have, yielding their outputs in order.
pub async fn await_all<I>(futures: I) -> Vec<<I::Item as Future>::Output>
where
    I: IntoIterator,
    I::Item: Future,
{
    let mut outputs = Vec::new();
    for fut in futures {
        outputs.push(fut.await);
    }
    outputs
}

/// A resource with an asynchronous teardown step.
pub trait AsyncClose {
    fn close(&mut self) -> impl Future<Output = ()>;
}

/// Run `body` against `resource`, awaiting `resource.close()` on both the
/// normal and the panicking exit path.
///
/// On the normal path `close()` is awaited in place. If `body` panics, the
/// teardown still runs, inside a nested blocking scope (the current task is
/// about to unwind), and the panic is then re-raised.
pub async fn uses<R, F, Fut>(mut resource: R, body: F) -> Fut::Output
where
    R: AsyncClose,
    F: FnOnce(&mut R) -> Fut,
    Fut: Future,
{
    let result = AssertUnwindSafe(body(&mut resource)).catch_unwind().await;
    match result {
        Ok(value) => {
            resource.close().await;
            value
        }
        Err(payload) => {
            run_blocking(resource.close());
            std::panic::resume_unwind(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{SingleThreadExecutor, current_executor};
    use crate::test_util::trace_init;
    use std::panic::catch_unwind;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn switch_to_migrates_the_task() {
        let _trace = trace_init();
        let a = SingleThreadExecutor::new();
        let b = SingleThreadExecutor::new();
        let b_handle = b.handle();

        let landed = run_blocking(crate::task::spawn_on(a.handle(), async move {
            switch_to(Arc::clone(&b_handle)).await;
            Arc::ptr_eq(&current_executor().unwrap(), &b_handle)
        }));
        assert!(landed);
    }

    #[test]
    fn switch_to_outside_a_task_yields() {
        let _trace = trace_init();
        let exec = SingleThreadExecutor::new();
        // the blocking root cannot migrate; this must complete regardless
        run_blocking(switch_to(exec.handle()));
    }

    #[test]
    fn redispatch_lets_queued_work_run_first() {
        let _trace = trace_init();
        let order = Arc::new(spin::Mutex::new(Vec::new()));

        run_blocking(async {
            let exec = current_executor().unwrap();
            // the yielding task is queued first, but its redispatch lets
            // the task queued after it run ahead
            let second = {
                let order = Arc::clone(&order);
                crate::task::spawn_on(Arc::clone(&exec), async move {
                    redispatch().await;
                    order.lock().push("second");
                })
            };
            let first = {
                let order = Arc::clone(&order);
                crate::task::spawn_on(exec, async move {
                    order.lock().push("first");
                })
            };
            second.await;
            first.await;
        });

        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn await_all_completes_every_element() {
        let _trace = trace_init();
        let exec = SingleThreadExecutor::new();

        let outputs = run_blocking(async {
            let tasks: Vec<_> = (0..10)
                .map(|i| crate::task::spawn_on(exec.handle(), async move { i * 2 }))
                .collect();
            await_all(tasks).await
        });
        assert_eq!(outputs, (0..10).map(|i| i * 2).collect::<Vec<_>>());
    }

    struct Resource {
        closed: Arc<AtomicUsize>,
    }

    impl AsyncClose for Resource {
        fn close(&mut self) -> impl Future<Output = ()> {
            let closed = Arc::clone(&self.closed);
            async move {
                redispatch().await;
                closed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[test]
    fn uses_closes_on_the_normal_path() {
        let _trace = trace_init();
        let closed = Arc::new(AtomicUsize::new(0));
        let resource = Resource {
            closed: Arc::clone(&closed),
        };

        let out = run_blocking(uses(resource, |_r| async { 3 }));
        assert_eq!(out, 3);
        assert_eq!(closed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn uses_closes_on_the_panicking_path() {
        let _trace = trace_init();
        let closed = Arc::new(AtomicUsize::new(0));
        let resource = Resource {
            closed: Arc::clone(&closed),
        };

        let result = catch_unwind(AssertUnwindSafe(|| {
            run_blocking(uses(resource, |_r| async {
                panic!("body failed");
            }))
        }));
        assert!(result.is_err());
        assert_eq!(closed.load(Ordering::Relaxed), 1);
    }
}
