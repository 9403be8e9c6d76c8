// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use std::collections::VecDeque;

use spin::Mutex;

use crate::error::Closed;
use crate::loom::sync::atomic::{AtomicU8, AtomicU64, Ordering};

const EMPTY: u8 = 0;
const FIRED: u8 = 1;
const CLOSED: u8 = 2;

/// A one-shot rendezvous for any number of suspended tasks, released in
/// first-in, first-out order.
///
/// Tasks park by polling [`wait`]; the producer fires the trigger once with
/// [`pull`] (every parked waiter resumes, in the order the waits
/// registered) or [`close`] (every waiter observes [`Closed`]). A wait that
/// starts after the trigger fired resolves immediately without parking.
///
/// The fired flag is the fast path; the waiter list is guarded by a short
/// spin lock, and a parking wait double-checks the flag under the lock so
/// no waiter can splice in after fire. Waiters are woken only after the
/// lock is released.
///
/// [`wait`]: Self::wait
/// [`pull`]: Self::pull
/// [`close`]: Self::close
pub struct FifoTrigger {
    state: AtomicU8,
    next_key: AtomicU64,
    waiters: Mutex<VecDeque<(u64, Waker)>>,
}

/// Future returned from [`FifoTrigger::wait()`].
///
/// Fused: after completion any further poll returns [`Poll::Ready`] again.
/// Dropping an uncompleted `FifoWait` forfeits its place in the release
/// order.
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct FifoWait<'a> {
    trigger: &'a FifoTrigger,
    key: Option<u64>,
    completed: Option<Result<(), Closed>>,
}

// === impl FifoTrigger ===

impl FifoTrigger {
    crate::loom::loom_const_fn! {
        pub fn new() -> Self {
            Self {
                state: AtomicU8::new(EMPTY),
                next_key: AtomicU64::new(0),
                waiters: Mutex::new(VecDeque::new()),
            }
        }
    }

    /// Park the calling task until the trigger fires.
    pub fn wait(&self) -> FifoWait<'_> {
        FifoWait {
            trigger: self,
            key: None,
            completed: None,
        }
    }

    /// Fire the trigger, resuming all parked waiters in registration order.
    ///
    /// # Panics
    ///
    /// Panics if the trigger was already pulled or closed.
    pub fn pull(&self) {
        assert!(!self.fire(FIRED), "trigger pulled more than once");
    }

    /// Fire the trigger, releasing every waiter with a [`Closed`] error.
    ///
    /// Closing an already-fired trigger is a no-op.
    pub fn close(&self) {
        self.fire(CLOSED);
    }

    /// Whether the trigger has fired (pulled or closed).
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) != EMPTY
    }

    /// Returns `true` if the trigger had already fired.
    fn fire(&self, terminal: u8) -> bool {
        let drained = {
            let mut waiters = self.waiters.lock();
            // the flag flips under the lock so no trap can splice in behind
            // the drain
            match self
                .state
                .compare_exchange(EMPTY, terminal, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => core::mem::take(&mut *waiters),
                Err(_) => return true,
            }
        };

        tracing::trace!(waiters = drained.len(), terminal, "releasing fifo chain");
        for (_, waker) in drained {
            waker.wake();
        }
        false
    }

    pub(crate) fn poll_register(
        &self,
        key: &mut Option<u64>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), Closed>> {
        // fast path: no locking once fired
        match self.state.load(Ordering::Acquire) {
            FIRED => return Poll::Ready(Ok(())),
            CLOSED => return Poll::Ready(Err(Closed(()))),
            _ => {}
        }

        let mut waiters = self.waiters.lock();
        // double-check under the lock: the trigger may have fired while we
        // were acquiring it
        match self.state.load(Ordering::Acquire) {
            FIRED => return Poll::Ready(Ok(())),
            CLOSED => return Poll::Ready(Err(Closed(()))),
            _ => {}
        }

        match *key {
            Some(key) => {
                if let Some((_, waker)) = waiters.iter_mut().find(|(k, _)| *k == key) {
                    if !waker.will_wake(cx.waker()) {
                        *waker = cx.waker().clone();
                    }
                }
            }
            None => {
                let new = self.next_key.fetch_add(1, Ordering::Relaxed);
                waiters.push_back((new, cx.waker().clone()));
                *key = Some(new);
            }
        }
        Poll::Pending
    }

    pub(crate) fn deregister(&self, key: u64) {
        if self.state.load(Ordering::Acquire) != EMPTY {
            // already drained; nothing left to unsplice
            return;
        }
        let mut waiters = self.waiters.lock();
        waiters.retain(|(k, _)| *k != key);
    }
}

impl Default for FifoTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FifoTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FifoTrigger")
            .field("fired", &self.is_fired())
            .finish_non_exhaustive()
    }
}

// === impl FifoWait ===

impl Future for FifoWait<'_> {
    type Output = Result<(), Closed>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(done) = self.completed {
            return Poll::Ready(done);
        }

        let this = &mut *self;
        let result = core::task::ready!(this.trigger.poll_register(&mut this.key, cx));
        this.completed = Some(result);
        Poll::Ready(result)
    }
}

impl Drop for FifoWait<'_> {
    fn drop(&mut self) {
        if self.completed.is_none()
            && let Some(key) = self.key
        {
            self.trigger.deregister(key);
        }
    }
}

impl fmt::Debug for FifoWait<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FifoWait")
            .field("key", &self.key)
            .field("completed", &self.completed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::pin::pin;
    use futures::task::noop_waker;
    use std::sync::Arc as StdArc;
    use std::sync::Mutex as StdMutex;

    fn ordered_waker(order: &StdArc<StdMutex<Vec<usize>>>, id: usize) -> Waker {
        struct Ordered(StdArc<StdMutex<Vec<usize>>>, usize);
        impl futures::task::ArcWake for Ordered {
            fn wake_by_ref(arc_self: &StdArc<Self>) {
                arc_self.0.lock().unwrap().push(arc_self.1);
            }
        }
        futures::task::waker(StdArc::new(Ordered(StdArc::clone(order), id)))
    }

    #[test]
    fn releases_in_registration_order() {
        let trigger = FifoTrigger::new();
        let order = StdArc::new(StdMutex::new(Vec::new()));

        let mut waits: Vec<_> = (0..5).map(|_| trigger.wait()).collect();
        for (id, wait) in waits.iter_mut().enumerate() {
            let waker = ordered_waker(&order, id);
            let mut cx = Context::from_waker(&waker);
            assert!(Pin::new(wait).poll(&mut cx).is_pending());
        }

        trigger.pull();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);

        // the chain is spent; the waits resolve on their next poll
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        for wait in &mut waits {
            assert_eq!(Pin::new(wait).poll(&mut cx), Poll::Ready(Ok(())));
        }
    }

    #[test]
    fn trap_after_fire_resolves_immediately() {
        let trigger = FifoTrigger::new();
        trigger.pull();

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut wait = pin!(trigger.wait());
        assert_eq!(wait.as_mut().poll(&mut cx), Poll::Ready(Ok(())));
    }

    #[test]
    fn close_reports_closed() {
        let trigger = FifoTrigger::new();
        let order = StdArc::new(StdMutex::new(Vec::new()));

        let mut wait = pin!(trigger.wait());
        let waker = ordered_waker(&order, 7);
        let mut cx = Context::from_waker(&waker);
        assert!(wait.as_mut().poll(&mut cx).is_pending());

        trigger.close();
        assert_eq!(*order.lock().unwrap(), vec![7]);
        assert_eq!(wait.as_mut().poll(&mut cx), Poll::Ready(Err(Closed(()))));
    }

    #[test]
    fn dropped_wait_forfeits_its_slot() {
        let trigger = FifoTrigger::new();
        let order = StdArc::new(StdMutex::new(Vec::new()));

        let mut kept = pin!(trigger.wait());
        {
            let mut dropped = pin!(trigger.wait());
            let waker = ordered_waker(&order, 0);
            let mut cx = Context::from_waker(&waker);
            assert!(dropped.as_mut().poll(&mut cx).is_pending());
        }

        let waker = ordered_waker(&order, 1);
        let mut cx = Context::from_waker(&waker);
        assert!(kept.as_mut().poll(&mut cx).is_pending());

        trigger.pull();
        assert_eq!(*order.lock().unwrap(), vec![1]);
    }

    #[test]
    #[should_panic(expected = "pulled more than once")]
    fn double_pull_panics() {
        let trigger = FifoTrigger::new();
        trigger.pull();
        trigger.pull();
    }

    #[test]
    fn five_parked_tasks_resume_in_registration_order() {
        use crate::executor::{current_executor, run_blocking};

        let _trace = crate::test_util::trace_init();
        let trigger = StdArc::new(FifoTrigger::new());
        let order = StdArc::new(StdMutex::new(Vec::new()));

        run_blocking(async {
            let exec = current_executor().unwrap();
            let tasks: Vec<_> = (0..5)
                .map(|i| {
                    let trigger = StdArc::clone(&trigger);
                    let order = StdArc::clone(&order);
                    crate::task::spawn_on(StdArc::clone(&exec), async move {
                        trigger.wait().await.unwrap();
                        order.lock().unwrap().push(i);
                    })
                })
                .collect();

            // let every task run up to its suspension point
            crate::ops::redispatch().await;
            trigger.pull();
            crate::ops::await_all(tasks).await;
        });

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }
}
