// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};

use bitflags::bitflags;
use static_assertions::const_assert_eq;

use crate::error::Closed;
use crate::loom::cell::UnsafeCell;
use crate::loom::sync::atomic::{AtomicUsize, Ordering};

/// A one-shot rendezvous for a single suspended task.
///
/// At most one task parks its [`Waker`] in the trigger; the producer fires
/// it once with [`pull`] (resume) or [`close`] (resume with [`Closed`]).
/// Once fired the trigger stays fired and any later [`wait`] resolves
/// immediately, so the waiter continues in place instead of suspending.
///
/// The synchronization strategy follows the atomic-waker-cell design: a
/// single state word arbitrates between the registering waiter and the
/// firing producer, and the waker slot itself is unsynchronized.
///
/// [`pull`]: Self::pull
/// [`close`]: Self::close
/// [`wait`]: Self::wait
pub struct SingleTrigger {
    state: AtomicUsize,
    waker: UnsafeCell<Option<Waker>>,
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    struct State: usize {
        const EMPTY = 0b0000;
        const REGISTERING = 0b0001;
        const WAKING = 0b0010;
        const FIRED = 0b0100;
        const CLOSED = 0b1000;
    }
}
// EMPTY must be zero
const_assert_eq!(State::EMPTY.bits(), 0);

/// Future returned from [`SingleTrigger::wait()`].
///
/// This future is fused: once it has completed, any further poll returns
/// [`Poll::Ready`] again.
#[derive(Debug)]
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Wait<'a> {
    trigger: &'a SingleTrigger,
    completed: Option<Result<(), Closed>>,
}

// === impl SingleTrigger ===

impl SingleTrigger {
    crate::loom::loom_const_fn! {
        pub fn new() -> Self {
            Self {
                state: AtomicUsize::new(State::EMPTY.bits()),
                waker: UnsafeCell::new(None),
            }
        }
    }

    /// Park the calling task until the trigger fires.
    ///
    /// Completes with `Ok(())` after [`pull`], or `Err(`[`Closed`]`)` after
    /// [`close`]. If the trigger already fired, the future completes on its
    /// first poll without registering.
    ///
    /// [`pull`]: Self::pull
    /// [`close`]: Self::close
    pub fn wait(&self) -> Wait<'_> {
        Wait {
            trigger: self,
            completed: None,
        }
    }

    /// Poll-level wait: register `cx`'s waker unless the trigger has fired.
    ///
    /// A concurrent registration by another task is resolved by yielding:
    /// the caller is woken straight back up to retry. Each trigger is meant
    /// to carry a single waiter; the retry only smooths over a waiter that
    /// is being replaced (e.g. a future moved between tasks).
    pub fn poll_wait(&self, cx: &mut Context<'_>) -> Poll<Result<(), Closed>> {
        match self.compare_exchange(State::EMPTY, State::REGISTERING, Ordering::Acquire) {
            Err(actual) if actual.contains(State::CLOSED) => {
                return Poll::Ready(Err(Closed(())));
            }
            Err(actual) if actual.contains(State::FIRED) => {
                return Poll::Ready(Ok(()));
            }
            Err(actual) if actual.contains(State::WAKING) => {
                // a pull is in flight, no point parking
                return Poll::Ready(Ok(()));
            }
            Err(_) => {
                // another task is mid-registration; yield and retry
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
            Ok(_) => {}
        }

        let waker = cx.waker();
        tracing::trace!(?waker, "registering waker");

        if let Some(prev) = self.replace_waker(waker.clone()) {
            prev.wake();
        }

        if let Err(actual) =
            self.compare_exchange(State::REGISTERING, State::EMPTY, Ordering::AcqRel)
        {
            // The trigger fired (or closed) while we were registering. Take
            // our waker back out and resolve in place.
            tracing::trace!(state = ?actual, "fired during registration");

            // Safety: the failed transition out of REGISTERING means the
            // firing thread saw our registration lock and left the slot to
            // us; no one else touches the waker now.
            let waker = self.waker.with_mut(|waker| unsafe { (*waker).take() });

            // Clear the transient bits, keeping the terminal ones.
            let state = self.fetch_and(State::CLOSED | State::FIRED, Ordering::AcqRel);
            drop(waker);

            if state.contains(State::CLOSED) {
                return Poll::Ready(Err(Closed(())));
            }
            return Poll::Ready(Ok(()));
        }

        Poll::Pending
    }

    /// Fire the trigger, resuming the parked waiter if there is one.
    ///
    /// # Panics
    ///
    /// Panics if the trigger was already pulled or closed: each trigger
    /// fires at most once.
    pub fn pull(&self) {
        assert!(
            !self.take_and_fire(false).1,
            "trigger pulled more than once"
        );
    }

    /// Fire the trigger, releasing the waiter with a [`Closed`] error.
    ///
    /// Unlike [`pull`], closing an already-fired trigger is a no-op: close
    /// is the abandonment path and naturally races with completion.
    ///
    /// [`pull`]: Self::pull
    pub fn close(&self) {
        self.take_and_fire(true);
    }

    /// Whether the trigger has fired (pulled or closed).
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.current_state()
            .intersects(State::FIRED | State::CLOSED)
    }

    /// Set the terminal bits, then take and wake the stored waker if no one
    /// else holds the slot. Returns `(woke, was_already_fired)`.
    fn take_and_fire(&self, close: bool) -> (bool, bool) {
        let mut bits = State::WAKING | State::FIRED;
        if close {
            bits |= State::CLOSED;
        }
        let state = self.fetch_or(bits, Ordering::AcqRel);

        let already = state.intersects(State::FIRED | State::CLOSED);
        if state.intersects(State::WAKING | State::REGISTERING) || already {
            // someone else owns the waker slot (or the trigger already
            // fired); the registration path observes the terminal bits and
            // resolves itself
            return (false, already);
        }

        // Safety: we won the WAKING bit, so the slot is ours.
        let waker = self.waker.with_mut(|waker| unsafe { (*waker).take() });
        self.fetch_and(!State::WAKING, Ordering::Release);

        if let Some(waker) = waker {
            tracing::trace!(?waker, close, "resuming parked waiter");
            waker.wake();
            (true, false)
        } else {
            (false, false)
        }
    }

    fn replace_waker(&self, waker: Waker) -> Option<Waker> {
        // Safety: the caller won the REGISTERING transition, so the slot is
        // not concurrently accessed.
        self.waker.with_mut(|old| unsafe {
            match &mut *old {
                Some(old) if waker.will_wake(old) => None,
                old => old.replace(waker),
            }
        })
    }

    #[inline(always)]
    fn compare_exchange(&self, curr: State, new: State, success: Ordering) -> Result<State, State> {
        self.state
            .compare_exchange(curr.bits(), new.bits(), success, Ordering::Acquire)
            .map(State::from_bits_retain)
            .map_err(State::from_bits_retain)
    }

    #[inline(always)]
    fn fetch_and(&self, state: State, order: Ordering) -> State {
        State::from_bits_retain(self.state.fetch_and(state.bits(), order))
    }

    #[inline(always)]
    fn fetch_or(&self, state: State, order: Ordering) -> State {
        State::from_bits_retain(self.state.fetch_or(state.bits(), order))
    }

    #[inline(always)]
    fn current_state(&self) -> State {
        State::from_bits_retain(self.state.load(Ordering::Acquire))
    }
}

impl Default for SingleTrigger {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: all access to the waker slot is arbitrated through the state word
unsafe impl Send for SingleTrigger {}
// Safety: all access to the waker slot is arbitrated through the state word
unsafe impl Sync for SingleTrigger {}

impl fmt::Debug for SingleTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleTrigger")
            .field("state", &self.current_state())
            .finish_non_exhaustive()
    }
}

// === impl Wait ===

impl Future for Wait<'_> {
    type Output = Result<(), Closed>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(done) = self.completed {
            return Poll::Ready(done);
        }

        let result = core::task::ready!(self.trigger.poll_wait(cx));
        self.completed = Some(result);
        Poll::Ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loom;
    use crate::loom::sync::Arc;
    use crate::loom::sync::atomic::AtomicBool;
    use futures::task::noop_waker;

    fn poll_once(trigger: &SingleTrigger) -> Poll<Result<(), Closed>> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        trigger.poll_wait(&mut cx)
    }

    #[test]
    fn trap_after_pull_resolves_immediately() {
        let trigger = SingleTrigger::new();
        trigger.pull();
        assert_eq!(poll_once(&trigger), Poll::Ready(Ok(())));
        assert!(trigger.is_fired());
    }

    #[test]
    fn trap_after_close_reports_closed() {
        let trigger = SingleTrigger::new();
        trigger.close();
        assert_eq!(poll_once(&trigger), Poll::Ready(Err(Closed(()))));
    }

    #[test]
    #[should_panic(expected = "pulled more than once")]
    fn double_pull_panics() {
        let trigger = SingleTrigger::new();
        trigger.pull();
        trigger.pull();
    }

    #[test]
    fn close_after_pull_is_noop() {
        let trigger = SingleTrigger::new();
        trigger.pull();
        trigger.close();
        assert_eq!(poll_once(&trigger), Poll::Ready(Ok(())));
    }

    #[test]
    fn concurrent_trap_and_pull_resume_exactly_once() {
        // For any interleaving of one trap and one pull, the parked task is
        // resumed exactly once; if the pull came first, the trap must not
        // suspend at all.
        loom::model(|| {
            let trigger = Arc::new(SingleTrigger::new());
            let woken = Arc::new(AtomicBool::new(false));

            let puller = {
                let trigger = Arc::clone(&trigger);
                loom::thread::spawn(move || trigger.pull())
            };

            let parked = {
                let woken = Arc::clone(&woken);
                let waker = futures::task::waker(Arc::new(TestWake(woken)));
                let mut cx = Context::from_waker(&waker);
                trigger.poll_wait(&mut cx)
            };

            puller.join().unwrap();

            match parked {
                Poll::Ready(Ok(())) => {}
                Poll::Pending => assert!(woken.load(Ordering::Acquire)),
                Poll::Ready(Err(_)) => panic!("trigger was never closed"),
            }
        });

        struct TestWake(Arc<AtomicBool>);
        impl futures::task::ArcWake for TestWake {
            fn wake_by_ref(arc_self: &Arc<Self>) {
                arc_self.0.store(true, Ordering::Release);
            }
        }
    }
}
