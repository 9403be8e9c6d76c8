// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::ops::{Deref, DerefMut};
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::loom::cell::UnsafeCell;
use crate::loom::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// An async mutex with FIFO-fair handoff.
///
/// The state word has three logical values: unlocked, locked-no-waiters,
/// or the head pointer of a LIFO stack of waiters that
/// arrived while the lock was held. On unlock, a non-empty stack is
/// captured in one atomic exchange and reversed into a private FIFO queue
/// owned by the lock holder, so acquisitions are served fairly across
/// batches: LIFO within the racing window, made fair by the reversal.
///
/// Unlocking with a waiter present transfers ownership directly to that
/// waiter; the lock is never observable as released in between.
pub struct Mutex<T> {
    /// `UNLOCKED`, `LOCKED`, or a `Waiter` stack head pointer.
    state: AtomicUsize,
    /// Waiters already captured and reversed, oldest first. Only the lock
    /// holder touches this.
    captured: UnsafeCell<VecDeque<Arc<Waiter>>>,
    data: UnsafeCell<T>,
}

const LOCKED: usize = 0;
const UNLOCKED: usize = 1;

const WAITING: u8 = 0;
const GRANTED: u8 = 1;
const CANCELLED: u8 = 2;

struct Waiter {
    state: AtomicU8,
    waker: spin::Mutex<Option<Waker>>,
    /// Link to the next (older) stack entry; written before the publishing
    /// compare-exchange, read only after capturing the stack.
    next: AtomicUsize,
}

/// Future returned by [`Mutex::lock()`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Lock<'a, T> {
    mutex: &'a Mutex<T>,
    waiter: Option<Arc<Waiter>>,
}

/// Releases the mutex on drop.
#[must_use = "the mutex unlocks immediately if the guard is dropped"]
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

// === impl Mutex ===

impl<T> Mutex<T> {
    crate::loom::loom_const_fn! {
        pub fn new(data: T) -> Self {
            Self {
                state: AtomicUsize::new(UNLOCKED),
                captured: UnsafeCell::new(VecDeque::new()),
                data: UnsafeCell::new(data),
            }
        }
    }

    /// Attempt to acquire the lock without suspending.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| MutexGuard { mutex: self })
    }

    /// Acquire the lock, suspending until it is granted.
    ///
    /// Waiters are granted the lock in FIFO order across capture batches.
    pub fn lock(&self) -> Lock<'_, T> {
        Lock {
            mutex: self,
            waiter: None,
        }
    }

    fn unlock(&self) {
        debug_assert_ne!(self.state.load(Ordering::Relaxed), UNLOCKED);

        // Safety: only the lock holder reaches here, so the captured queue
        // is exclusively ours until the lock is released or handed over.
        let captured = self.captured.with_mut(|q| unsafe { &mut *q });

        loop {
            while let Some(waiter) = captured.pop_front() {
                match waiter.state.compare_exchange(
                    WAITING,
                    GRANTED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        // ownership transfers to this waiter
                        let waker = waiter.waker.lock().take();
                        if let Some(waker) = waker {
                            waker.wake();
                        }
                        return;
                    }
                    // the lock future was dropped while queued
                    Err(_) => continue,
                }
            }

            if self
                .state
                .compare_exchange(LOCKED, UNLOCKED, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }

            // New waiters arrived. Capture the stack in one exchange and
            // reverse it so the oldest acquisition is served first.
            let head = self.state.swap(LOCKED, Ordering::Acquire);
            debug_assert!(head != LOCKED && head != UNLOCKED);

            let mut node = head;
            let mut batch = Vec::new();
            while node != LOCKED {
                // Safety: the pointer was produced by `Arc::into_raw` in
                // `Lock::poll` and ownership moved to us with the exchange.
                let waiter = unsafe { Arc::from_raw(node as *const Waiter) };
                node = waiter.next.load(Ordering::Relaxed);
                batch.push(waiter);
            }
            for waiter in batch.into_iter().rev() {
                captured.push_back(waiter);
            }
        }
    }
}

// Safety: the data is only reachable through the lock protocol
unsafe impl<T: Send> Send for Mutex<T> {}
// Safety: the data is only reachable through the lock protocol
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Drop for Mutex<T> {
    fn drop(&mut self) {
        let state = self.state.load(Ordering::Relaxed);
        debug_assert!(
            state == UNLOCKED || state == LOCKED,
            "mutex dropped with queued waiters"
        );
    }
}

impl<T: fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Mutex");
        match self.try_lock() {
            Some(guard) => s.field("data", &*guard),
            None => s.field("data", &format_args!("<locked>")),
        }
        .finish()
    }
}

// === impl Lock ===

impl<'a, T> Future for Lock<'a, T> {
    type Output = MutexGuard<'a, T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        if let Some(waiter) = &this.waiter {
            if waiter.state.load(Ordering::Acquire) == GRANTED {
                this.waiter = None;
                return Poll::Ready(MutexGuard { mutex: this.mutex });
            }
            *waiter.waker.lock() = Some(cx.waker().clone());
            // the grant may have raced the waker store
            if waiter.state.load(Ordering::Acquire) == GRANTED {
                this.waiter = None;
                return Poll::Ready(MutexGuard { mutex: this.mutex });
            }
            return Poll::Pending;
        }

        let mut state = this.mutex.state.load(Ordering::Acquire);
        loop {
            if state == UNLOCKED {
                match this.mutex.state.compare_exchange_weak(
                    UNLOCKED,
                    LOCKED,
                    Ordering::Acquire,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        // an unpublished waiter node from a lost race may
                        // linger; it was never shared, so just discard it
                        this.waiter = None;
                        return Poll::Ready(MutexGuard { mutex: this.mutex });
                    }
                    Err(actual) => state = actual,
                }
            } else {
                let waiter = this.waiter.get_or_insert_with(|| {
                    Arc::new(Waiter {
                        state: AtomicU8::new(WAITING),
                        waker: spin::Mutex::new(Some(cx.waker().clone())),
                        next: AtomicUsize::new(LOCKED),
                    })
                });
                // push onto the head of the waiter stack
                waiter.next.store(state, Ordering::Relaxed);
                let raw = Arc::into_raw(Arc::clone(waiter)) as usize;
                match this.mutex.state.compare_exchange_weak(
                    state,
                    raw,
                    Ordering::Release,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return Poll::Pending,
                    Err(actual) => {
                        // Safety: the publish failed, reclaim the reference
                        drop(unsafe { Arc::from_raw(raw as *const Waiter) });
                        state = actual;
                    }
                }
            }
        }
    }
}

impl<T> Drop for Lock<'_, T> {
    fn drop(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            match waiter.state.compare_exchange(
                WAITING,
                CANCELLED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                // the queued node will be skipped at handoff
                Ok(_) => {}
                // we were granted the lock concurrently with cancellation
                // and now own it: release it
                Err(_) => self.mutex.unlock(),
            }
        }
    }
}

impl<T> fmt::Debug for Lock<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("queued", &self.waiter.is_some())
            .finish()
    }
}

// === impl MutexGuard ===

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: holding the guard is holding the lock
        self.mutex.data.with(|data| unsafe { &*data })
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: holding the guard is holding the lock
        self.mutex.data.with_mut(|data| unsafe { &mut *data })
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

impl<T: fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
