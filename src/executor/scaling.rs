// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use crate::executor::bag::BagQueue;
use crate::executor::queue::{FifoQueue, RunQueue};
use crate::executor::{CurrentGuard, Entry, Executor, ExecutorRef};
use crate::park::Semaphore;

/// A scaling pool executor with `min..=max` workers.
///
/// Workers are spawned on demand when a submission finds no parked worker
/// to wake, and retire again after idling for `linger` without a signal.
/// Shutdown is queue-ordered: the destructor enqueues a stop task, workers
/// drain, pass the shutdown token to the next sleeper and exit; the last
/// one out signals the destructor.
pub struct ScalingExecutor<Q: RunQueue = FifoQueue> {
    inner: Arc<Inner<Q>>,
}

/// A scaling pool draining a mutex-guarded FIFO list.
pub fn scaling_fifo(min: usize, max: usize, linger: Duration) -> ScalingExecutor<FifoQueue> {
    ScalingExecutor::with_queue(FifoQueue::new(), min, max, linger)
}

/// A scaling pool draining a work-stealing bag of per-thread deques.
pub fn scaling_bag(min: usize, max: usize, linger: Duration) -> ScalingExecutor<BagQueue> {
    ScalingExecutor::with_queue(BagQueue::new(), min, max, linger)
}

struct Inner<Q> {
    queue: Q,
    running: AtomicBool,
    parked: AtomicIsize,
    total: AtomicUsize,
    signal: Semaphore,
    done: Semaphore,
    min: usize,
    max: usize,
    linger: Duration,
    /// Self-handle so `enqueue` can hand worker threads an owned reference.
    me: Weak<Inner<Q>>,
}

enum Rest {
    /// Woken by a signal (or staying at the floor): keep draining.
    Continue,
    /// Lingered out and won the scale-down race: retire.
    Retire,
}

impl<Q: RunQueue> Executor for Inner<Q> {
    fn enqueue(&self, entry: Entry) {
        self.queue.add(entry);
        self.notify();
    }
}

impl<Q: RunQueue> Inner<Q> {
    /// Wake one parked worker. Returns `false` when none was claimed.
    fn try_wake(&self) -> bool {
        loop {
            let parked = self.parked.load(Ordering::Acquire);
            if parked <= 0 {
                return false;
            }
            if self
                .parked
                .compare_exchange(parked, parked - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.signal.signal();
                return true;
            }
        }
    }

    /// Wake a parked worker, or grow the pool while below `max`. If the
    /// pool is saturated the submission is left for a running worker.
    fn notify(&self) {
        if self.try_wake() {
            return;
        }
        loop {
            let total = self.total.load(Ordering::Acquire);
            if total >= self.max {
                return;
            }
            if self
                .total
                .compare_exchange(total, total + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.spawn_worker();
                return;
            }
        }
    }

    fn spawn_worker(&self) {
        let inner = self.me.upgrade().expect("executor already torn down");
        let builder = thread::Builder::new().name("spindle-pool-worker".into());
        builder
            .spawn(move || inner.worker())
            .expect("failed to spawn pool worker");
        tracing::trace!("scaled up a worker");
    }

    fn worker(self: Arc<Self>) {
        let _span = tracing::debug_span!("pool worker").entered();
        let exec: ExecutorRef = Arc::clone(&self) as ExecutorRef;
        let _current = CurrentGuard::install(exec);

        loop {
            while let Some(entry) = self.queue.next() {
                entry.run();
            }
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            match self.rest() {
                Rest::Continue => continue,
                Rest::Retire => {
                    tracing::trace!("scaled down a worker");
                    // a submission may have claimed this worker right as it
                    // lingered out; its token is orphaned, so hand the work
                    // to someone else (waking or spawning as needed)
                    if self.queue.has_work() {
                        self.notify();
                    }
                    // a shutdown may have begun after the counter moved;
                    // if this retirement emptied the pool, the stop task
                    // has no worker left to account for it
                    if !self.running.load(Ordering::Acquire)
                        && self.total.load(Ordering::Acquire) == 0
                    {
                        self.done.signal();
                    }
                    return;
                }
            }
        }

        // shutdown: hand the token to the next sleeper, then check out
        self.try_wake();
        if self.total.fetch_sub(1, Ordering::AcqRel) == 1 {
            tracing::debug!("last pool worker exiting");
            self.done.signal();
        }
    }

    fn rest(&self) -> Rest {
        self.parked.fetch_add(1, Ordering::AcqRel);
        if self.queue.has_work() || !self.running.load(Ordering::Acquire) {
            // a submission (or the shutdown broadcast) may have missed this
            // worker on its way to sleep; post a wakeup that lands on
            // someone, possibly ourselves
            self.try_wake();
        }

        if self.signal.wait_for(self.linger) {
            return Rest::Continue;
        }

        // lingered out without a signal: un-register from the parked set
        // and try to shrink the pool
        self.parked.fetch_sub(1, Ordering::AcqRel);
        loop {
            let total = self.total.load(Ordering::Acquire);
            if total <= self.min {
                return Rest::Continue;
            }
            if self
                .total
                .compare_exchange(total, total - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Rest::Retire;
            }
        }
    }
}

impl<Q: RunQueue> ScalingExecutor<Q> {
    fn with_queue(queue: Q, min: usize, max: usize, linger: Duration) -> Self {
        assert!(max >= min, "scaling executor requires min <= max");
        assert!(max > 0, "scaling executor requires at least one worker");

        let inner = Arc::new_cyclic(|me| Inner {
            queue,
            running: AtomicBool::new(true),
            parked: AtomicIsize::new(0),
            total: AtomicUsize::new(min),
            signal: Semaphore::new(),
            done: Semaphore::new(),
            min,
            max,
            linger,
            me: me.clone(),
        });
        for _ in 0..min {
            inner.spawn_worker();
        }
        Self { inner }
    }

    /// A shareable handle for `spawn_on`, `switch_to` and friends.
    pub fn handle(&self) -> ExecutorRef {
        Arc::clone(&self.inner) as ExecutorRef
    }

    /// Worker threads currently alive (spawned or retiring).
    pub fn total_workers(&self) -> usize {
        self.inner.total.load(Ordering::Acquire)
    }

    /// Workers currently waiting on the idle signal.
    pub fn parked_workers(&self) -> usize {
        self.inner.parked.load(Ordering::Acquire).max(0) as usize
    }
}

impl<Q: RunQueue> Executor for ScalingExecutor<Q> {
    fn enqueue(&self, entry: Entry) {
        self.inner.enqueue(entry);
    }
}

impl<Q: RunQueue> Drop for ScalingExecutor<Q> {
    fn drop(&mut self) {
        let inner = Arc::clone(&self.inner);
        // the stop task runs on a worker, after everything already queued;
        // enqueueing it also guarantees at least one worker is alive to
        // carry out the shutdown
        drop(crate::task::spawn_on(self.handle(), async move {
            inner.queue.finalize();
            inner.running.store(false, Ordering::Release);
            while inner.try_wake() {}
        }));
        self.inner.done.wait();
    }
}

impl<Q: RunQueue> core::fmt::Debug for ScalingExecutor<Q> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScalingExecutor")
            .field("min", &self.inner.min)
            .field("max", &self.inner.max)
            .field("linger", &self.inner.linger)
            .field("total_workers", &self.total_workers())
            .field("parked_workers", &self.parked_workers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::trace_init;
    use std::time::Instant;

    fn drain_50_trivial_tasks<Q: RunQueue>(exec: &ScalingExecutor<Q>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let counter = Arc::clone(&counter);
                crate::task::spawn_on(exec.handle(), async move {
                    counter.fetch_add(1, Ordering::Relaxed);
                })
            })
            .collect();

        crate::executor::run_blocking(async move {
            for task in tasks {
                task.await;
            }
        });
        assert_eq!(counter.load(Ordering::Relaxed), 50);
    }

    #[test]
    fn fifo_pool_completes_all_tasks() {
        let _trace = trace_init();
        let exec = scaling_fifo(1, 4, Duration::from_millis(100));
        drain_50_trivial_tasks(&exec);
        assert!(exec.total_workers() >= 1 && exec.total_workers() <= 4);
    }

    #[test]
    fn bag_pool_completes_all_tasks() {
        let _trace = trace_init();
        let exec = scaling_bag(1, 4, Duration::from_millis(100));
        drain_50_trivial_tasks(&exec);
        assert!(exec.total_workers() >= 1 && exec.total_workers() <= 4);
    }

    #[test]
    fn pool_scales_back_down_when_idle() {
        let _trace = trace_init();
        let exec = scaling_fifo(1, 4, Duration::from_millis(100));
        drain_50_trivial_tasks(&exec);

        // workers linger for 100ms; after roughly double that the pool is
        // back at its floor
        let deadline = Instant::now() + Duration::from_millis(1000);
        while exec.total_workers() > 1 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(exec.total_workers(), 1);
    }

    #[test]
    fn workers_stay_within_bounds() {
        let _trace = trace_init();
        let exec = scaling_fifo(2, 3, Duration::from_millis(50));

        for _ in 0..8 {
            drain_50_trivial_tasks(&exec);
            let total = exec.total_workers();
            assert!((2..=3).contains(&total), "total {total} out of bounds");
        }
    }

    #[test]
    fn shutdown_completes_with_zero_floor() {
        let _trace = trace_init();
        let exec = scaling_fifo(0, 2, Duration::from_millis(20));
        drain_50_trivial_tasks(&exec);
        // dropping must not hang even if every worker already retired
        drop(exec);
    }
}
