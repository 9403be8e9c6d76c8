// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_deque::{Steal, Stealer, Worker};
use spin::RwLock;

use crate::executor::Entry;
use crate::executor::queue::RunQueue;

/// A work-stealing bag of tasks.
///
/// Each writing thread owns a deque it pushes to; the deque is claimed
/// through a thread-local lease whose destructor releases it back to the
/// bag when the thread dies, so abandoned deques are recycled by the next
/// writer and remain stealable in the meantime. Readers pop from their own
/// deque first and then steal from the others, starting at a random victim.
///
/// Emptiness detection is cheap but approximate: `has_work` may observe a
/// deque mid-steal.
pub struct BagQueue {
    id: u64,
    finalized: AtomicBool,
    slots: RwLock<Vec<Arc<DequeSlot>>>,
}

struct DequeSlot {
    deque: Worker<Entry>,
    stealer: Stealer<Entry>,
    in_use: AtomicBool,
}

// Safety: the `in_use` flag grants exclusive access to `deque`: a slot is
// only pushed to/popped from by the thread that won the claim, and only the
// `Sync` stealer side is touched by everyone else.
unsafe impl Send for DequeSlot {}
// Safety: see above
unsafe impl Sync for DequeSlot {}

impl DequeSlot {
    fn new() -> Self {
        let deque = Worker::new_fifo();
        let stealer = deque.stealer();
        Self {
            deque,
            stealer,
            in_use: AtomicBool::new(true),
        }
    }

    fn claim(&self) -> bool {
        !self.in_use.swap(true, Ordering::Acquire)
    }

    fn release(&self) {
        self.in_use.store(false, Ordering::Release);
    }
}

/// Thread-local lease on a bag's deque slot. Dropping the lease (thread
/// exit, or the cache evicting it) abandons the slot back to the bag.
struct SlotLease {
    bag: u64,
    slot: Arc<DequeSlot>,
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.slot.release();
    }
}

thread_local! {
    static LEASES: RefCell<Vec<SlotLease>> = const { RefCell::new(Vec::new()) };
}

static BAG_IDS: AtomicU64 = AtomicU64::new(0);

impl BagQueue {
    pub fn new() -> Self {
        Self {
            id: BAG_IDS.fetch_add(1, Ordering::Relaxed),
            finalized: AtomicBool::new(false),
            slots: RwLock::new(Vec::new()),
        }
    }

    /// The calling thread's slot, claiming or creating one if needed.
    fn local_slot(&self) -> Arc<DequeSlot> {
        LEASES.with(|leases| {
            let mut leases = leases.borrow_mut();
            if let Some(lease) = leases.iter().find(|lease| lease.bag == self.id) {
                return Arc::clone(&lease.slot);
            }
            let slot = self.assign_slot();
            leases.push(SlotLease {
                bag: self.id,
                slot: Arc::clone(&slot),
            });
            slot
        })
    }

    /// Recycle an abandoned slot, or grow the bag by one.
    fn assign_slot(&self) -> Arc<DequeSlot> {
        {
            let slots = self.slots.read();
            for slot in slots.iter() {
                if slot.claim() {
                    return Arc::clone(slot);
                }
            }
        }
        let slot = Arc::new(DequeSlot::new());
        self.slots.write().push(Arc::clone(&slot));
        slot
    }

    fn steal(&self, own: &DequeSlot) -> Option<Entry> {
        let slots = self.slots.read();
        if slots.is_empty() {
            return None;
        }

        let start = fastrand::usize(..slots.len());
        for i in 0..slots.len() {
            let victim = &slots[(start + i) % slots.len()];
            if core::ptr::eq(&**victim as *const DequeSlot, own) {
                continue;
            }
            loop {
                match victim.stealer.steal() {
                    Steal::Success(entry) => return Some(entry),
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }
        None
    }
}

impl Default for BagQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RunQueue for BagQueue {
    fn add(&self, entry: Entry) {
        self.local_slot().deque.push(entry);
    }

    fn next(&self) -> Option<Entry> {
        let slot = self.local_slot();
        if let Some(entry) = slot.deque.pop() {
            return Some(entry);
        }
        self.steal(&slot)
    }

    fn has_work(&self) -> bool {
        let slots = self.slots.read();
        slots.iter().any(|slot| !slot.stealer.is_empty())
    }

    fn finalize(&self) {
        // no new writers matter past this point; abandoned deques drain
        // through the steal path
        self.finalized.store(true, Ordering::Release);
    }
}

impl core::fmt::Debug for BagQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BagQueue")
            .field("id", &self.id)
            .field("deques", &self.slots.read().len())
            .field("finalized", &self.finalized.load(Ordering::Relaxed))
            .finish()
    }
}
