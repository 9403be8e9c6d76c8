// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::executor::Entry;

/// A task container an executor drains.
///
/// `has_work` is a cheap snapshot and may be stale; it exists so workers
/// about to park can double-check for racing submissions.
pub trait RunQueue: Send + Sync + 'static {
    fn add(&self, entry: Entry);

    fn next(&self) -> Option<Entry>;

    fn has_work(&self) -> bool;

    /// Called once at the start of shutdown, before the stop flag flips.
    fn finalize(&self);
}

/// A mutex-guarded FIFO list.
#[derive(Debug, Default)]
pub struct FifoQueue {
    len: AtomicUsize,
    entries: Mutex<VecDeque<Entry>>,
}

impl FifoQueue {
    pub fn new() -> Self {
        Self {
            len: AtomicUsize::new(0),
            entries: Mutex::new(VecDeque::new()),
        }
    }
}

impl RunQueue for FifoQueue {
    fn add(&self, entry: Entry) {
        let mut entries = self.entries.lock();
        entries.push_back(entry);
        self.len.store(entries.len(), Ordering::Release);
    }

    fn next(&self) -> Option<Entry> {
        let mut entries = self.entries.lock();
        let entry = entries.pop_front();
        self.len.store(entries.len(), Ordering::Release);
        entry
    }

    fn has_work(&self) -> bool {
        self.len.load(Ordering::Acquire) != 0
    }

    fn finalize(&self) {}
}
