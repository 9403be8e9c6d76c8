// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

use crate::error::Failure;
use crate::loom::cell::UnsafeCell;

/// Storage for a task's outcome: empty, a value, or a captured failure.
///
/// The cell itself carries no synchronization. Producers write exactly once
/// and then fire the paired trigger; consumers read only after observing
/// the fired state, so the trigger's atomics order the accesses.
pub(crate) struct ValueCell<T> {
    slot: UnsafeCell<Option<Result<T, Failure>>>,
}

// Safety: access is ordered by the paired trigger (see type docs)
unsafe impl<T: Send> Send for ValueCell<T> {}
// Safety: access is ordered by the paired trigger (see type docs)
unsafe impl<T: Send> Sync for ValueCell<T> {}

impl<T> ValueCell<T> {
    crate::loom::loom_const_fn! {
        pub(crate) fn new() -> Self {
            Self {
                slot: UnsafeCell::new(None),
            }
        }
    }

    /// Store the outcome. Each cell is written at most once.
    ///
    /// # Panics
    ///
    /// Panics if the cell was already written.
    pub(crate) fn put(&self, outcome: Result<T, Failure>) {
        self.slot.with_mut(|slot| {
            // Safety: the producer owns the cell until it fires the trigger
            let slot = unsafe { &mut *slot };
            assert!(slot.is_none(), "value store written twice");
            *slot = Some(outcome);
        });
    }

    /// Move the value out, re-raising a stored failure.
    ///
    /// # Panics
    ///
    /// Panics if the cell is empty or was already consumed, and re-raises
    /// the producer's panic if the outcome is a failure.
    pub(crate) fn take(&self) -> T {
        let outcome = self.slot.with_mut(|slot| {
            // Safety: the consumer observed the fired trigger; the producer
            // is done with the cell
            unsafe { (*slot).take() }
        });
        match outcome {
            Some(Ok(value)) => value,
            Some(Err(failure)) => failure.rethrow(),
            None => panic!("value consumed twice (or never produced)"),
        }
    }

    /// Clone the value out, re-raising a stored failure.
    pub(crate) fn clone_out(&self) -> T
    where
        T: Clone,
    {
        self.slot.with(|slot| {
            // Safety: shared reads only happen after the trigger fired, and
            // nothing mutates the cell afterwards
            match unsafe { &*slot } {
                Some(Ok(value)) => value.clone(),
                Some(Err(failure)) => failure.rethrow_ref(),
                None => panic!("value read before it was produced"),
            }
        })
    }

    /// Borrow the value, re-raising a stored failure.
    pub(crate) fn borrow(&self) -> &T {
        self.slot.with(|slot| {
            // Safety: shared reads only happen after the trigger fired, and
            // nothing mutates the cell afterwards; the reference stays valid
            // for as long as the cell.
            match unsafe { &*slot } {
                Some(Ok(value)) => value,
                Some(Err(failure)) => failure.rethrow_ref(),
                None => panic!("value read before it was produced"),
            }
        })
    }
}

impl<T> fmt::Debug for ValueCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueCell").finish_non_exhaustive()
    }
}
