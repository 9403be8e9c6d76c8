// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A cooperative asynchronous-task runtime.
//!
//! `spindle` provides the pieces needed to express suspending computations,
//! compose their results, and schedule their resumptions across one or more
//! worker threads:
//!
//! - **Executors**: [`SingleThreadExecutor`], the scaling thread pool
//!   behind [`scaling_fifo`]/[`scaling_bag`], the host-driven
//!   [`ManualDrainExecutor`], and [`run_blocking`] which commandeers the
//!   calling thread.
//! - **Triggers**: one-shot rendezvous objects ([`SingleTrigger`],
//!   [`FifoTrigger`]) on which suspended tasks park and from which one or
//!   many resumptions are dispatched through each waiter's recorded
//!   executor.
//! - **Task shapes**: [`Eager`] (single consumer, detach on drop),
//!   [`Shared`] (clonable handle, value delivered by copy), [`Lazy`]
//!   (state co-located with the object, value delivered by reference),
//!   and the promise pairs [`value_future`]/[`shared_future`].
//! - **Timed service**: a process-wide [`Timer`] thread waking [`sleep`]
//!   futures at their deadline.
//! - An async [`Mutex`] with FIFO handoff across waiter batches.

mod error;
pub mod executor;
pub(crate) mod loom;
pub mod ops;
mod park;
pub mod sync;
pub mod task;
#[cfg(test)]
mod test_util;
pub mod time;

pub use error::{Closed, Failure};
pub use executor::{
    Entry, Executor, ExecutorRef, ManualDrainExecutor, ScalingExecutor, SingleThreadExecutor,
    current_executor, run_blocking, scaling_bag, scaling_fifo,
};
pub use ops::{AsyncClose, Configured, await_all, redispatch, switch_to, uses};
pub use sync::{FifoTrigger, Mutex, MutexGuard, SingleTrigger};
pub use task::{
    Eager, Lazy, Shared, SharedFuture, SharedPromise, ValueFuture, ValuePromise, shared_future,
    spawn, spawn_on, spawn_shared, spawn_shared_on, value_future,
};
pub use time::{Sleep, Timer, sleep, sleep_until};
