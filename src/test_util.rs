// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::Arc;

use tracing::subscriber::DefaultGuard;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::executor::{Entry, Executor, ExecutorRef};

/// Install a per-test tracing subscriber driven by `RUST_LOG`.
pub(crate) fn trace_init() -> DefaultGuard {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .set_default()
}

/// Detached no-op entries for exercising queues directly.
pub(crate) fn entries(n: usize) -> Vec<Entry> {
    struct Nop;
    impl Executor for Nop {
        fn enqueue(&self, _entry: Entry) {}
    }
    let nop: ExecutorRef = Arc::new(Nop);

    (0..n)
        .map(|_| {
            let nop = nop.clone();
            let (runnable, task) = async_task::spawn(async {}, move |r| {
                nop.enqueue(Entry::new(r));
            });
            task.detach();
            Entry::new(runnable)
        })
        .collect()
}
