// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::sync::SingleTrigger;
use crate::time::Timer;

/// Wait until `duration` has elapsed, on the global timer.
pub fn sleep(duration: Duration) -> Sleep<'static> {
    Timer::global().sleep(duration)
}

/// Wait until `deadline` has been reached, on the global timer.
pub fn sleep_until(deadline: Instant) -> Sleep<'static> {
    Timer::global().sleep_until(deadline)
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum State {
    Unregistered,
    Registered,
    Completed,
}

/// Future returned by [`sleep`] and [`sleep_until`].
///
/// The sleeper parks on a single trigger that the timer's service thread
/// pulls once the deadline passes; the resumption is dispatched through the
/// task's recorded executor. Dropping a `Sleep` leaves its entry in the
/// heap until the deadline, where the pull finds no one to wake.
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Sleep<'t> {
    timer: &'t Timer,
    deadline: Instant,
    trigger: Arc<SingleTrigger>,
    state: State,
}

impl<'t> Sleep<'t> {
    pub(crate) fn new(timer: &'t Timer, deadline: Instant) -> Self {
        Self {
            timer,
            deadline,
            trigger: Arc::new(SingleTrigger::new()),
            state: State::Unregistered,
        }
    }

    /// The instant this sleep elapses at.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Future for Sleep<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        match this.state {
            State::Unregistered => {
                if Instant::now() >= this.deadline {
                    this.state = State::Completed;
                    return Poll::Ready(());
                }
                this.timer
                    .register(this.deadline, Arc::clone(&this.trigger));
                this.state = State::Registered;
            }
            State::Registered => {}
            State::Completed => return Poll::Ready(()),
        }

        // a pull resolves Ok; a close can only come from the whole timer
        // going away, in which case waking is all that's left to do
        let _ = core::task::ready!(this.trigger.poll_wait(cx));
        this.state = State::Completed;
        Poll::Ready(())
    }
}

impl fmt::Debug for Sleep<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sleep")
            .field("deadline", &self.deadline)
            .field("state", &self.state)
            .finish()
    }
}
