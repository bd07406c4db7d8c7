// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Time sources for the timer loop.
//!
//! Times are `Duration`s measured from the clock's own epoch.

use std::cell::Cell;
use std::time::{Duration, Instant};

/// Where the loop reads "now" from, and how it waits for a deadline.
pub trait Clock {
    /// Time elapsed since the clock's epoch.
    fn now(&self) -> Duration;

    /// Block until `now() >= deadline`.
    fn wait_until(&self, deadline: Duration);
}

/// Wall-clock time backed by `Instant`. Waiting sleeps the OS thread.
#[derive(Debug)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn wait_until(&self, deadline: Duration) {
        let now = self.now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }
}

/// Virtual time. Only moves when told to; waiting jumps straight to the deadline.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    /// Move to `time`. Moving backwards is ignored.
    pub fn advance_to(&self, time: Duration) {
        if time > self.now.get() {
            self.now.set(time);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn wait_until(&self, deadline: Duration) {
        self.advance_to(deadline);
    }
}
