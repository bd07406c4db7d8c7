// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Single-threaded event loop for timed wakeups.
//!
//! The scheduler only needs one thing from a loop: "call this once, after
//! this long", plus a way to take it back. That contract is the `EventLoop`
//! trait. `TimerLoop` is the in-tree implementation, driven explicitly by
//! its owner through `run_due()` / `run()`.
//!
//! Components:
//! - `clock` — wall-clock and virtual time sources
//! - `heap`  — deadline min-heap

mod clock;
mod heap;

use std::cell::RefCell;
use std::collections::{HashMap, TryReserveError};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use thiserror::Error;

pub use clock::{Clock, ManualClock, MonotonicClock};
use heap::TimerHeap;

/// Callback invoked once when a timer fires.
pub type TimerCallback = Box<dyn FnOnce()>;

/// Identifies a registered timer. Never reused within one loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub(crate) u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("event loop is closed")]
    Closed,

    #[error("cannot allocate timer storage")]
    Allocation(#[from] TryReserveError),

    #[error("timer delay {0:?} overflows the loop clock")]
    DelayOverflow(Duration),
}

/// One-shot timer service.
pub trait EventLoop {
    /// Call `callback` once after `delay` of loop time.
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> Result<TimerId, LoopError>;

    /// Drop a pending timer. Returns false if it already fired or was cancelled.
    fn cancel(&self, timer: TimerId) -> bool;
}

#[derive(Default)]
struct LoopState {
    heap: TimerHeap,
    callbacks: HashMap<TimerId, TimerCallback>,
    next_timer: u64,
    closed: bool,
}

/// Heap size below which stale entries are left for `prune`.
const COMPACT_MIN_ENTRIES: usize = 64;

impl LoopState {
    /// Sweep cancelled entries once they outnumber the pending timers.
    fn compact(&mut self) {
        let live = self.callbacks.len();
        if self.heap.len() < COMPACT_MIN_ENTRIES || self.heap.len() <= live * 2 {
            return;
        }
        let callbacks = &self.callbacks;
        self.heap.retain(|timer| callbacks.contains_key(&timer));
        log::trace!("compacted timer heap to {} entries", self.heap.len());
    }

    /// Drop cancelled entries sitting at the top of the heap.
    fn prune(&mut self) {
        while let Some((timer, _)) = self.heap.peek() {
            if self.callbacks.contains_key(&timer) {
                break;
            }
            self.heap.pop();
        }
    }
}

/// Timer loop over a deadline heap.
///
/// Callbacks run with no internal borrow held, so they may register or
/// cancel timers (a woken coroutine usually does both).
pub struct TimerLoop {
    clock: Rc<dyn Clock>,
    state: RefCell<LoopState>,
}

impl TimerLoop {
    /// Loop on the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Rc::new(MonotonicClock::new()))
    }

    pub fn with_clock(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            state: RefCell::new(LoopState::default()),
        }
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Number of timers waiting to fire.
    pub fn pending(&self) -> usize {
        self.state.borrow().callbacks.len()
    }

    /// Earliest deadline among pending timers.
    pub fn next_deadline(&self) -> Option<Duration> {
        let mut state = self.state.borrow_mut();
        state.prune();
        state.heap.peek().map(|(_, deadline)| deadline)
    }

    /// Fire every timer that is due now. Returns how many fired.
    ///
    /// Timers registered by callbacks during this pass wait for the next one,
    /// so a zero-delay timer that re-arms itself cannot starve the caller.
    pub fn run_due(&self) -> usize {
        let now = self.clock.now();
        let horizon = self.state.borrow().next_timer;
        let mut fired = 0;

        loop {
            let callback = {
                let mut state = self.state.borrow_mut();
                match state.heap.peek() {
                    Some((timer, deadline)) if deadline <= now && timer.0 < horizon => {
                        state.heap.pop();
                        state.callbacks.remove(&timer)
                    }
                    _ => break,
                }
            };
            if let Some(callback) = callback {
                callback();
                fired += 1;
            }
        }

        if fired > 0 {
            log::trace!("fired {} timer(s) at {:?}", fired, now);
        }
        fired
    }

    /// Wait for and fire timers until none are pending. Returns how many fired.
    pub fn run(&self) -> usize {
        let mut fired = 0;
        while let Some(deadline) = self.next_deadline() {
            self.clock.wait_until(deadline);
            fired += self.run_due();
        }
        fired
    }

    /// Stop accepting timers and drop the pending ones. Returns how many were dropped.
    pub fn close(&self) -> usize {
        let dropped = {
            let mut state = self.state.borrow_mut();
            state.closed = true;
            state.heap.clear();
            std::mem::take(&mut state.callbacks)
        };
        // Callbacks may own values whose Drop touches this loop.
        let count = dropped.len();
        drop(dropped);
        log::debug!("timer loop closed, {} pending timer(s) dropped", count);
        count
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }
}

impl Default for TimerLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop for TimerLoop {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> Result<TimerId, LoopError> {
        let deadline = self
            .clock
            .now()
            .checked_add(delay)
            .ok_or(LoopError::DelayOverflow(delay))?;

        let mut state = self.state.borrow_mut();
        if state.closed {
            return Err(LoopError::Closed);
        }
        state.heap.try_reserve()?;
        state.callbacks.try_reserve(1)?;

        let timer = TimerId(state.next_timer);
        state.next_timer += 1;
        state.heap.push(timer, deadline);
        state.callbacks.insert(timer, callback);
        Ok(timer)
    }

    fn cancel(&self, timer: TimerId) -> bool {
        let callback = {
            let mut state = self.state.borrow_mut();
            let callback = state.callbacks.remove(&timer);
            if callback.is_some() {
                state.compact();
            }
            callback
        };
        // Dropped outside the borrow, like `close`.
        callback.is_some()
    }
}

impl fmt::Debug for TimerLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("TimerLoop")
            .field("now", &self.clock.now())
            .field("pending", &state.callbacks.len())
            .field("closed", &state.closed)
            .finish()
    }
}

thread_local! {
    static DEFAULT_LOOP: Rc<TimerLoop> = Rc::new(TimerLoop::new());
}

/// The calling thread's shared wall-clock loop.
pub fn default_loop() -> Rc<TimerLoop> {
    DEFAULT_LOOP.with(Rc::clone)
}
