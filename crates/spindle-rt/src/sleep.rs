// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Timed suspension on the scheduler's event loop.

use std::rc::Rc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::scheduler::Scheduler;

impl Scheduler {
    /// Suspend the current coroutine for `duration`.
    ///
    /// `None` is a plain `yield_now`: only an explicit `resume` wakes it.
    /// Otherwise a one-shot timer on the event loop resumes the coroutine when
    /// the loop fires it. If someone resumes it earlier, the timer is
    /// cancelled so it never fires against a stale handle.
    ///
    /// Fails without yielding when the caller cannot yield or the timer
    /// cannot be registered.
    pub fn sleep(&self, duration: Option<Duration>) -> Result<()> {
        let Some(delay) = duration else {
            return self.yield_now();
        };

        let (sleeper, _) = self.borrow_state().yield_point().map_err(Error::report)?;

        let scheduler = Rc::downgrade(&self.inner);
        let timer = self
            .inner
            .event_loop
            .schedule_once(
                delay,
                Box::new(move || {
                    let Some(inner) = scheduler.upgrade() else { return };
                    // Failures are reported by resume itself.
                    let _ = Scheduler { inner }.resume(sleeper);
                }),
            )
            .map_err(|err| Error::from(err).report())?;
        log::trace!("{} sleeping {:?} on {}", sleeper, delay, timer);

        let woke = self.yield_now();
        self.inner.event_loop.cancel(timer);
        woke
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spindle_loop::{ManualClock, TimerLoop};
    use std::cell::Cell;

    fn manual_scheduler() -> (Rc<ManualClock>, Rc<TimerLoop>, Scheduler) {
        let clock = Rc::new(ManualClock::new());
        let timers = Rc::new(TimerLoop::with_clock(clock.clone()));
        let sched = Scheduler::builder()
            .event_loop(timers.clone())
            .build()
            .unwrap();
        (clock, timers, sched)
    }

    #[test]
    fn main_cannot_sleep() {
        let (_, timers, sched) = manual_scheduler();
        let err = sched.sleep(Some(Duration::from_millis(5))).unwrap_err();
        assert!(err.is_invalid_state());
        assert_eq!(timers.pending(), 0);
    }

    #[test]
    fn early_resume_cancels_the_timer() {
        let (clock, timers, sched) = manual_scheduler();
        let woke = Rc::new(Cell::new(false));
        let flag = woke.clone();
        let co = sched
            .create(move |s| {
                s.sleep(Some(Duration::from_secs(10))).unwrap();
                flag.set(true);
            })
            .unwrap();
        sched.resume(co).unwrap();
        assert_eq!(timers.pending(), 1);

        sched.resume(co).unwrap();
        assert!(woke.get());
        assert_eq!(timers.pending(), 0);

        clock.advance(Duration::from_secs(10));
        assert_eq!(timers.run_due(), 0);
    }
}
