// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Deferred tasks: per-coroutine FIFO queues drained when the owner finishes.

use std::panic::{self, AssertUnwindSafe};

use spindle_context::panic_message;

use crate::error::{Error, Result};
use crate::scheduler::Scheduler;

/// Callback queued with `Scheduler::defer`.
pub(crate) type DeferredTask = Box<dyn FnOnce(&Scheduler)>;

impl Scheduler {
    /// Queue `task` on the current coroutine.
    ///
    /// Tasks run in registration order once the coroutine's body returns,
    /// before control goes back to its resumer. Tasks queued on the main
    /// coroutine are accepted but never run.
    pub fn defer<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce(&Scheduler) + 'static,
    {
        let mut state = self.state_mut();
        let current = state.current;
        let entry = state
            .coroutines
            .get_mut(current.slot)
            .ok_or(Error::UnknownCoroutine(current))?;
        if let Err(source) = entry.deferred.try_reserve(1) {
            drop(state);
            return Err(Error::allocation("deferred task", source).report());
        }
        entry.deferred.push_back(Box::new(task));
        Ok(())
    }

    /// Drain the current coroutine's queue in FIFO order. Returns how many ran.
    ///
    /// Tasks queued while draining run in the same pass. Each task is invoked
    /// with no scheduler borrow held. A panicking task is logged and counted;
    /// the rest of the queue still runs.
    pub fn execute_deferred_tasks(&self) -> usize {
        let owner = self.current();
        let mut ran = 0;
        loop {
            let task = {
                let mut state = self.state_mut();
                match state.coroutines.get_mut(owner.slot) {
                    Some(entry) => entry.deferred.pop_front(),
                    None => None,
                }
            };
            let Some(task) = task else { break };
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task(self))) {
                log::error!(
                    "deferred task of {} panicked: {}",
                    owner,
                    panic_message(payload.as_ref())
                );
            }
            ran += 1;
        }
        if ran > 0 {
            log::trace!("{} ran {} deferred task(s)", owner, ran);
        }
        ran
    }
}
