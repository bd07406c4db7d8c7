// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coroutine scheduler: lifecycle, resume/yield, and the resume chain.
//!
//! One `Scheduler` per thread. It owns every coroutine record and tracks
//! `current`, the coroutine holding control. `resume` pushes onto the chain
//! (`previous` links back to the resumer); `yield_now` and completion pop it.
//!
//! The state lives in a `RefCell` that is never borrowed across a context
//! switch or a user callback, so bodies, deferred tasks and timer callbacks
//! can all call back into the scheduler.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use spindle_context::{ExecutionContext, Suspender};
use spindle_loop::EventLoop;

use crate::arena::Arena;
use crate::config::{ConfigError, SchedulerConfig};
use crate::coroutine::{CoroutineEntry, CoroutineHandle, CoroutineState, MAIN_ID};
use crate::error::{Error, Result};

/// Handle to a per-thread coroutine scheduler. Cloning shares the scheduler.
#[derive(Clone)]
pub struct Scheduler {
    pub(crate) inner: Rc<Inner>,
}

pub(crate) struct Inner {
    state: RefCell<State>,
    pub(crate) event_loop: Rc<dyn EventLoop>,
}

pub(crate) struct State {
    pub coroutines: Arena<CoroutineEntry>,
    pub current: CoroutineHandle,
    pub main: CoroutineHandle,
    next_id: u64,
    default_stack_size: usize,
}

impl State {
    fn is_resumable(&self, coroutine: CoroutineHandle) -> bool {
        let Some(entry) = self.coroutines.get(coroutine.slot) else {
            return false;
        };
        let resumed_current = self
            .coroutines
            .get(self.current.slot)
            .and_then(|current| current.previous);
        if resumed_current == Some(coroutine) {
            return true;
        }
        // Main has no context of its own; its `Ready` state is nominal.
        coroutine != self.main
            && matches!(entry.state, CoroutineState::Ready | CoroutineState::Waiting)
    }

    /// `current` followed by its resumers, innermost first.
    fn chain(&self) -> Vec<CoroutineHandle> {
        let mut chain = vec![self.current];
        let mut cursor = self.current;
        while let Some(previous) = self.coroutines.get(cursor.slot).and_then(|e| e.previous) {
            if !self.coroutines.contains(previous.slot) || chain.len() > self.coroutines.len() {
                break;
            }
            chain.push(previous);
            cursor = previous;
        }
        chain
    }

    /// The current coroutine and its suspender, if it is able to yield right now.
    pub fn yield_point(&self) -> Result<(CoroutineHandle, Suspender)> {
        let current = self.current;
        if current == self.main {
            return Err(Error::invalid(current, "the main coroutine cannot yield"));
        }
        let entry = self
            .coroutines
            .get(current.slot)
            .ok_or(Error::UnknownCoroutine(current))?;
        match &entry.suspender {
            Some(suspender) if suspender.is_active() => Ok((current, suspender.clone())),
            _ => Err(Error::invalid(
                current,
                "not executing on the coroutine's own stack",
            )),
        }
    }
}

/// Builder for a `Scheduler` with non-default configuration or event loop.
#[derive(Default)]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    event_loop: Option<Rc<dyn EventLoop>>,
}

impl SchedulerBuilder {
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn default_stack_size(mut self, bytes: usize) -> Self {
        self.config.default_stack_size = bytes;
        self
    }

    /// Loop used by `sleep`. Defaults to the thread's shared `TimerLoop`.
    pub fn event_loop(mut self, event_loop: Rc<dyn EventLoop>) -> Self {
        self.event_loop = Some(event_loop);
        self
    }

    pub fn build(self) -> Result<Scheduler, ConfigError> {
        self.config.validate()?;
        let event_loop = self
            .event_loop
            .unwrap_or_else(|| spindle_loop::default_loop() as Rc<dyn EventLoop>);
        Ok(Scheduler::from_parts(self.config, event_loop))
    }
}

impl Scheduler {
    /// Scheduler with default configuration on the thread's shared timer loop.
    pub fn new() -> Self {
        Self::from_parts(SchedulerConfig::default(), spindle_loop::default_loop())
    }

    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::default()
    }

    fn from_parts(config: SchedulerConfig, event_loop: Rc<dyn EventLoop>) -> Self {
        let mut coroutines = Arena::new();
        let main = CoroutineHandle::new(coroutines.insert(CoroutineEntry::main()), MAIN_ID);
        let state = State {
            coroutines,
            current: main,
            main,
            next_id: MAIN_ID + 1,
            default_stack_size: config.default_stack_size,
        };
        log::debug!(
            "scheduler ready (default stack {} bytes)",
            state.default_stack_size
        );
        Scheduler {
            inner: Rc::new(Inner {
                state: RefCell::new(state),
                event_loop,
            }),
        }
    }

    pub(crate) fn borrow_state(&self) -> Ref<'_, State> {
        self.inner.state.borrow()
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, State> {
        self.inner.state.borrow_mut()
    }

    // ---- lifecycle ----

    /// Create a coroutine with the default stack size. It does not run until resumed.
    pub fn create<F>(&self, entry: F) -> Result<CoroutineHandle>
    where
        F: FnOnce(&Scheduler) + 'static,
    {
        self.create_with_stack(0, entry)
    }

    /// Create a coroutine with a stack of `stack_size` bytes (0 = configured default).
    pub fn create_with_stack<F>(&self, stack_size: usize, entry: F) -> Result<CoroutineHandle>
    where
        F: FnOnce(&Scheduler) + 'static,
    {
        let (id, stack_size) = {
            let mut state = self.state_mut();
            let id = state.next_id;
            state.next_id += 1;
            let size = if stack_size == 0 {
                state.default_stack_size
            } else {
                stack_size
            };
            (id, size)
        };

        // Bodies hold the scheduler weakly until they start.
        let scheduler = Rc::downgrade(&self.inner);
        let context = ExecutionContext::new(stack_size, move || {
            if let Some(inner) = scheduler.upgrade() {
                entry(&Scheduler { inner });
            }
        })
        .map_err(|err| Error::from(err).report())?;

        let reserved = self.state_mut().coroutines.try_reserve();
        if let Err(source) = reserved {
            drop(context);
            return Err(Error::allocation("coroutine record", source).report());
        }
        let slot = self
            .state_mut()
            .coroutines
            .insert(CoroutineEntry::new(context));
        let coroutine = CoroutineHandle::new(slot, id);

        log::debug!("created {} ({} byte stack)", coroutine, stack_size);
        Ok(coroutine)
    }

    /// Create a coroutine and resume it immediately.
    ///
    /// The returned handle may already refer to a released coroutine if the
    /// body ran to completion; lookups through it then report it as gone.
    pub fn run<F>(&self, entry: F) -> Result<CoroutineHandle>
    where
        F: FnOnce(&Scheduler) + 'static,
    {
        let coroutine = self.create(entry)?;
        if let Err(err) = self.resume(coroutine) {
            // Never entered, so this only fails if something else already released it.
            let _ = self.close(coroutine);
            return Err(err);
        }
        Ok(coroutine)
    }

    /// Release a coroutine that has finished or was never entered.
    pub fn close(&self, coroutine: CoroutineHandle) -> Result<()> {
        let released = self.detach(coroutine).map_err(Error::report)?;
        // Dropped outside the borrow: captured values may call back in.
        drop(released);
        log::debug!("closed {}", coroutine);
        Ok(())
    }

    fn detach(&self, coroutine: CoroutineHandle) -> Result<CoroutineEntry> {
        let mut state = self.state_mut();
        if coroutine == state.main {
            return Err(Error::invalid(coroutine, "the main coroutine cannot be closed"));
        }
        let entry = state
            .coroutines
            .get(coroutine.slot)
            .ok_or(Error::UnknownCoroutine(coroutine))?;
        if entry.state.is_alive() {
            return Err(Error::invalid(coroutine, "coroutine is still alive"));
        }
        match &entry.context {
            None => return Err(Error::invalid(coroutine, "context is in use")),
            Some(context) if context.is_entered() && !context.is_finished() => {
                return Err(Error::invalid(coroutine, "context has not finished"));
            }
            Some(_) => {}
        }
        state
            .coroutines
            .remove(coroutine.slot)
            .ok_or(Error::UnknownCoroutine(coroutine))
    }

    // ---- control transfer ----

    /// Entered and not yet finished (Running or Waiting).
    pub fn is_alive(&self, coroutine: CoroutineHandle) -> bool {
        self.state(coroutine).is_some_and(CoroutineState::is_alive)
    }

    /// True for Ready/Waiting coroutines other than main, and for the direct
    /// resumer of `current`.
    ///
    /// The direct resumer (main included) is reported resumable, but it is
    /// still executing further down the stack, so `resume` rejects it.
    pub fn is_resumable(&self, coroutine: CoroutineHandle) -> bool {
        self.inner.state.borrow().is_resumable(coroutine)
    }

    /// Transfer control into `coroutine` until it yields or finishes.
    ///
    /// On completion its deferred tasks run (with it still current), control
    /// returns to this caller's coroutine, and the record is released.
    /// `Ok` means the resume was accepted, not that the coroutine finished.
    pub fn resume(&self, coroutine: CoroutineHandle) -> Result<()> {
        let mut context = self.enter(coroutine).map_err(Error::report)?;
        log::trace!("resuming {}", coroutine);

        // `enter` turned finished contexts away, so this cannot fail.
        let _ = context.swap_in();

        let finished = context.is_finished();
        let panicked = context.panicked();
        if let Some(entry) = self.state_mut().coroutines.get_mut(coroutine.slot) {
            entry.context = Some(context);
        }
        if finished {
            self.complete(coroutine, panicked);
        }
        Ok(())
    }

    /// Validate a resume and commit its bookkeeping. Nothing changes on `Err`.
    fn enter(&self, coroutine: CoroutineHandle) -> Result<ExecutionContext> {
        let mut state = self.state_mut();
        if !state.coroutines.contains(coroutine.slot) {
            return Err(Error::UnknownCoroutine(coroutine));
        }
        if !state.is_resumable(coroutine) {
            return Err(Error::invalid(coroutine, "coroutine is not resumable"));
        }

        let current = state.current;
        let entry = state
            .coroutines
            .get_mut(coroutine.slot)
            .ok_or(Error::UnknownCoroutine(coroutine))?;
        let Some(context) = entry.context.take() else {
            let reason = if coroutine.is_main() {
                "the main coroutine has no context to switch into"
            } else {
                "coroutine is already on the resume chain"
            };
            return Err(Error::invalid(coroutine, reason));
        };
        if context.is_finished() {
            entry.context = Some(context);
            return Err(Error::invalid(coroutine, "coroutine has already finished"));
        }

        entry.state = CoroutineState::Running;
        entry.previous = Some(current);
        state.current = coroutine;
        Ok(context)
    }

    fn complete(&self, coroutine: CoroutineHandle, panicked: bool) {
        let ran = self.execute_deferred_tasks();

        {
            let mut state = self.state_mut();
            let main = state.main;
            if let Some(entry) = state.coroutines.get_mut(coroutine.slot) {
                let previous = entry.previous.unwrap_or(main);
                entry.state = CoroutineState::Finished;
                state.current = previous;
            }
        }
        if panicked {
            log::debug!("{} finished by panicking ({} deferred task(s))", coroutine, ran);
        } else {
            log::debug!("{} finished ({} deferred task(s))", coroutine, ran);
        }

        if let Err(err) = self.close(coroutine) {
            log::error!("{} finished but was not released: {}", coroutine, err);
        }
    }

    /// Suspend the current coroutine and return control to its resumer.
    ///
    /// Returns once something resumes it again. Fails without side effects
    /// on the main coroutine, or when not running on the current coroutine's
    /// own stack (for example from a deferred task).
    pub fn yield_now(&self) -> Result<()> {
        let (coroutine, suspender) = self.leave().map_err(Error::report)?;
        log::trace!("{} yielding", coroutine);
        suspender
            .swap_out()
            .map_err(|err| Error::from(err).report())
    }

    fn leave(&self) -> Result<(CoroutineHandle, Suspender)> {
        let mut state = self.state_mut();
        let (coroutine, suspender) = state.yield_point()?;
        let main = state.main;
        let entry = state
            .coroutines
            .get_mut(coroutine.slot)
            .ok_or(Error::UnknownCoroutine(coroutine))?;
        entry.state = CoroutineState::Waiting;
        let previous = entry.previous.unwrap_or(main);
        state.current = previous;
        Ok((coroutine, suspender))
    }

    // ---- introspection ----

    /// The coroutine holding control.
    pub fn current(&self) -> CoroutineHandle {
        self.borrow_state().current
    }

    /// The scheduler's own main coroutine (id 0).
    pub fn main(&self) -> CoroutineHandle {
        self.borrow_state().main
    }

    /// Walk the resume chain: 0 is its outermost coroutine, the last index is `current`.
    pub fn get_by_index(&self, index: usize) -> Option<CoroutineHandle> {
        let chain = self.borrow_state().chain();
        let depth = chain.len() - 1;
        if index > depth {
            return None;
        }
        chain.get(depth - index).copied()
    }

    /// Outermost coroutine of the current resume chain.
    pub fn get_root(&self) -> CoroutineHandle {
        self.get_by_index(0).unwrap_or_else(|| self.main())
    }

    /// State of a live record; `None` once released.
    pub fn state(&self, coroutine: CoroutineHandle) -> Option<CoroutineState> {
        self.inner
            .state
            .borrow()
            .coroutines
            .get(coroutine.slot)
            .map(|entry| entry.state)
    }

    /// Who last resumed `coroutine`.
    pub fn previous(&self, coroutine: CoroutineHandle) -> Option<CoroutineHandle> {
        self.inner
            .state
            .borrow()
            .coroutines
            .get(coroutine.slot)
            .and_then(|entry| entry.previous)
    }

    pub fn contains(&self, coroutine: CoroutineHandle) -> bool {
        self.inner.state.borrow().coroutines.contains(coroutine.slot)
    }

    /// Number of unreleased coroutines, not counting main.
    pub fn len(&self) -> usize {
        self.inner.state.borrow().coroutines.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn default_stack_size(&self) -> usize {
        self.inner.state.borrow().default_stack_size
    }

    pub fn event_loop(&self) -> Rc<dyn EventLoop> {
        self.inner.event_loop.clone()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Scheduler")
            .field("current", &state.current)
            .field("coroutines", &(state.coroutines.len() - 1))
            .field("next_id", &state.next_id)
            .finish()
    }
}
