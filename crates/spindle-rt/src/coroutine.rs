// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coroutine records: identity, state, resumption link, owned context.

use std::collections::VecDeque;
use std::fmt;

use spindle_context::{ExecutionContext, Suspender};

use crate::arena::ArenaIndex;
use crate::defer::DeferredTask;

/// Id of the scheduler's main coroutine.
pub const MAIN_ID: u64 = 0;

/// Coroutine lifecycle states.
///
/// `Ready --resume--> Running --yield--> Waiting --resume--> Running
/// --(entry returns)--> Finished --close--> (released)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineState {
    /// Created, never entered.
    Ready,
    /// On the resume chain; the innermost one is `current`.
    Running,
    /// Yielded, waiting for someone to resume it.
    Waiting,
    /// Entry returned; about to be released.
    Finished,
}

impl CoroutineState {
    /// Running or Waiting: entered and not yet finished.
    pub fn is_alive(self) -> bool {
        matches!(self, CoroutineState::Running | CoroutineState::Waiting)
    }
}

/// Copyable reference to a coroutine owned by a `Scheduler`.
///
/// Handles never dangle: once the coroutine is released, every lookup
/// through an old handle reports it as gone.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoroutineHandle {
    pub(crate) slot: ArenaIndex,
    id: u64,
}

impl CoroutineHandle {
    pub(crate) fn new(slot: ArenaIndex, id: u64) -> Self {
        Self { slot, id }
    }

    /// Numeric id, unique for the scheduler's lifetime. The main coroutine is 0.
    pub fn id(self) -> u64 {
        self.id
    }

    pub fn is_main(self) -> bool {
        self.id == MAIN_ID
    }
}

impl fmt::Debug for CoroutineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Coroutine({} @ {:?})", self.id, self.slot)
    }
}

impl fmt::Display for CoroutineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "coroutine #{}", self.id)
    }
}

/// Scheduler-owned record behind a handle.
pub(crate) struct CoroutineEntry {
    pub state: CoroutineState,
    pub previous: Option<CoroutineHandle>,
    /// `None` for the main coroutine, and while the context is swapped in.
    pub context: Option<ExecutionContext>,
    pub suspender: Option<Suspender>,
    pub deferred: VecDeque<DeferredTask>,
}

impl CoroutineEntry {
    pub fn main() -> Self {
        Self {
            state: CoroutineState::Ready,
            previous: None,
            context: None,
            suspender: None,
            deferred: VecDeque::new(),
        }
    }

    pub fn new(context: ExecutionContext) -> Self {
        Self {
            state: CoroutineState::Ready,
            previous: None,
            suspender: Some(context.suspender()),
            context: Some(context),
            deferred: VecDeque::new(),
        }
    }
}
