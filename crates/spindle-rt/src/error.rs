// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scheduler errors.
//!
//! Every failure is recoverable. Operations return `Err` after leaving the
//! scheduler consistent; `Error::report` is the diagnostics sink.

use std::collections::TryReserveError;

use spindle_context::ContextError;
use spindle_loop::LoopError;
use thiserror::Error;

use crate::coroutine::CoroutineHandle;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Entity slot, stack, timer or deferred-task storage could not be allocated.
    #[error("cannot allocate {what}")]
    Allocation {
        what: &'static str,
        #[source]
        source: TryReserveError,
    },

    #[error("execution context failure")]
    Context(#[from] ContextError),

    #[error("failed to register timer")]
    Timer(#[from] LoopError),

    #[error("{coroutine}: {reason}")]
    InvalidState {
        coroutine: CoroutineHandle,
        reason: &'static str,
    },

    #[error("{0} no longer exists")]
    UnknownCoroutine(CoroutineHandle),
}

impl Error {
    pub(crate) fn allocation(what: &'static str, source: TryReserveError) -> Self {
        Error::Allocation { what, source }
    }

    pub(crate) fn invalid(coroutine: CoroutineHandle, reason: &'static str) -> Self {
        Error::InvalidState { coroutine, reason }
    }

    /// True for failures to obtain memory or OS resources.
    pub fn is_allocation(&self) -> bool {
        matches!(
            self,
            Error::Allocation { .. }
                | Error::Context(ContextError::StackAllocation { .. })
                | Error::Timer(LoopError::Allocation(_))
        )
    }

    /// True for rejected state transitions (including stale handles).
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Error::InvalidState { .. } | Error::UnknownCoroutine(_))
    }

    /// OS error code behind the failure, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Context(err) => err.raw_os_error(),
            _ => None,
        }
    }

    /// Emit the failure as a warning and hand it back.
    pub(crate) fn report(self) -> Self {
        let detail = std::error::Error::source(&self)
            .map(|source| format!(": {source}"))
            .unwrap_or_default();
        match self.raw_os_error() {
            Some(code) => log::warn!("{self}{detail} (os error {code})"),
            None => log::warn!("{self}{detail}"),
        }
        self
    }
}
