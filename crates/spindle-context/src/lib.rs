// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Execution contexts: one stack plus one saved register set.
//!
//! Thin wrapper over corosensei. The scheduler in `spindle-rt` only sees
//! `ExecutionContext` (driver side, `swap_in`) and `Suspender` (body side,
//! `swap_out`). All unsafe code lives in this file.
//!
//! A per-thread `ACTIVE` pointer records which context is executing on the
//! current stack. `swap_out` refuses to switch unless it names that context,
//! so a suspender can never be used from the wrong stack.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use std::rc::Rc;

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use thiserror::Error;

/// Stack size used when the caller has no preference (128 KiB).
pub const DEFAULT_STACK_SIZE: usize = 128 * 1024;

/// Smallest stack size accepted by configuration layers (16 KiB).
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Largest stack size passed on to the allocator; bigger requests fail up front.
pub const MAX_STACK_SIZE: usize = isize::MAX as usize / 2;

/// Errors raised by the context primitive.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to allocate a {size}-byte coroutine stack")]
    StackAllocation {
        size: usize,
        #[source]
        source: io::Error,
    },

    #[error("execution context has already finished")]
    Finished,

    #[error("execution context is not running on the current stack")]
    NotActive,
}

impl ContextError {
    /// OS error code behind the failure, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            ContextError::StackAllocation { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

type RawYielder = Yielder<(), ()>;

/// State shared between the driver side and the body running on the stack.
struct Link {
    /// Valid only while the body is on its stack (between entry and return).
    yielder: Cell<Option<NonNull<RawYielder>>>,
    /// Set when the context is being dropped while suspended.
    discarding: Cell<bool>,
    panicked: Cell<bool>,
}

thread_local! {
    /// Context whose stack is executing right now; null on the thread's own stack.
    static ACTIVE: Cell<*const Link> = const { Cell::new(ptr::null()) };
}

/// Restores the outer `ACTIVE` value when a `swap_in` returns, even by unwinding.
struct ActiveGuard {
    outer: *const Link,
}

impl ActiveGuard {
    fn enter(link: &Rc<Link>) -> Self {
        let outer = ACTIVE.with(|a| a.replace(Rc::as_ptr(link)));
        ActiveGuard { outer }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE.with(|a| a.set(self.outer));
    }
}

/// A stackful execution context running a single entry function.
///
/// Created suspended at the entry point. Freed by `Drop`.
pub struct ExecutionContext {
    coroutine: Coroutine<(), (), ()>,
    link: Rc<Link>,
    stack_size: usize,
}

impl ExecutionContext {
    /// Allocate a stack of at least `stack_size` bytes that will run `entry`.
    ///
    /// A panic escaping `entry` is caught on the context's own stack, logged,
    /// and recorded; the context then reports itself finished.
    pub fn new<F>(stack_size: usize, entry: F) -> Result<Self, ContextError>
    where
        F: FnOnce() + 'static,
    {
        if stack_size > MAX_STACK_SIZE {
            return Err(ContextError::StackAllocation {
                size: stack_size,
                source: io::Error::from(io::ErrorKind::OutOfMemory),
            });
        }
        let stack = DefaultStack::new(stack_size)
            .map_err(|source| ContextError::StackAllocation { size: stack_size, source })?;

        let link = Rc::new(Link {
            yielder: Cell::new(None),
            discarding: Cell::new(false),
            panicked: Cell::new(false),
        });

        let body_link = link.clone();
        let coroutine = Coroutine::with_stack(stack, move |yielder: &RawYielder, ()| {
            body_link.yielder.set(Some(NonNull::from(yielder)));
            let outcome = panic::catch_unwind(AssertUnwindSafe(entry));
            body_link.yielder.set(None);

            if let Err(payload) = outcome {
                // Forced unwinding from Drop must keep going up to corosensei.
                if body_link.discarding.get() {
                    panic::resume_unwind(payload);
                }
                body_link.panicked.set(true);
                log::error!("coroutine body panicked: {}", panic_message(payload.as_ref()));
            }
        });

        Ok(ExecutionContext {
            coroutine,
            link,
            stack_size,
        })
    }

    /// Run the context until it next suspends or its entry returns.
    pub fn swap_in(&mut self) -> Result<(), ContextError> {
        if self.coroutine.done() {
            return Err(ContextError::Finished);
        }

        let _active = ActiveGuard::enter(&self.link);
        match self.coroutine.resume(()) {
            CoroutineResult::Yield(()) => log::trace!("context suspended"),
            CoroutineResult::Return(()) => log::trace!("context finished"),
        }
        Ok(())
    }

    /// Handle the body uses to switch back out of this context.
    pub fn suspender(&self) -> Suspender {
        Suspender {
            link: self.link.clone(),
        }
    }

    /// True once the entry function has returned (or panicked).
    pub fn is_finished(&self) -> bool {
        self.coroutine.done()
    }

    /// True once `swap_in` has been called at least once.
    pub fn is_entered(&self) -> bool {
        self.coroutine.started()
    }

    /// True if the entry function ended by panicking.
    pub fn panicked(&self) -> bool {
        self.link.panicked.get()
    }

    /// Requested stack size in bytes.
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        // Field drops run after this; corosensei unwinds a suspended stack then.
        self.link.discarding.set(true);
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("stack_size", &self.stack_size)
            .field("entered", &self.is_entered())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Body-side handle of an `ExecutionContext`.
#[derive(Clone)]
pub struct Suspender {
    link: Rc<Link>,
}

impl Suspender {
    /// True if this context is the one executing on the current stack.
    pub fn is_active(&self) -> bool {
        let active = ACTIVE.with(|a| a.get());
        ptr::eq(active, Rc::as_ptr(&self.link)) && self.link.yielder.get().is_some()
    }

    /// Transfer control back to whoever last called `swap_in` on this context.
    ///
    /// Returns once the context is swapped in again.
    pub fn swap_out(&self) -> Result<(), ContextError> {
        if !self.is_active() {
            return Err(ContextError::NotActive);
        }
        let yielder = self.link.yielder.get().ok_or(ContextError::NotActive)?;
        // SAFETY: `is_active` proved we are on this context's stack and that its
        // body has not returned, so the yielder it published is still live.
        unsafe { yielder.as_ref() }.suspend(());
        Ok(())
    }
}

impl fmt::Debug for Suspender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspender")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Text of a panic payload caught with `catch_unwind`.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
