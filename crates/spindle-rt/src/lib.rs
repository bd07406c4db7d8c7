// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Spindle: cooperative, single-threaded coroutine scheduler.
//!
//! Coroutines are stackful and switch only at explicit points: `resume`
//! transfers control in, `yield_now` and `sleep` hand it back to whoever
//! resumed. Timed sleeps are driven by an event loop the scheduler does not
//! own; the host drives it (`TimerLoop::run_due` / `run`).
//!
//! Components:
//! - scheduler — lifecycle, resume/yield, resume-chain queries
//! - defer     — per-coroutine completion tasks
//! - sleep     — timed suspension on the event loop
//! - config    — defaults and `SPINDLE_*` environment overrides
//!
//! ```no_run
//! use std::time::Duration;
//! use spindle_rt::Scheduler;
//!
//! let sched = Scheduler::new();
//! sched
//!     .run(|s| {
//!         s.defer(|_| println!("done")).unwrap();
//!         s.sleep(Some(Duration::from_millis(10))).unwrap();
//!     })
//!     .unwrap();
//! spindle_rt::default_loop().run();
//! ```

mod arena;
pub mod config;
mod coroutine;
mod defer;
pub mod error;
mod scheduler;
mod sleep;

pub use config::{ConfigError, SchedulerConfig, ENV_DEFAULT_STACK_SIZE};
pub use coroutine::{CoroutineHandle, CoroutineState, MAIN_ID};
pub use error::{Error, Result};
pub use scheduler::{Scheduler, SchedulerBuilder};

pub use spindle_context::{DEFAULT_STACK_SIZE, MIN_STACK_SIZE};
pub use spindle_loop::{
    default_loop, Clock, EventLoop, LoopError, ManualClock, MonotonicClock, TimerId, TimerLoop,
};
