// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Timed sleep driven by virtual and real clocks.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use spindle_rt::{Error, LoopError, ManualClock, Scheduler, TimerLoop};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn virtual_time() -> (Rc<ManualClock>, Rc<TimerLoop>, Scheduler) {
    let clock = Rc::new(ManualClock::new());
    let timers = Rc::new(TimerLoop::with_clock(clock.clone()));
    let sched = Scheduler::builder()
        .event_loop(timers.clone())
        .build()
        .unwrap();
    (clock, timers, sched)
}

#[test]
fn sleep_wakes_only_after_its_delay() {
    init();
    let (clock, timers, sched) = virtual_time();
    let woke = Rc::new(Cell::new(false));
    let body_woke = woke.clone();
    let co = sched
        .run(move |s| {
            s.sleep(Some(Duration::from_millis(100))).unwrap();
            body_woke.set(true);
        })
        .unwrap();
    assert!(sched.is_alive(co));

    clock.advance(Duration::from_millis(99));
    assert_eq!(timers.run_due(), 0);
    assert!(!woke.get());

    clock.advance(Duration::from_millis(1));
    assert_eq!(timers.run_due(), 1);
    assert!(woke.get());
    assert!(!sched.contains(co));
    assert_eq!(sched.current(), sched.main());
}

#[test]
fn sleep_none_waits_for_explicit_resume() {
    init();
    let (clock, timers, sched) = virtual_time();
    let woke = Rc::new(Cell::new(false));
    let body_woke = woke.clone();
    let co = sched
        .run(move |s| {
            s.sleep(None).unwrap();
            body_woke.set(true);
        })
        .unwrap();

    assert_eq!(timers.pending(), 0);
    clock.advance(Duration::from_secs(60));
    timers.run_due();
    assert!(!woke.get());

    sched.resume(co).unwrap();
    assert!(woke.get());
}

#[test]
fn sleepers_wake_in_deadline_order() {
    init();
    let (_, timers, sched) = virtual_time();
    let order = Rc::new(RefCell::new(Vec::new()));
    for (label, ms) in [("c", 30u64), ("a", 10), ("b", 20)] {
        let order = order.clone();
        sched
            .run(move |s| {
                s.sleep(Some(Duration::from_millis(ms))).unwrap();
                order.borrow_mut().push(label);
            })
            .unwrap();
    }
    assert_eq!(timers.run(), 3);
    assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
    assert!(sched.is_empty());
}

#[test]
fn closed_loop_fails_sleep_without_yielding() {
    init();
    let (_, timers, sched) = virtual_time();
    timers.close();
    let outcome = Rc::new(RefCell::new(None));
    let body_outcome = outcome.clone();
    let co = sched
        .run(move |s| {
            let err = s.sleep(Some(Duration::from_millis(5))).unwrap_err();
            *body_outcome.borrow_mut() = Some(matches!(err, Error::Timer(LoopError::Closed)));
        })
        .unwrap();
    assert_eq!(*outcome.borrow(), Some(true));
    assert!(!sched.contains(co));
}

#[test]
fn sleep_on_wall_clock_waits_at_least_the_delay() {
    init();
    let timers = Rc::new(TimerLoop::new());
    let sched = Scheduler::builder()
        .event_loop(timers.clone())
        .build()
        .unwrap();
    let elapsed = Rc::new(Cell::new(None));
    let body_elapsed = elapsed.clone();
    let start = Instant::now();
    sched
        .run(move |s| {
            s.sleep(Some(Duration::from_millis(20))).unwrap();
            body_elapsed.set(Some(start.elapsed()));
        })
        .unwrap();

    assert_eq!(timers.run(), 1);
    assert!(elapsed.get().unwrap() >= Duration::from_millis(20));
}
