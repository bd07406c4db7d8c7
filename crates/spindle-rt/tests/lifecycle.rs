// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coroutine lifecycle: create, resume, yield, finish, close.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use spindle_rt::{CoroutineState, Error, Scheduler, MAIN_ID};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn new_scheduler_runs_on_main() {
    init();
    let sched = Scheduler::new();
    let main = sched.main();
    assert_eq!(main.id(), MAIN_ID);
    assert_eq!(sched.current(), main);
    assert_eq!(sched.get_root(), main);
    assert!(!sched.is_alive(main));
    assert_eq!(sched.len(), 0);
}

#[test]
fn ids_are_never_reused() {
    init();
    let sched = Scheduler::new();
    let a = sched.create(|_| {}).unwrap();
    sched.close(a).unwrap();
    let b = sched.create(|_| {}).unwrap();
    assert_eq!(a.id(), 1);
    assert_eq!(b.id(), 2);
    assert!(!sched.contains(a));
    assert!(sched.contains(b));
}

#[test]
fn yield_returns_to_resumer_and_resume_continues() {
    init();
    let sched = Scheduler::new();
    let steps = Rc::new(RefCell::new(Vec::new()));
    let body_steps = steps.clone();
    let co = sched
        .create(move |s| {
            body_steps.borrow_mut().push("first");
            s.yield_now().unwrap();
            body_steps.borrow_mut().push("second");
        })
        .unwrap();

    sched.resume(co).unwrap();
    assert_eq!(*steps.borrow(), vec!["first"]);
    assert_eq!(sched.current(), sched.main());
    assert_eq!(sched.state(co), Some(CoroutineState::Waiting));
    assert!(sched.is_alive(co));
    assert!(sched.is_resumable(co));
    assert!(sched.close(co).unwrap_err().is_invalid_state());

    sched.resume(co).unwrap();
    assert_eq!(*steps.borrow(), vec!["first", "second"]);
    assert!(!sched.contains(co));
    assert!(!sched.is_alive(co));
}

#[test]
fn running_coroutine_reports_running() {
    init();
    let sched = Scheduler::new();
    let seen = Rc::new(Cell::new(None));
    let body_seen = seen.clone();
    sched
        .run(move |s| body_seen.set(s.state(s.current())))
        .unwrap();
    assert_eq!(seen.get(), Some(CoroutineState::Running));
}

#[test]
fn deferred_tasks_run_fifo_before_resumer_regains_control() {
    init();
    let sched = Scheduler::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let body_log = log.clone();
    let co = sched
        .create(move |s| {
            let me = s.current();
            for n in 0..3 {
                let log = body_log.clone();
                s.defer(move |s| {
                    assert_eq!(s.current(), me);
                    log.borrow_mut().push(n);
                })
                .unwrap();
            }
            body_log.borrow_mut().push(100);
        })
        .unwrap();

    sched.resume(co).unwrap();
    assert_eq!(*log.borrow(), vec![100, 0, 1, 2]);
    assert_eq!(sched.current(), sched.main());
}

#[test]
fn finished_coroutine_handle_no_longer_resolves() {
    init();
    let sched = Scheduler::new();
    let flag = Rc::new(Cell::new(false));
    let body_flag = flag.clone();
    let co = sched
        .run(move |s| {
            let flag = body_flag.clone();
            s.defer(move |_| flag.set(true)).unwrap();
        })
        .unwrap();

    assert!(flag.get());
    assert!(!sched.is_alive(co));
    assert!(!sched.is_resumable(co));
    assert_eq!(sched.state(co), None);
    assert!(matches!(sched.resume(co), Err(Error::UnknownCoroutine(_))));
}

#[test]
fn never_run_coroutine_can_be_closed() {
    init();
    let sched = Scheduler::new();
    let ran = Rc::new(Cell::new(false));
    let body_ran = ran.clone();
    let co = sched.create(move |_| body_ran.set(true)).unwrap();
    sched.close(co).unwrap();
    assert!(!ran.get());
    assert_eq!(sched.len(), 0);
}

#[test]
fn resuming_main_is_rejected_without_side_effects() {
    init();
    let sched = Scheduler::new();
    let main = sched.main();
    let err = sched.resume(main).unwrap_err();
    assert!(err.is_invalid_state());
    assert_eq!(sched.current(), main);
    assert_eq!(sched.state(main), Some(CoroutineState::Ready));
}

#[test]
fn deferred_task_cannot_yield() {
    init();
    let sched = Scheduler::new();
    let outcome = Rc::new(RefCell::new(None));
    let body_outcome = outcome.clone();
    sched
        .run(move |s| {
            let outcome = body_outcome.clone();
            s.defer(move |s| *outcome.borrow_mut() = Some(s.yield_now().is_err()))
                .unwrap();
        })
        .unwrap();
    assert_eq!(*outcome.borrow(), Some(true));
    assert_eq!(sched.current(), sched.main());
}

#[test]
fn panicking_body_is_contained() {
    init();
    let sched = Scheduler::new();
    let deferred = Rc::new(Cell::new(false));
    let body_deferred = deferred.clone();
    let co = sched
        .run(move |s| {
            let deferred = body_deferred.clone();
            s.defer(move |_| deferred.set(true)).unwrap();
            panic!("boom");
        })
        .unwrap();
    assert!(deferred.get());
    assert!(!sched.contains(co));
    assert_eq!(sched.current(), sched.main());
}

#[test]
fn failed_stack_allocation_is_recoverable() {
    init();
    let sched = Scheduler::new();
    for size in [usize::MAX, 1usize << 60] {
        let err = sched.create_with_stack(size, |_| {}).unwrap_err();
        assert!(err.is_allocation(), "{err}");
        assert!(matches!(err, Error::Context(_)));
    }
    assert_eq!(sched.len(), 0);
    assert_eq!(sched.current(), sched.main());

    let next = sched.create(|_| {}).unwrap();
    assert_eq!(next.id(), 3);
}

#[test]
fn panicking_deferred_task_still_releases_its_coroutine() {
    init();
    let sched = Scheduler::new();
    let co = sched
        .run(|s| {
            s.defer(|_| panic!("cleanup failed")).unwrap();
        })
        .unwrap();
    assert!(!sched.contains(co));
    assert_eq!(sched.current(), sched.main());

    let follow_up = Rc::new(Cell::new(None));
    let seen = follow_up.clone();
    sched
        .run(move |s| seen.set(s.get_by_index(0)))
        .unwrap();
    assert_eq!(follow_up.get(), Some(sched.main()));
}
