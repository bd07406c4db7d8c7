// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Timer loop on real time: ordering and minimum delay.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use spindle_loop::{EventLoop, TimerLoop};

#[test]
fn timers_fire_in_deadline_order_after_their_delay() {
    let _ = env_logger::builder().is_test(true).try_init();

    let timers = TimerLoop::new();
    let order = Rc::new(RefCell::new(Vec::new()));
    let start = Instant::now();

    for (label, ms) in [("slow", 30u64), ("fast", 10), ("mid", 20)] {
        let order = order.clone();
        timers
            .schedule_once(
                Duration::from_millis(ms),
                Box::new(move || order.borrow_mut().push((label, start.elapsed()))),
            )
            .unwrap();
    }

    assert_eq!(timers.run(), 3);
    let order = order.borrow();
    let labels: Vec<_> = order.iter().map(|(label, _)| *label).collect();
    assert_eq!(labels, vec!["fast", "mid", "slow"]);
    assert!(order[0].1 >= Duration::from_millis(10));
    assert!(order[2].1 >= Duration::from_millis(30));
}

#[test]
fn run_returns_immediately_when_idle() {
    let timers = TimerLoop::new();
    assert_eq!(timers.run(), 0);
    assert_eq!(timers.next_deadline(), None);
}
