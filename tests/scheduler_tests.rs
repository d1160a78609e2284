//! Scheduler loop behavior observed from outside the thread.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use asyncsql_core::error::AsyncSqlError;
use common::{started_scheduler, wait_until};
use parking_lot::Mutex;

#[test]
fn test_items_run_in_registration_order_each_tick() {
    let scheduler = started_scheduler();
    let order = Arc::new(Mutex::new(Vec::new()));
    let go = Arc::new(AtomicBool::new(false));

    for name in ["first", "second", "third"] {
        let order = order.clone();
        let go = go.clone();
        scheduler
            .add_work_item(name, move || {
                if !go.load(Ordering::SeqCst) {
                    return;
                }
                let mut order = order.lock();
                if order.len() < 9 {
                    order.push(name);
                }
            })
            .unwrap();
    }
    go.store(true, Ordering::SeqCst);

    assert!(wait_until(Duration::from_secs(2), || order.lock().len() == 9));
    scheduler.stop();

    let order = order.lock();
    // The tick that saw the flag flip may be partial; every tick after it is whole
    let start = order.iter().position(|n| *n == "first").unwrap();
    for window in order[start..].chunks_exact(3) {
        assert_eq!(window, ["first", "second", "third"]);
    }
}

#[test]
fn test_repeating_item_respects_period() {
    let scheduler = started_scheduler();
    let fired = Arc::new(Mutex::new(Vec::new()));
    let registered = Instant::now();

    let sink = fired.clone();
    scheduler
        .run_repeating(
            "heartbeat",
            move || sink.lock().push(Instant::now()),
            Duration::from_millis(50),
        )
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || fired.lock().len() >= 2));
    scheduler.stop();

    let fired = fired.lock();
    assert!(fired[0] - registered >= Duration::from_millis(50));
    assert!(fired[1] - fired[0] >= Duration::from_millis(50));
}

#[test]
fn test_run_once_fires_exactly_once() {
    let scheduler = started_scheduler();
    let count = Arc::new(AtomicUsize::new(0));

    let counter = count.clone();
    scheduler
        .run_once(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || count.load(Ordering::SeqCst) == 1));
    let ticks = scheduler.tick_count();
    assert!(wait_until(Duration::from_secs(2), || scheduler.tick_count() > ticks + 10));
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(wait_until(Duration::from_secs(2), || scheduler.work_item_count() == 0));
    scheduler.stop();
}

#[test]
fn test_work_item_can_schedule_more_work() {
    let scheduler = started_scheduler();
    let done = Arc::new(AtomicUsize::new(0));

    let inner_scheduler = scheduler.clone();
    let flag = done.clone();
    scheduler
        .run_once(move || {
            let flag = flag.clone();
            inner_scheduler
                .run_once(move || {
                    flag.store(1, Ordering::SeqCst);
                })
                .unwrap();
        })
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || done.load(Ordering::SeqCst) == 1));
    scheduler.stop();
}

#[test]
fn test_stopped_scheduler_rejects_work() {
    let scheduler = started_scheduler();
    scheduler.stop();
    assert_eq!(
        scheduler.add_work_item("late", || {}),
        Err(AsyncSqlError::SchedulerNotRunning)
    );
}
