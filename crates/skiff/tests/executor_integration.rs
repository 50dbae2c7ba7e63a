// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Executor integration tests
//!
//! Scheduling order, promise/listener threading, FIFO guarantees, and the
//! shutdown boundary, all through the public surface.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use skiff::executor::{EventLoop, EventLoopGroup, Executor, Promise};

fn shutdown(el: &EventLoop) {
    el.shutdown_gracefully(Duration::from_millis(10), Duration::from_secs(5))
        .sync()
        .expect("termination");
}

#[test]
fn test_scenario_s4_scheduled_ordering() {
    let el = EventLoop::new("it-s4").expect("loop");
    let order = Arc::new(Mutex::new(Vec::new()));

    let o = Arc::clone(&order);
    el.schedule(Duration::from_millis(10), move || o.lock().push('A'));
    let o = Arc::clone(&order);
    el.schedule(Duration::from_millis(5), move || o.lock().push('B'));
    let o = Arc::clone(&order);
    el.schedule(Duration::from_millis(10), move || o.lock().push('C'));

    thread::sleep(Duration::from_millis(100));
    assert_eq!(&*order.lock(), &['B', 'A', 'C']);
    shutdown(&el);
}

#[test]
fn test_scenario_s5_listener_on_executor_thread() {
    let el = EventLoop::new("it-s5").expect("loop");
    let promise: Promise<u32> = Promise::new(Some(Arc::new(el.clone()) as Arc<dyn Executor>));
    promise.set_success(42).expect("complete");

    let caller = thread::current().id();
    let seen = Arc::new(Mutex::new(None));
    let seen2 = Arc::clone(&seen);
    promise.future().add_listener(move |f| {
        *seen2.lock() = Some((
            *f.get_now().expect("value"),
            thread::current().id(),
        ));
    });

    // Listener runs asynchronously on the loop thread.
    let deadline = Instant::now() + Duration::from_secs(2);
    while seen.lock().is_none() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    let (value, listener_thread) = seen.lock().take().expect("listener ran");
    assert_eq!(value, 42);
    assert_ne!(
        listener_thread, caller,
        "listener must run on the executor, not the adding thread"
    );
    shutdown(&el);
}

#[test]
fn test_fifo_within_loop_across_many_tasks() {
    let el = EventLoop::new("it-fifo").expect("loop");
    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..500u32 {
        let order = Arc::clone(&order);
        el.execute(move || order.lock().push(i)).expect("execute");
    }
    el.submit(|| ()).sync().expect("barrier");
    assert_eq!(&*order.lock(), &(0..500).collect::<Vec<_>>());
    shutdown(&el);
}

#[test]
fn test_deadline_ordering_under_load() {
    let el = EventLoop::new("it-deadline").expect("loop");
    let order = Arc::new(Mutex::new(Vec::new()));
    // Interleave submission order against deadline order.
    let delays = [40u64, 10, 30, 20, 50];
    for (i, delay) in delays.iter().enumerate() {
        let order = Arc::clone(&order);
        el.schedule(Duration::from_millis(*delay), move || {
            order.lock().push(i);
        });
    }
    thread::sleep(Duration::from_millis(150));
    assert_eq!(&*order.lock(), &[1, 3, 2, 0, 4]);
    shutdown(&el);
}

#[test]
fn test_group_distribution_and_permanent_choice() {
    let group = EventLoopGroup::new(4).expect("group");
    // next() cycles; a handle captured once keeps pointing at one loop.
    let chosen = group.next().clone();
    let name = chosen.name().to_string();
    for _ in 0..16 {
        assert_eq!(chosen.name(), name);
    }
    group
        .shutdown_gracefully(Duration::from_millis(10), Duration::from_secs(5))
        .sync()
        .expect("shutdown");
}

#[test]
fn test_no_reordering_across_shutdown_boundary() {
    let el = EventLoop::new("it-boundary").expect("loop");
    let hits = Arc::new(AtomicUsize::new(0));
    for _ in 0..100 {
        let hits = Arc::clone(&hits);
        el.execute(move || {
            hits.fetch_add(1, Ordering::SeqCst);
        })
        .expect("execute");
    }
    el.shutdown_gracefully(Duration::from_millis(20), Duration::from_secs(5))
        .sync()
        .expect("termination");
    assert_eq!(
        hits.load(Ordering::SeqCst),
        100,
        "tasks submitted before shutdown all ran before termination"
    );
}

#[test]
fn test_await_timeout_returns_false_without_raising() {
    let el = EventLoop::new("it-timeout").expect("loop");
    let promise: Promise<()> = Promise::new(Some(Arc::new(el.clone()) as Arc<dyn Executor>));
    let done = promise
        .future()
        .await_timeout(Duration::from_millis(30))
        .expect("await_timeout");
    assert!(!done);
    promise.set_success(()).expect("late completion");
    shutdown(&el);
}

#[test]
fn test_cancelled_scheduled_task_skipped_on_dequeue() {
    let el = EventLoop::new("it-cancel").expect("loop");
    let hits = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..10 {
        let hits = Arc::clone(&hits);
        handles.push(el.schedule(Duration::from_millis(30), move || {
            hits.fetch_add(1, Ordering::SeqCst);
        }));
    }
    for handle in handles.iter().take(5) {
        assert!(handle.cancel());
    }
    thread::sleep(Duration::from_millis(100));
    assert_eq!(hits.load(Ordering::SeqCst), 5, "only live tasks ran");
    shutdown(&el);
}
