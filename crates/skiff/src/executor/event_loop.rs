// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Single-threaded event loop: task queue + scheduled queue + mio poll.
//!
//! # Architecture
//!
//! ```text
//! +------------------------------------------------------------+
//! |                        EventLoop                           |
//! |  +------------------------------------------------------+  |
//! |  |                     mio::Poll                        |  |
//! |  |  - registered I/O sources (token -> IoHandler)       |  |
//! |  |  - Waker (cross-thread task submissions)             |  |
//! |  +------------------------------------------------------+  |
//! |                            |                               |
//! |                            v                               |
//! |  +---------------+  +----------------+  +--------------+   |
//! |  |  I/O events   |  | expired        |  | task queue   |   |
//! |  |  dispatch     |  | scheduled      |  | (bounded)    |   |
//! |  +---------------+  +----------------+  +--------------+   |
//! +------------------------------------------------------------+
//! ```
//!
//! Everything bound to a loop (handlers, listeners, scheduled tasks) runs on
//! its one thread, serialized in submission order for non-scheduled tasks.
//! The only suspension points are the I/O poll and the idle wait. Task
//! processing is bounded by a time budget derived from the preceding I/O
//! slice so it cannot starve I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crossbeam::queue::{ArrayQueue, SegQueue};
use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::Mutex;

use super::promise::{Future, Promise};
use super::scheduled::{Repeat, ScheduledHandle, ScheduledQueue, ScheduledTask};
use super::{Executor, Task};
use crate::config;
use crate::error::{Error, Result};

/// Token reserved for the waker.
const WAKER_TOKEN: Token = Token(0);

/// First token handed to registered I/O sources.
const FIRST_IO_TOKEN: usize = 1;

/// Events processed per poll.
const MAX_EVENTS: usize = 256;

/// Tasks run between time-budget checks.
const TASK_BATCH: usize = 64;

// Loop lifecycle states.
const NOT_STARTED: u8 = 0;
const STARTED: u8 = 1;
const SHUTTING_DOWN: u8 = 2;
const SHUTDOWN: u8 = 3;
const TERMINATED: u8 = 4;

/// Behavior when the task queue is full.
#[derive(Clone, Copy, Debug)]
pub enum RejectionPolicy {
    /// Fail the submission (default).
    Error,
    /// Park the caller and retry a bounded number of times, then fail.
    Backoff {
        retries: usize,
        delay: Duration,
    },
    /// Drop the task with a log line.
    Drop,
}

/// Callback invoked on the loop thread when a registered source is ready.
pub trait IoHandler: Send + Sync {
    fn ready(&self, event: &mio::event::Event, event_loop: &EventLoop);
}

struct ShutdownParams {
    quiet_period: Duration,
    timeout: Duration,
    requested_at: Instant,
}

struct LoopShared {
    name: String,
    state: AtomicU8,
    tasks: ArrayQueue<Task>,
    /// Scheduled submissions, lifted into the loop-local heap before polls.
    incoming_scheduled: SegQueue<ScheduledTask>,
    waker: Waker,
    registry: mio::Registry,
    io_handlers: Mutex<HashMap<Token, Arc<dyn IoHandler>>>,
    next_token: AtomicUsize,
    next_task_id: AtomicU64,
    thread_id: OnceLock<ThreadId>,
    termination: Promise<()>,
    shutdown: Mutex<Option<ShutdownParams>>,
    hooks: Mutex<Vec<Task>>,
    rejection: RejectionPolicy,
}

/// Cloneable handle to one event loop. The loop thread starts with the
/// handle and stops through [`EventLoop::shutdown_gracefully`].
#[derive(Clone)]
pub struct EventLoop {
    shared: Arc<LoopShared>,
}

impl EventLoop {
    /// Spawn a loop thread with the default rejection policy.
    pub fn new(name: impl Into<String>) -> Result<EventLoop> {
        Self::with_policy(name, RejectionPolicy::Error)
    }

    /// Spawn a loop thread with an explicit queue-full policy.
    pub fn with_policy(name: impl Into<String>, rejection: RejectionPolicy) -> Result<EventLoop> {
        let name = name.into();
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        let registry = poll.registry().try_clone()?;

        let shared = Arc::new(LoopShared {
            name: name.clone(),
            state: AtomicU8::new(NOT_STARTED),
            tasks: ArrayQueue::new(config::max_pending_tasks()),
            incoming_scheduled: SegQueue::new(),
            waker,
            registry,
            io_handlers: Mutex::new(HashMap::new()),
            next_token: AtomicUsize::new(FIRST_IO_TOKEN),
            next_task_id: AtomicU64::new(0),
            thread_id: OnceLock::new(),
            termination: Promise::new(None),
            shutdown: Mutex::new(None),
            hooks: Mutex::new(Vec::new()),
            rejection,
        });

        let handle = EventLoop {
            shared: Arc::clone(&shared),
        };
        let thread_handle = handle.clone();
        thread::Builder::new()
            .name(name)
            .spawn(move || run_loop(thread_handle, poll))
            .map_err(Error::Io)?;
        Ok(handle)
    }

    /// Loop name (also the thread name).
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// True when called from this loop's thread.
    pub fn in_event_loop(&self) -> bool {
        let current = thread::current().id();
        self.shared.thread_id.get() == Some(&current)
    }

    // ------------------------------------------------------------------
    // Task submission
    // ------------------------------------------------------------------

    /// Enqueue a task; FIFO per submitting thread. Wakes the poll when
    /// submitted from outside the loop.
    pub fn execute(&self, f: impl FnOnce() + Send + 'static) -> Result<()> {
        self.execute_task(Box::new(f))
    }

    fn execute_task(&self, task: Task) -> Result<()> {
        if self.shared.state.load(Ordering::Acquire) >= SHUTDOWN {
            return Err(Error::ExecutorShutdown);
        }
        match self.shared.tasks.push(task) {
            Ok(()) => {
                if !self.in_event_loop() {
                    self.wakeup();
                }
                Ok(())
            }
            Err(rejected) => self.reject(rejected),
        }
    }

    fn reject(&self, mut task: Task) -> Result<()> {
        match self.shared.rejection {
            RejectionPolicy::Error => Err(Error::RejectedExecution(format!(
                "task queue full on {}",
                self.shared.name
            ))),
            RejectionPolicy::Drop => {
                log::debug!("[{}] task queue full, dropping task", self.shared.name);
                Ok(())
            }
            RejectionPolicy::Backoff { retries, delay } => {
                if self.in_event_loop() {
                    // Parking the loop thread on its own queue would deadlock.
                    return Err(Error::RejectedExecution(format!(
                        "task queue full on {} (loop thread cannot back off)",
                        self.shared.name
                    )));
                }
                for _ in 0..retries {
                    self.wakeup();
                    thread::park_timeout(delay);
                    match self.shared.tasks.push(task) {
                        Ok(()) => {
                            self.wakeup();
                            return Ok(());
                        }
                        Err(back) => task = back,
                    }
                }
                Err(Error::RejectedExecution(format!(
                    "task queue full on {} after backoff",
                    self.shared.name
                )))
            }
        }
    }

    /// Run `f` on the loop and complete the returned future with its value.
    pub fn submit<T, F>(&self, f: F) -> Future<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let promise: Promise<T> =
            Promise::new(Some(Arc::new(self.clone()) as Arc<dyn Executor>));
        let completion = promise.clone();
        if let Err(e) = self.execute(move || {
            completion.try_success(f());
        }) {
            promise.try_failure(e);
        }
        promise.future()
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Run `f` once after `delay`.
    pub fn schedule(&self, delay: Duration, f: impl FnOnce() + Send + 'static) -> ScheduledHandle {
        let mut f = Some(f);
        self.schedule_task(
            delay,
            Repeat::None,
            Box::new(move || {
                if let Some(f) = f.take() {
                    f();
                }
            }),
        )
    }

    /// Run `f` every `period`, first run after `initial_delay`. Deadlines
    /// advance by the period (lag is caught up, not dropped).
    pub fn schedule_at_fixed_rate(
        &self,
        initial_delay: Duration,
        period: Duration,
        f: impl FnMut() + Send + 'static,
    ) -> ScheduledHandle {
        self.schedule_task(initial_delay, Repeat::FixedRate(period), Box::new(f))
    }

    /// Run `f` repeatedly with `delay` between a completion and the next
    /// start.
    pub fn schedule_with_fixed_delay(
        &self,
        initial_delay: Duration,
        delay: Duration,
        f: impl FnMut() + Send + 'static,
    ) -> ScheduledHandle {
        self.schedule_task(initial_delay, Repeat::FixedDelay(delay), Box::new(f))
    }

    fn schedule_task(
        &self,
        delay: Duration,
        repeat: Repeat,
        task: Box<dyn FnMut() + Send>,
    ) -> ScheduledHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = ScheduledHandle::new(Arc::clone(&cancelled));
        if self.shared.state.load(Ordering::Acquire) >= SHUTDOWN {
            handle.cancel();
            return handle;
        }
        self.shared.incoming_scheduled.push(ScheduledTask {
            deadline: Instant::now() + delay,
            id: self.shared.next_task_id.fetch_add(1, Ordering::Relaxed),
            repeat,
            task,
            cancelled,
        });
        self.wakeup();
        handle
    }

    // ------------------------------------------------------------------
    // I/O registration
    // ------------------------------------------------------------------

    /// Register a readiness source; `handler.ready` runs on the loop thread
    /// whenever the source becomes ready.
    pub fn register_io<S>(
        &self,
        source: &mut S,
        interests: Interest,
        handler: Arc<dyn IoHandler>,
    ) -> Result<Token>
    where
        S: mio::event::Source + ?Sized,
    {
        let token = Token(self.shared.next_token.fetch_add(1, Ordering::Relaxed));
        self.shared.io_handlers.lock().insert(token, handler);
        if let Err(e) = self.shared.registry.register(source, token, interests) {
            self.shared.io_handlers.lock().remove(&token);
            return Err(Error::Io(e));
        }
        Ok(token)
    }

    /// Remove a source registered with [`Self::register_io`].
    pub fn deregister_io<S>(&self, source: &mut S, token: Token) -> Result<()>
    where
        S: mio::event::Source + ?Sized,
    {
        self.shared.registry.deregister(source)?;
        self.shared.io_handlers.lock().remove(&token);
        Ok(())
    }

    /// Wake a poll blocked in I/O (submissions do this automatically).
    pub fn wakeup(&self) {
        if let Err(e) = self.shared.waker.wake() {
            log::debug!("[{}] waker failed: {}", self.shared.name, e);
        }
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Begin graceful shutdown: tasks keep being accepted until the quiet
    /// period elapses with no activity (and the queues are empty) or the
    /// timeout expires. Returns the termination future.
    pub fn shutdown_gracefully(&self, quiet_period: Duration, timeout: Duration) -> Future<()> {
        {
            let mut params = self.shared.shutdown.lock();
            if params.is_none() {
                *params = Some(ShutdownParams {
                    quiet_period,
                    timeout,
                    requested_at: Instant::now(),
                });
            }
        }
        // NOT_STARTED/STARTED -> SHUTTING_DOWN; later states keep.
        let _ = self.shared.state.fetch_max(SHUTTING_DOWN, Ordering::AcqRel);
        self.wakeup();
        self.termination_future()
    }

    /// [`Self::shutdown_gracefully`] with the default 2 s quiet period and
    /// 15 s timeout.
    pub fn shutdown_gracefully_default(&self) -> Future<()> {
        self.shutdown_gracefully(Duration::from_secs(2), Duration::from_secs(15))
    }

    /// Register a hook to run on the loop thread during termination. Hooks
    /// may enqueue further hooks.
    pub fn add_shutdown_hook(&self, f: impl FnOnce() + Send + 'static) {
        self.shared.hooks.lock().push(Box::new(f));
    }

    /// Completes once the loop has fully terminated.
    pub fn termination_future(&self) -> Future<()> {
        self.shared.termination.future()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) >= SHUTTING_DOWN
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) >= SHUTDOWN
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == TERMINATED
    }

    /// Block until terminated or `timeout`; `Ok(false)` on timeout.
    pub fn await_termination(&self, timeout: Duration) -> Result<bool> {
        self.termination_future().await_timeout(timeout)
    }
}

impl Executor for EventLoop {
    fn execute(&self, task: Task) -> Result<()> {
        self.execute_task(task)
    }

    fn in_event_loop(&self) -> bool {
        EventLoop::in_event_loop(self)
    }
}

// ============================================================================
// The loop body
// ============================================================================

fn run_loop(event_loop: EventLoop, mut poll: Poll) {
    let shared = Arc::clone(&event_loop.shared);
    let _ = shared.thread_id.set(thread::current().id());
    let _ = shared
        .state
        .compare_exchange(NOT_STARTED, STARTED, Ordering::AcqRel, Ordering::Acquire);

    let mut events = Events::with_capacity(MAX_EVENTS);
    let mut scheduled = ScheduledQueue::new();
    let mut last_activity = Instant::now();
    let mut scheduled_cancelled_for_shutdown = false;

    loop {
        // Lift external schedule submissions into the heap.
        while let Some(task) = shared.incoming_scheduled.pop() {
            scheduled.push(task);
        }

        let timeout = poll_timeout(&shared, &mut scheduled);
        match poll.poll(&mut events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::error!("[{}] poll failed: {}", shared.name, e);
                thread::sleep(Duration::from_millis(10));
                continue;
            }
        }

        // I/O phase.
        let io_start = Instant::now();
        for event in events.iter() {
            if event.token() == WAKER_TOKEN {
                continue; // wake-up signal, never surfaced to handlers
            }
            let handler = shared.io_handlers.lock().get(&event.token()).cloned();
            match handler {
                Some(handler) => handler.ready(event, &event_loop),
                None => log::debug!(
                    "[{}] event for unregistered token {:?}",
                    shared.name,
                    event.token()
                ),
            }
        }
        let io_time = io_start.elapsed();

        // Scheduled phase: run everything expired, in (deadline, id) order.
        let mut ran_any = run_expired(&shared, &mut scheduled);

        // Task phase, bounded so it cannot starve I/O.
        let budget = task_budget(io_time);
        ran_any |= run_all_tasks(&shared, budget);

        if ran_any {
            last_activity = Instant::now();
        }

        // Shutdown handling.
        if shared.state.load(Ordering::Acquire) >= SHUTTING_DOWN {
            if !scheduled_cancelled_for_shutdown {
                scheduled.cancel_all();
                scheduled_cancelled_for_shutdown = true;
            }
            if confirm_shutdown(&shared, last_activity) {
                break;
            }
        }
    }

    // Termination: no more submissions, drain stragglers, run hooks.
    shared.state.store(SHUTDOWN, Ordering::Release);
    run_all_tasks(&shared, Duration::from_millis(100));
    scheduled.cancel_all();
    run_shutdown_hooks(&shared);

    drop(poll); // closes the readiness primitive
    shared.state.store(TERMINATED, Ordering::Release);
    shared.termination.try_success(());
    log::debug!("[{}] event loop terminated", shared.name);
}

fn poll_timeout(shared: &LoopShared, scheduled: &mut ScheduledQueue) -> Duration {
    if !shared.tasks.is_empty() {
        return Duration::ZERO;
    }
    let max_wait = if shared.state.load(Ordering::Acquire) >= SHUTTING_DOWN {
        Duration::from_millis(10)
    } else {
        Duration::from_millis(config::DEFAULT_MAX_POLL_WAIT_MS)
    };
    match scheduled.next_deadline() {
        Some(deadline) => deadline
            .saturating_duration_since(Instant::now())
            .min(max_wait),
        None => max_wait,
    }
}

fn task_budget(io_time: Duration) -> Duration {
    // Task slice sized against the I/O slice (50/50 by default), with a
    // floor so tasks make progress on an idle loop.
    let scaled = io_time * (config::DEFAULT_TASK_RATIO_PERCENT as u32) / 50;
    scaled.max(Duration::from_millis(1))
}

fn run_expired(shared: &LoopShared, scheduled: &mut ScheduledQueue) -> bool {
    let mut ran = false;
    let now = Instant::now();
    while let Some(mut entry) = scheduled.pop_expired(now) {
        if entry.is_cancelled() {
            continue;
        }
        (entry.task)();
        ran = true;
        match entry.repeat {
            Repeat::None => {}
            Repeat::FixedRate(period) => {
                if !entry.is_cancelled() {
                    entry.deadline += period;
                    entry.id = shared.next_task_id.fetch_add(1, Ordering::Relaxed);
                    scheduled.push(entry);
                }
            }
            Repeat::FixedDelay(delay) => {
                if !entry.is_cancelled() {
                    entry.deadline = Instant::now() + delay;
                    entry.id = shared.next_task_id.fetch_add(1, Ordering::Relaxed);
                    scheduled.push(entry);
                }
            }
        }
    }
    ran
}

fn run_all_tasks(shared: &LoopShared, budget: Duration) -> bool {
    let start = Instant::now();
    let mut ran = false;
    loop {
        for _ in 0..TASK_BATCH {
            match shared.tasks.pop() {
                Some(task) => {
                    task();
                    ran = true;
                }
                None => return ran,
            }
        }
        if start.elapsed() >= budget {
            return ran;
        }
    }
}

fn confirm_shutdown(shared: &LoopShared, last_activity: Instant) -> bool {
    let params = shared.shutdown.lock();
    let Some(params) = params.as_ref() else {
        return true; // shutting down without parameters: stop immediately
    };
    let now = Instant::now();
    if now >= params.requested_at + params.timeout {
        return true;
    }
    shared.tasks.is_empty()
        && shared.incoming_scheduled.is_empty()
        && now.saturating_duration_since(last_activity) >= params.quiet_period
}

fn run_shutdown_hooks(shared: &LoopShared) {
    // Hooks may enqueue more hooks; drain until stable.
    loop {
        let batch: Vec<Task> = std::mem::take(&mut *shared.hooks.lock());
        if batch.is_empty() {
            return;
        }
        for hook in batch {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn quick_shutdown(el: &EventLoop) {
        el.shutdown_gracefully(Duration::from_millis(10), Duration::from_secs(5))
            .sync()
            .expect("termination");
    }

    #[test]
    fn test_execute_runs_on_loop_thread() {
        let el = EventLoop::new("t-exec").expect("loop");
        let f = el.submit(|| thread::current().name().map(String::from));
        f.sync().expect("submit");
        assert_eq!(
            f.get_now().expect("value").as_deref(),
            Some("t-exec"),
            "task must run on the loop thread"
        );
        quick_shutdown(&el);
    }

    #[test]
    fn test_fifo_order_from_one_thread() {
        let el = EventLoop::new("t-fifo").expect("loop");
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..64 {
            let order = Arc::clone(&order);
            el.execute(move || order.lock().push(i)).expect("execute");
        }
        let done = el.submit(|| ());
        done.sync().expect("flush");
        assert_eq!(&*order.lock(), &(0..64).collect::<Vec<_>>());
        quick_shutdown(&el);
    }

    #[test]
    fn test_in_event_loop_detection() {
        let el = EventLoop::new("t-inloop").expect("loop");
        assert!(!el.in_event_loop());
        let el2 = el.clone();
        let f = el.submit(move || el2.in_event_loop());
        f.sync().expect("submit");
        assert_eq!(*f.get_now().expect("value"), true);
        quick_shutdown(&el);
    }

    #[test]
    fn test_scheduled_ordering_s4() {
        let el = EventLoop::new("t-sched").expect("loop");
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        el.schedule(Duration::from_millis(10), move || o.lock().push('A'));
        let o = Arc::clone(&order);
        el.schedule(Duration::from_millis(5), move || o.lock().push('B'));
        let o = Arc::clone(&order);
        el.schedule(Duration::from_millis(10), move || o.lock().push('C'));

        thread::sleep(Duration::from_millis(80));
        assert_eq!(&*order.lock(), &['B', 'A', 'C']);
        quick_shutdown(&el);
    }

    #[test]
    fn test_scheduled_cancellation() {
        let el = EventLoop::new("t-cancel").expect("loop");
        let hits = Arc::new(AtomicUsize::new(0));
        let h2 = Arc::clone(&hits);
        let handle = el.schedule(Duration::from_millis(30), move || {
            h2.fetch_add(1, Ordering::SeqCst);
        });
        assert!(handle.cancel());
        thread::sleep(Duration::from_millis(80));
        assert_eq!(hits.load(Ordering::SeqCst), 0, "cancelled task must not run");
        quick_shutdown(&el);
    }

    #[test]
    fn test_fixed_rate_repeats() {
        let el = EventLoop::new("t-rate").expect("loop");
        let hits = Arc::new(AtomicUsize::new(0));
        let h2 = Arc::clone(&hits);
        let handle = el.schedule_at_fixed_rate(
            Duration::from_millis(5),
            Duration::from_millis(10),
            move || {
                h2.fetch_add(1, Ordering::SeqCst);
            },
        );
        thread::sleep(Duration::from_millis(100));
        handle.cancel();
        let seen = hits.load(Ordering::SeqCst);
        assert!(seen >= 3, "periodic task ran {} times", seen);
        let after_cancel = hits.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert!(
            hits.load(Ordering::SeqCst) <= after_cancel + 1,
            "cancellation stops repetition"
        );
        quick_shutdown(&el);
    }

    #[test]
    fn test_submit_failure_surfaces_on_future() {
        let el = EventLoop::new("t-reject").expect("loop");
        quick_shutdown(&el);
        // Loop is terminated: submissions fail via the future.
        let f = el.submit(|| 42u32);
        assert!(f.is_done());
        assert!(matches!(f.cause(), Some(Error::ExecutorShutdown)));
    }

    #[test]
    fn test_shutdown_runs_pending_tasks_first() {
        let el = EventLoop::new("t-drain").expect("loop");
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..16 {
            let order = Arc::clone(&order);
            el.execute(move || order.lock().push(i)).expect("execute");
        }
        el.shutdown_gracefully(Duration::from_millis(10), Duration::from_secs(5))
            .sync()
            .expect("termination");
        assert_eq!(
            &*order.lock(),
            &(0..16).collect::<Vec<_>>(),
            "tasks submitted before shutdown run before termination"
        );
    }

    #[test]
    fn test_shutdown_hooks_run_and_may_enqueue() {
        let el = EventLoop::new("t-hooks").expect("loop");
        let hits = Arc::new(AtomicUsize::new(0));
        let h1 = Arc::clone(&hits);
        let el2 = el.clone();
        let h2 = Arc::clone(&hits);
        el.add_shutdown_hook(move || {
            h1.fetch_add(1, Ordering::SeqCst);
            el2.add_shutdown_hook(move || {
                h2.fetch_add(10, Ordering::SeqCst);
            });
        });
        quick_shutdown(&el);
        assert_eq!(hits.load(Ordering::SeqCst), 11, "both hook generations ran");
    }

    #[test]
    fn test_blocking_await_from_loop_fails() {
        let el = EventLoop::new("t-block").expect("loop");
        let el2 = el.clone();
        let f = el.submit(move || {
            let inner = el2.submit(|| 1u32);
            // Awaiting a loop-bound future from its own loop must fail fast.
            matches!(inner.await_done(), Err(Error::BlockingFromEventLoop))
        });
        f.sync().expect("submit");
        assert_eq!(*f.get_now().expect("value"), true);
        quick_shutdown(&el);
    }

    #[test]
    fn test_termination_future_listener() {
        let el = EventLoop::new("t-term").expect("loop");
        let hit = Arc::new(AtomicUsize::new(0));
        let h2 = Arc::clone(&hit);
        el.termination_future().add_listener(move |_| {
            h2.fetch_add(1, Ordering::SeqCst);
        });
        quick_shutdown(&el);
        assert!(el.is_terminated());
        assert_eq!(hit.load(Ordering::SeqCst), 1);
    }
}
