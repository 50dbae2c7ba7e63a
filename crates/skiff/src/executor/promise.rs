// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Promise / future pair: writable and read-only views of an eventual
//! result with a listener chain.
//!
//! State is monotonic: pending -> {success, failure, cancelled}, never back.
//! Listeners run on the promise's executor; when added from the executor
//! thread below the recursion bound they run inline, otherwise they are
//! submitted as a task. Blocking waits from the owning executor thread fail
//! with [`Error::BlockingFromEventLoop`] to prevent self-deadlock.

use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::Executor;
use crate::config;
use crate::error::{Error, Result};

thread_local! {
    /// Inline listener recursion depth on this thread.
    static LISTENER_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Final state of a promise.
#[derive(Clone)]
pub enum Outcome<T> {
    Success(Arc<T>),
    Failure(Error),
    Cancelled,
}

type Listener<T> = Box<dyn FnOnce(&Future<T>) + Send>;

enum State<T> {
    Pending {
        listeners: Vec<Listener<T>>,
        uncancellable: bool,
        waiters: usize,
    },
    Done(Outcome<T>),
}

struct Inner<T> {
    state: Mutex<State<T>>,
    completed: Condvar,
    executor: Option<Arc<dyn Executor>>,
}

/// Writable side. Cloning shares the same underlying state.
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

/// Read-only side handed to consumers and listeners.
pub struct Future<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> Promise<T> {
    /// New pending promise. Listeners run on `executor`; with `None` they
    /// run inline on the completing (or adding) thread.
    pub fn new(executor: Option<Arc<dyn Executor>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Pending {
                    listeners: Vec::new(),
                    uncancellable: false,
                    waiters: 0,
                }),
                completed: Condvar::new(),
                executor,
            }),
        }
    }

    /// Read-only view.
    pub fn future(&self) -> Future<T> {
        Future {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Complete successfully; errors if already done.
    pub fn set_success(&self, value: T) -> Result<()> {
        if self.try_success(value) {
            Ok(())
        } else {
            Err(Error::PromiseAlreadyComplete)
        }
    }

    /// Complete successfully; `false` if already done.
    pub fn try_success(&self, value: T) -> bool {
        self.complete(Outcome::Success(Arc::new(value)))
    }

    /// Fail; errors if already done.
    pub fn set_failure(&self, cause: Error) -> Result<()> {
        if self.try_failure(cause) {
            Ok(())
        } else {
            Err(Error::PromiseAlreadyComplete)
        }
    }

    /// Fail; `false` if already done.
    pub fn try_failure(&self, cause: Error) -> bool {
        self.complete(Outcome::Failure(cause))
    }

    /// Cancel. Succeeds only from pending and not marked uncancellable.
    pub fn cancel(&self) -> bool {
        let listeners = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Pending {
                    uncancellable: true,
                    ..
                }
                | State::Done(_) => return false,
                State::Pending {
                    listeners, waiters, ..
                } => {
                    let had_waiters = *waiters > 0;
                    let listeners = std::mem::take(listeners);
                    *state = State::Done(Outcome::Cancelled);
                    if had_waiters {
                        self.inner.completed.notify_all();
                    }
                    listeners
                }
            }
        };
        let future = self.future();
        for listener in listeners {
            notify_listener(&self.inner, &future, listener);
        }
        true
    }

    /// Forbid cancellation. Returns `true` when the promise can still
    /// complete normally (pending, or already succeeded/failed).
    pub fn set_uncancellable(&self) -> bool {
        let mut state = self.inner.state.lock();
        match &mut *state {
            State::Pending { uncancellable, .. } => {
                *uncancellable = true;
                true
            }
            State::Done(Outcome::Cancelled) => false,
            State::Done(_) => true,
        }
    }

    fn complete(&self, outcome: Outcome<T>) -> bool {
        let listeners = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Done(_) => return false,
                State::Pending {
                    listeners, waiters, ..
                } => {
                    let had_waiters = *waiters > 0;
                    let listeners = std::mem::take(listeners);
                    *state = State::Done(outcome);
                    if had_waiters {
                        self.inner.completed.notify_all();
                    }
                    listeners
                }
            }
        };

        let future = self.future();
        for listener in listeners {
            notify_listener(&self.inner, &future, listener);
        }
        true
    }
}

impl<T: Send + Sync + 'static> Future<T> {
    #[inline]
    pub fn is_done(&self) -> bool {
        matches!(&*self.inner.state.lock(), State::Done(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(&*self.inner.state.lock(), State::Done(Outcome::Success(_)))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(&*self.inner.state.lock(), State::Done(Outcome::Cancelled))
    }

    /// Failure cause, if the promise failed (or a synthetic cause when
    /// cancelled).
    pub fn cause(&self) -> Option<Error> {
        match &*self.inner.state.lock() {
            State::Done(Outcome::Failure(e)) => Some(e.clone()),
            State::Done(Outcome::Cancelled) => Some(Error::Cancelled),
            _ => None,
        }
    }

    /// Result value if completed successfully.
    pub fn get_now(&self) -> Option<Arc<T>> {
        match &*self.inner.state.lock() {
            State::Done(Outcome::Success(v)) => Some(Arc::clone(v)),
            _ => None,
        }
    }

    /// Add a completion listener. Listeners are invoked in addition order;
    /// adding to a completed promise schedules immediate notification.
    pub fn add_listener(&self, listener: impl FnOnce(&Future<T>) + Send + 'static) {
        let boxed: Listener<T> = Box::new(listener);
        let run_now = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Pending { listeners, .. } => {
                    listeners.push(boxed);
                    None
                }
                State::Done(_) => Some(boxed),
            }
        };
        if let Some(listener) = run_now {
            notify_listener(&self.inner, self, listener);
        }
    }

    /// Block until done. Fails with [`Error::BlockingFromEventLoop`] when
    /// called from the promise's own executor thread.
    pub fn await_done(&self) -> Result<()> {
        self.check_dead_lock()?;
        let mut state = self.inner.state.lock();
        loop {
            match &mut *state {
                State::Done(_) => return Ok(()),
                State::Pending { waiters, .. } => {
                    *waiters += 1;
                }
            }
            self.inner.completed.wait(&mut state);
            if let State::Pending { waiters, .. } = &mut *state {
                *waiters -= 1;
            }
        }
    }

    /// Block until done or `timeout` elapses; `Ok(false)` on timeout.
    pub fn await_timeout(&self, timeout: Duration) -> Result<bool> {
        self.check_dead_lock()?;
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            match &mut *state {
                State::Done(_) => return Ok(true),
                State::Pending { waiters, .. } => {
                    *waiters += 1;
                }
            }
            let timed_out = self
                .inner
                .completed
                .wait_until(&mut state, deadline)
                .timed_out();
            if let State::Pending { waiters, .. } = &mut *state {
                *waiters -= 1;
                if timed_out {
                    return Ok(false);
                }
            }
        }
    }

    /// Block until done, then surface any failure.
    pub fn sync(&self) -> Result<()> {
        self.await_done()?;
        match &*self.inner.state.lock() {
            State::Done(Outcome::Success(_)) => Ok(()),
            State::Done(Outcome::Failure(e)) => Err(e.clone()),
            State::Done(Outcome::Cancelled) => Err(Error::Cancelled),
            State::Pending { .. } => unreachable!("await_done returned while pending"),
        }
    }

    fn check_dead_lock(&self) -> Result<()> {
        if let Some(executor) = &self.inner.executor {
            if executor.in_event_loop() {
                return Err(Error::BlockingFromEventLoop);
            }
        }
        Ok(())
    }
}

/// Run or schedule one listener per the notification rule: inline on the
/// executor thread below the recursion bound, a submitted task otherwise.
fn notify_listener<T: Send + Sync + 'static>(
    inner: &Arc<Inner<T>>,
    future: &Future<T>,
    listener: Listener<T>,
) {
    match &inner.executor {
        None => {
            listener(future);
        }
        Some(executor) => {
            let max_depth = config::max_listener_stack_depth();
            let inline = executor.in_event_loop()
                && LISTENER_DEPTH.with(|d| d.get()) < max_depth;
            if inline {
                LISTENER_DEPTH.with(|d| d.set(d.get() + 1));
                listener(future);
                LISTENER_DEPTH.with(|d| d.set(d.get() - 1));
            } else {
                let future = future.clone();
                let submitted = executor.execute(Box::new(move || {
                    listener(&future);
                }));
                if submitted.is_err() {
                    log::warn!("[promise] executor rejected listener notification");
                }
            }
        }
    }
}
