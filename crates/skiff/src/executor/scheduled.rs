// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Delay-ordered scheduled tasks.
//!
//! Tasks order by `(deadline, id)`; the id breaks ties deterministically so
//! two tasks sharing a deadline run in submission order. The heap itself is
//! single-consumer: it lives on the loop thread, and external submissions
//! travel through a lock-free queue that the loop drains before polling.
//! Cancellation marks the task; the loop skips marked tasks on dequeue.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How a task repeats after its first run.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Repeat {
    /// One-shot.
    None,
    /// Next deadline = previous deadline + period (catch-up on lag).
    FixedRate(Duration),
    /// Next deadline = completion time + delay.
    FixedDelay(Duration),
}

/// A task with a deadline, owned by the loop-thread heap.
pub(crate) struct ScheduledTask {
    pub(crate) deadline: Instant,
    pub(crate) id: u64,
    pub(crate) repeat: Repeat,
    pub(crate) task: Box<dyn FnMut() + Send>,
    pub(crate) cancelled: Arc<AtomicBool>,
}

impl ScheduledTask {
    #[inline]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Heap wrapper flipping `BinaryHeap`'s max order into deadline order.
struct ByDeadline(ScheduledTask);

impl PartialEq for ByDeadline {
    fn eq(&self, other: &Self) -> bool {
        self.0.deadline == other.0.deadline && self.0.id == other.0.id
    }
}

impl Eq for ByDeadline {}

impl PartialOrd for ByDeadline {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByDeadline {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed: the earliest (deadline, id) must surface first.
        (other.0.deadline, other.0.id).cmp(&(self.0.deadline, self.0.id))
    }
}

/// Deadline-ordered queue, accessed only from the owning loop thread.
pub(crate) struct ScheduledQueue {
    heap: BinaryHeap<ByDeadline>,
}

impl ScheduledQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub(crate) fn push(&mut self, task: ScheduledTask) {
        self.heap.push(ByDeadline(task));
    }

    /// Earliest live deadline, skimming cancelled tasks off the top.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(top) = self.heap.peek() {
            if top.0.is_cancelled() {
                self.heap.pop();
                continue;
            }
            return Some(top.0.deadline);
        }
        None
    }

    /// Pop the next task whose deadline is at or before `now`.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Option<ScheduledTask> {
        while let Some(top) = self.heap.peek() {
            if top.0.is_cancelled() {
                self.heap.pop();
                continue;
            }
            if top.0.deadline > now {
                return None;
            }
            return self.heap.pop().map(|e| e.0);
        }
        None
    }

    /// Cancel everything still queued (shutdown path).
    pub(crate) fn cancel_all(&mut self) {
        for entry in self.heap.drain() {
            entry.0.cancelled.store(true, Ordering::Release);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Caller-facing cancellation handle for a scheduled task.
#[derive(Clone)]
pub struct ScheduledHandle {
    cancelled: Arc<AtomicBool>,
}

impl ScheduledHandle {
    pub(crate) fn new(cancelled: Arc<AtomicBool>) -> Self {
        Self { cancelled }
    }

    /// Mark the task cancelled. Returns `true` when this call did the
    /// marking. A task already running is not interrupted; the
    /// `may_interrupt` flavor of other frameworks is informational here.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
