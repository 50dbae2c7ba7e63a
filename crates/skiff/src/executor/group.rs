// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Fixed-size pool of event loops with a round-robin chooser.
//!
//! For a power-of-two loop count the chooser masks the counter
//! (`counter & (n-1)`); otherwise it takes the counter modulo `n` on 64 bits
//! so overflow cannot skew the distribution. A channel registered through
//! [`EventLoopGroup::next`] keeps its loop for life.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::event_loop::{EventLoop, RejectionPolicy};
use super::promise::{Future, Promise};
use crate::error::Result;

enum Chooser {
    /// `counter & (n - 1)` for power-of-two counts.
    PowerOfTwo(AtomicU64),
    /// `counter % n` otherwise.
    Generic(AtomicU64),
}

impl Chooser {
    fn new(n: usize) -> Self {
        if n.is_power_of_two() {
            Chooser::PowerOfTwo(AtomicU64::new(0))
        } else {
            Chooser::Generic(AtomicU64::new(0))
        }
    }

    fn next(&self, n: usize) -> usize {
        match self {
            Chooser::PowerOfTwo(counter) => {
                (counter.fetch_add(1, Ordering::Relaxed) & (n as u64 - 1)) as usize
            }
            Chooser::Generic(counter) => {
                (counter.fetch_add(1, Ordering::Relaxed) % n as u64) as usize
            }
        }
    }
}

/// A fixed array of loops plus the chooser picking the next one.
pub struct EventLoopGroup {
    loops: Vec<EventLoop>,
    chooser: Chooser,
}

impl EventLoopGroup {
    /// Spawn `n` loops named `skiff-loop-<i>`.
    pub fn new(n: usize) -> Result<Self> {
        Self::with_policy(n, RejectionPolicy::Error)
    }

    /// Spawn `n` loops with an explicit rejection policy.
    pub fn with_policy(n: usize, policy: RejectionPolicy) -> Result<Self> {
        let n = n.max(1);
        let loops = (0..n)
            .map(|i| EventLoop::with_policy(format!("skiff-loop-{}", i), policy))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            chooser: Chooser::new(n),
            loops,
        })
    }

    /// Number of loops.
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Pick the loop for a new registration. The binding is permanent: call
    /// once per channel and keep the handle.
    pub fn next(&self) -> &EventLoop {
        &self.loops[self.chooser.next(self.loops.len())]
    }

    /// All loops (diagnostics and shutdown fan-out).
    pub fn iter(&self) -> impl Iterator<Item = &EventLoop> {
        self.loops.iter()
    }

    /// Shut down every loop; the returned future completes when all child
    /// termination futures have completed.
    pub fn shutdown_gracefully(&self, quiet_period: Duration, timeout: Duration) -> Future<()> {
        let aggregate: Promise<()> = Promise::new(None);
        let remaining = Arc::new(AtomicUsize::new(self.loops.len()));
        for event_loop in &self.loops {
            let aggregate = aggregate.clone();
            let remaining = Arc::clone(&remaining);
            event_loop
                .shutdown_gracefully(quiet_period, timeout)
                .add_listener(move |_| {
                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        aggregate.try_success(());
                    }
                });
        }
        aggregate.future()
    }

    /// [`Self::shutdown_gracefully`] with the default 2 s / 15 s windows.
    pub fn shutdown_gracefully_default(&self) -> Future<()> {
        self.shutdown_gracefully(Duration::from_secs(2), Duration::from_secs(15))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    #[test]
    fn test_round_robin_power_of_two() {
        let group = EventLoopGroup::new(4).expect("group");
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(group.next().name().to_string());
        }
        assert_eq!(seen[0..4], seen[4..8], "wrap-around repeats the cycle");
        let distinct: HashSet<_> = seen.iter().collect();
        assert_eq!(distinct.len(), 4, "all loops are used");
        group
            .shutdown_gracefully(Duration::from_millis(10), Duration::from_secs(5))
            .sync()
            .expect("shutdown");
    }

    #[test]
    fn test_round_robin_generic_count() {
        let group = EventLoopGroup::new(3).expect("group");
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(group.next().name().to_string());
        }
        assert_eq!(seen[0..3], seen[3..6]);
        group
            .shutdown_gracefully(Duration::from_millis(10), Duration::from_secs(5))
            .sync()
            .expect("shutdown");
    }

    #[test]
    fn test_loops_run_in_parallel_threads() {
        let group = EventLoopGroup::new(2).expect("group");
        let names = Arc::new(Mutex::new(HashSet::new()));
        let mut futures = Vec::new();
        for _ in 0..2 {
            let names = Arc::clone(&names);
            futures.push(group.next().submit(move || {
                names
                    .lock()
                    .insert(std::thread::current().name().map(String::from));
            }));
        }
        for f in futures {
            f.sync().expect("submit");
        }
        assert_eq!(names.lock().len(), 2, "tasks landed on distinct threads");
        group
            .shutdown_gracefully(Duration::from_millis(10), Duration::from_secs(5))
            .sync()
            .expect("shutdown");
    }

    #[test]
    fn test_group_termination_aggregates_all() {
        let group = EventLoopGroup::new(3).expect("group");
        let f = group.shutdown_gracefully(Duration::from_millis(10), Duration::from_secs(5));
        f.sync().expect("aggregate termination");
        for event_loop in group.iter() {
            assert!(event_loop.is_terminated());
        }
    }
}
