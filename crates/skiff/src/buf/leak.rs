// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Buffer leak detection.
//!
//! When a sampled buffer is dropped while its reference count is still
//! live, the detector reports the leak with any recorded touch points via
//! `log::error!`. Reports are out-of-band only; nothing is raised to the
//! caller. Sampling is 1-in-N (default 128); PARANOID samples every
//! allocation and ADVANCED upwards records touch points.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::config;

/// Detection level, from `SKIFF_LEAK_DETECTION_LEVEL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LeakLevel {
    /// No tracking at all.
    Disabled,
    /// Sampled tracking, leak reported without touch points.
    Simple,
    /// Sampled tracking with touch-point records.
    Advanced,
    /// Every allocation tracked with touch-point records.
    Paranoid,
}

/// Active detection level (parsed once).
pub fn level() -> LeakLevel {
    static V: OnceLock<LeakLevel> = OnceLock::new();
    *V.get_or_init(|| match std::env::var("SKIFF_LEAK_DETECTION_LEVEL") {
        Ok(raw) => match raw.to_ascii_uppercase().as_str() {
            "DISABLED" => LeakLevel::Disabled,
            "SIMPLE" => LeakLevel::Simple,
            "ADVANCED" => LeakLevel::Advanced,
            "PARANOID" => LeakLevel::Paranoid,
            _ => {
                log::warn!("[leak] ignoring invalid SKIFF_LEAK_DETECTION_LEVEL={:?}", raw);
                LeakLevel::Simple
            }
        },
        Err(_) => LeakLevel::Simple,
    })
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static SAMPLE_CLOCK: AtomicU32 = AtomicU32::new(0);
static LEAKS_REPORTED: AtomicU64 = AtomicU64::new(0);

/// Touch-point log attached to a sampled buffer.
pub(crate) struct LeakTracker {
    id: u64,
    records: Mutex<VecDeque<String>>,
    target_records: usize,
}

impl LeakTracker {
    fn new() -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            records: Mutex::new(VecDeque::new()),
            target_records: config::leak_target_records(),
        }
    }

    /// Record a touch point (ADVANCED and PARANOID only). Oldest records are
    /// evicted past the configured target.
    pub(crate) fn touch(&self, hint: &str) {
        if level() < LeakLevel::Advanced {
            return;
        }
        let mut records = self.records.lock();
        if records.len() >= self.target_records {
            records.pop_front();
        }
        records.push_back(hint.to_string());
    }

    /// Emit the leak report for this tracker.
    pub(crate) fn report(&self) {
        LEAKS_REPORTED.fetch_add(1, Ordering::Relaxed);
        let records = self.records.lock();
        if records.is_empty() {
            log::error!(
                "[leak] buffer #{} dropped without release; \
                 enable ADVANCED level for touch records",
                self.id
            );
        } else {
            let trail: Vec<&str> = records.iter().map(String::as_str).collect();
            log::error!(
                "[leak] buffer #{} dropped without release; recent touches: {}",
                self.id,
                trail.join(" <- ")
            );
        }
    }
}

/// Decide whether the allocation being made should carry a tracker.
pub(crate) fn sample() -> Option<LeakTracker> {
    match level() {
        LeakLevel::Disabled => None,
        LeakLevel::Paranoid => Some(LeakTracker::new()),
        LeakLevel::Simple | LeakLevel::Advanced => {
            let n = config::leak_sampling_interval();
            let tick = SAMPLE_CLOCK.fetch_add(1, Ordering::Relaxed);
            (tick % n == 0).then(LeakTracker::new)
        }
    }
}

/// Total leaks reported since process start (test/diagnostic aid).
pub fn leaks_reported() -> u64 {
    LEAKS_REPORTED.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level_is_simple() {
        assert_eq!(level(), LeakLevel::Simple);
    }

    #[test]
    fn test_sampling_interval_respected() {
        // With SIMPLE level and interval 128, roughly 1/128 of allocations
        // carry a tracker. The clock is global, so allocations from tests
        // running in parallel widen the spread.
        let tracked = (0..1280).filter(|_| sample().is_some()).count();
        assert!(tracked >= 2 && tracked <= 30, "tracked {}", tracked);
    }

    #[test]
    fn test_touch_ignored_below_advanced() {
        let tracker = LeakTracker::new();
        tracker.touch("read");
        assert!(tracker.records.lock().is_empty());
    }

    #[test]
    fn test_report_counts() {
        let before = leaks_reported();
        LeakTracker::new().report();
        assert_eq!(leaks_reported(), before + 1);
    }
}
