// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Atomic reference count with even/odd destruction encoding.
//!
//! The stored value is `logical_count << 1`; an odd value means the object
//! has been destroyed. This lets `retain` detect destruction after a plain
//! fetch-add (no CAS on the hot path) and roll back, while the final
//! `release` claims destruction with a single compare-exchange `2 -> 1`.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Error, Result};

/// Stored sentinel for a destroyed object (logical count 0, odd).
const DESTROYED: u32 = 1;

/// Atomic retain/release counter. The owner invokes its deallocation path
/// when [`RefCnt::release`] returns `Ok(true)`, exactly once.
#[derive(Debug)]
pub struct RefCnt {
    value: AtomicU32,
}

impl RefCnt {
    /// New counter with a logical count of 1.
    pub fn new() -> Self {
        Self {
            value: AtomicU32::new(2),
        }
    }

    /// Current logical count; 0 once destroyed.
    #[inline]
    pub fn ref_cnt(&self) -> u32 {
        let raw = self.value.load(Ordering::Acquire);
        if raw & 1 == 1 {
            0
        } else {
            raw >> 1
        }
    }

    /// Increment by `n`. Fails on a destroyed object or on overflow, rolling
    /// the speculative add back in both cases.
    pub fn retain(&self, n: u32) -> Result<()> {
        debug_assert!(n > 0, "retain amount must be positive");
        let delta = n
            .checked_shl(1)
            .filter(|d| d >> 1 == n)
            .ok_or(Error::IllegalReferenceCount { count: 0, delta: n })?;

        let prior = self.value.fetch_add(delta, Ordering::AcqRel);
        if prior & 1 == 1 || prior.checked_add(delta).is_none() || prior == 0 {
            // Destroyed, or the add wrapped: undo and fail.
            self.value.fetch_sub(delta, Ordering::AcqRel);
            return Err(Error::IllegalReferenceCount {
                count: if prior & 1 == 1 { 0 } else { prior >> 1 },
                delta: n,
            });
        }
        Ok(())
    }

    /// Decrement by `n`. Returns `Ok(true)` exactly once, when the logical
    /// count reaches 0; the caller must then deallocate. Releasing a
    /// destroyed object or releasing more than is held fails.
    pub fn release(&self, n: u32) -> Result<bool> {
        debug_assert!(n > 0, "release amount must be positive");
        let delta = n << 1;

        loop {
            let raw = self.value.load(Ordering::Acquire);
            if raw & 1 == 1 {
                return Err(Error::IllegalReferenceCount { count: 0, delta: n });
            }
            let logical = raw >> 1;
            if logical < n {
                return Err(Error::IllegalReferenceCount {
                    count: logical,
                    delta: n,
                });
            }
            if logical == n {
                // Final release: claim the destroyed sentinel.
                if self
                    .value
                    .compare_exchange(raw, DESTROYED, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    return Ok(true);
                }
            } else if self
                .value
                .compare_exchange(raw, raw - delta, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(false);
            }
            // Lost the race, reload and retry.
        }
    }

    /// True once the final release has happened.
    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.value.load(Ordering::Acquire) & 1 == 1
    }
}

impl Default for RefCnt {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_initial_count_is_one() {
        let rc = RefCnt::new();
        assert_eq!(rc.ref_cnt(), 1);
        assert!(!rc.is_destroyed());
    }

    #[test]
    fn test_retain_release_round_trip() {
        let rc = RefCnt::new();
        rc.retain(1).expect("retain on live object");
        assert_eq!(rc.ref_cnt(), 2);
        assert!(!rc.release(1).expect("non-final release"));
        assert_eq!(rc.ref_cnt(), 1);
        assert!(rc.release(1).expect("final release"));
        assert_eq!(rc.ref_cnt(), 0);
        assert!(rc.is_destroyed());
    }

    #[test]
    fn test_release_after_destroy_fails() {
        let rc = RefCnt::new();
        assert!(rc.release(1).expect("final release"));
        match rc.release(1) {
            Err(Error::IllegalReferenceCount { count: 0, .. }) => {}
            other => panic!("expected IllegalReferenceCount, got {:?}", other),
        }
    }

    #[test]
    fn test_retain_after_destroy_fails() {
        let rc = RefCnt::new();
        assert!(rc.release(1).expect("final release"));
        assert!(rc.retain(1).is_err());
        // The failed retain must not resurrect the object.
        assert!(rc.is_destroyed());
        assert_eq!(rc.ref_cnt(), 0);
    }

    #[test]
    fn test_over_release_fails_without_destroying() {
        let rc = RefCnt::new();
        assert!(rc.release(2).is_err());
        assert_eq!(rc.ref_cnt(), 1);
        assert!(rc.release(1).expect("final release"));
    }

    #[test]
    fn test_bulk_retain_release() {
        let rc = RefCnt::new();
        rc.retain(5).expect("bulk retain");
        assert_eq!(rc.ref_cnt(), 6);
        assert!(!rc.release(5).expect("bulk release"));
        assert!(rc.release(1).expect("final release"));
    }

    #[test]
    fn test_concurrent_release_destroys_once() {
        for _ in 0..200 {
            let rc = Arc::new(RefCnt::new());
            rc.retain(7).expect("retain to 8");

            let mut handles = Vec::new();
            for _ in 0..8 {
                let rc = Arc::clone(&rc);
                handles.push(thread::spawn(move || {
                    rc.release(1).expect("each thread holds one reference")
                }));
            }

            let finals = handles
                .into_iter()
                .map(|h| h.join().expect("release thread"))
                .filter(|destroyed| *destroyed)
                .count();
            assert_eq!(finals, 1, "deallocate must be signalled exactly once");
            assert!(rc.is_destroyed());
        }
    }
}
