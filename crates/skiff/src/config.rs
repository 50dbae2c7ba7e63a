// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Global configuration - single source of truth.
//!
//! This module centralizes the allocator, executor, and leak-detector tuning
//! knobs. **Never hardcode these values elsewhere!**
//!
//! Two levels:
//!
//! - **Level 1 (static)**: compile-time defaults below.
//! - **Level 2 (environment)**: `SKIFF_*` variables read once at first use.
//!   Unrecognized or out-of-range values fall back to the default with a
//!   `log::warn!`.

use std::sync::OnceLock;

// =======================================================================
// Allocator defaults
// =======================================================================

/// Default page size (bytes). Must be a power of two >= `MIN_PAGE_SIZE`.
pub const DEFAULT_PAGE_SIZE: usize = 8192;

/// Smallest page size the allocator accepts.
pub const MIN_PAGE_SIZE: usize = 4096;

/// Default chunk order: `chunk_size = page_size << max_order` (16 MiB).
pub const DEFAULT_MAX_ORDER: u32 = 11;

/// Hard ceiling on the chunk order (1 GiB chunks with 8 KiB pages).
pub const MAX_ORDER_LIMIT: u32 = 17;

/// Trim the thread cache every N allocations.
pub const DEFAULT_CACHE_TRIM_INTERVAL: u32 = 8192;

/// Cached handles per small size class, per thread.
pub const DEFAULT_SMALL_CACHE_SIZE: usize = 256;

/// Cached handles per normal size class, per thread.
pub const DEFAULT_NORMAL_CACHE_SIZE: usize = 64;

/// Largest normalized size the thread cache will hold (32 KiB).
pub const DEFAULT_MAX_CACHED_BUFFER_CAPACITY: usize = 32 * 1024;

// =======================================================================
// Executor defaults
// =======================================================================

/// Default bound on each event loop's task queue.
pub const DEFAULT_MAX_PENDING_TASKS: usize = 16 * 1024;

/// Listener callbacks may run inline on the executor thread up to this
/// recursion depth; deeper additions are re-submitted as tasks.
pub const DEFAULT_MAX_LISTENER_STACK_DEPTH: usize = 8;

/// `SKIFF_MAX_LISTENER_STACK_DEPTH` is clamped to this ceiling.
pub const MAX_LISTENER_STACK_DEPTH_LIMIT: usize = 8;

/// Upper bound on a single I/O poll (keeps shutdown responsive).
pub const DEFAULT_MAX_POLL_WAIT_MS: u64 = 1000;

/// Share of the I/O slice granted to task processing, in percent.
pub const DEFAULT_TASK_RATIO_PERCENT: u64 = 50;

// =======================================================================
// Leak detection defaults
// =======================================================================

/// Sample one allocation in N for leak tracking (SIMPLE/ADVANCED levels).
pub const DEFAULT_LEAK_SAMPLING_INTERVAL: u32 = 128;

/// Touch records retained per tracked buffer.
pub const DEFAULT_LEAK_TARGET_RECORDS: usize = 4;

// =======================================================================
// Water marks
// =======================================================================

/// Default low write-buffer water mark (32 KiB).
pub const DEFAULT_LOW_WATER_MARK: usize = 32 * 1024;

/// Default high write-buffer water mark (64 KiB).
pub const DEFAULT_HIGH_WATER_MARK: usize = 64 * 1024;

// =======================================================================
// Environment lookups (parsed once, cached for process lifetime)
// =======================================================================

fn parse_env<T: std::str::FromStr + Copy>(name: &str, default: T, validate: fn(T) -> bool) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(v) if validate(v) => v,
            _ => {
                log::warn!("[config] ignoring invalid {}={:?}", name, raw);
                default
            }
        },
        Err(_) => default,
    }
}

/// Allocator page size (`SKIFF_ALLOC_PAGE_SIZE`, default 8192).
///
/// Rejected unless a power of two >= 4096.
pub fn page_size() -> usize {
    static V: OnceLock<usize> = OnceLock::new();
    *V.get_or_init(|| {
        parse_env("SKIFF_ALLOC_PAGE_SIZE", DEFAULT_PAGE_SIZE, |v: usize| {
            v.is_power_of_two() && v >= MIN_PAGE_SIZE
        })
    })
}

/// Chunk order (`SKIFF_ALLOC_MAX_ORDER`, default 11): chunk = page << order.
pub fn max_order() -> u32 {
    static V: OnceLock<u32> = OnceLock::new();
    *V.get_or_init(|| {
        parse_env("SKIFF_ALLOC_MAX_ORDER", DEFAULT_MAX_ORDER, |v: u32| {
            v > 0 && v <= MAX_ORDER_LIMIT
        })
    })
}

/// Number of pooled arenas (`SKIFF_ALLOC_NUM_ARENAS`, default = parallelism).
pub fn num_arenas() -> usize {
    static V: OnceLock<usize> = OnceLock::new();
    *V.get_or_init(|| {
        let default = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(2);
        parse_env("SKIFF_ALLOC_NUM_ARENAS", default, |v: usize| v > 0)
    })
}

/// Thread-cache trim interval (`SKIFF_ALLOC_CACHE_TRIM_INTERVAL`).
pub fn cache_trim_interval() -> u32 {
    static V: OnceLock<u32> = OnceLock::new();
    *V.get_or_init(|| {
        parse_env(
            "SKIFF_ALLOC_CACHE_TRIM_INTERVAL",
            DEFAULT_CACHE_TRIM_INTERVAL,
            |v: u32| v > 0,
        )
    })
}

/// Per-class small cache depth (`SKIFF_ALLOC_SMALL_CACHE_SIZE`).
pub fn small_cache_size() -> usize {
    static V: OnceLock<usize> = OnceLock::new();
    *V.get_or_init(|| {
        parse_env(
            "SKIFF_ALLOC_SMALL_CACHE_SIZE",
            DEFAULT_SMALL_CACHE_SIZE,
            |_| true,
        )
    })
}

/// Per-class normal cache depth (`SKIFF_ALLOC_NORMAL_CACHE_SIZE`).
pub fn normal_cache_size() -> usize {
    static V: OnceLock<usize> = OnceLock::new();
    *V.get_or_init(|| {
        parse_env(
            "SKIFF_ALLOC_NORMAL_CACHE_SIZE",
            DEFAULT_NORMAL_CACHE_SIZE,
            |_| true,
        )
    })
}

/// Bound on each loop's task queue (`SKIFF_MAX_PENDING_TASKS`).
pub fn max_pending_tasks() -> usize {
    static V: OnceLock<usize> = OnceLock::new();
    *V.get_or_init(|| {
        parse_env(
            "SKIFF_MAX_PENDING_TASKS",
            DEFAULT_MAX_PENDING_TASKS,
            |v: usize| v >= 16,
        )
    })
}

/// Listener inline-recursion bound (`SKIFF_MAX_LISTENER_STACK_DEPTH`, cap 8).
pub fn max_listener_stack_depth() -> usize {
    static V: OnceLock<usize> = OnceLock::new();
    *V.get_or_init(|| {
        parse_env(
            "SKIFF_MAX_LISTENER_STACK_DEPTH",
            DEFAULT_MAX_LISTENER_STACK_DEPTH,
            |v: usize| v >= 1,
        )
        .min(MAX_LISTENER_STACK_DEPTH_LIMIT)
    })
}

/// Leak sampling interval (`SKIFF_LEAK_SAMPLING_INTERVAL`, default 128).
pub fn leak_sampling_interval() -> u32 {
    static V: OnceLock<u32> = OnceLock::new();
    *V.get_or_init(|| {
        parse_env(
            "SKIFF_LEAK_SAMPLING_INTERVAL",
            DEFAULT_LEAK_SAMPLING_INTERVAL,
            |v: u32| v > 0,
        )
    })
}

/// Touch records kept per tracked buffer (`SKIFF_LEAK_TARGET_RECORDS`).
pub fn leak_target_records() -> usize {
    static V: OnceLock<usize> = OnceLock::new();
    *V.get_or_init(|| {
        parse_env(
            "SKIFF_LEAK_TARGET_RECORDS",
            DEFAULT_LEAK_TARGET_RECORDS,
            |v: usize| v > 0,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_sane() {
        assert!(DEFAULT_PAGE_SIZE.is_power_of_two());
        assert!(DEFAULT_PAGE_SIZE >= MIN_PAGE_SIZE);
        assert_eq!(DEFAULT_PAGE_SIZE << DEFAULT_MAX_ORDER, 16 * 1024 * 1024);
        assert!(DEFAULT_LOW_WATER_MARK < DEFAULT_HIGH_WATER_MARK);
    }

    #[test]
    fn test_listener_depth_capped() {
        assert!(max_listener_stack_depth() <= MAX_LISTENER_STACK_DEPTH_LIMIT);
    }

    #[test]
    fn test_env_accessors_return_defaults_without_env() {
        // The suite does not set SKIFF_* variables, so accessors must yield
        // the documented defaults.
        assert_eq!(cache_trim_interval(), DEFAULT_CACHE_TRIM_INTERVAL);
        assert_eq!(leak_sampling_interval(), DEFAULT_LEAK_SAMPLING_INTERVAL);
        assert_eq!(leak_target_records(), DEFAULT_LEAK_TARGET_RECORDS);
    }
}
