// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Per-thread free lists of recently released handles.
//!
//! A cache fronts exactly one arena for one thread. Releases land here and
//! later allocations of the same size class pop them without touching the
//! arena lock. Each class queue is bounded; overflow returns the handle to
//! the arena immediately. A periodic trim (every `cache_trim_interval`
//! allocations in the owning thread) drops entries beyond the number of
//! cache hits since the previous trim, decaying occupancy under low load.
//!
//! Invariant: a cached handle was allocated from this cache's arena and has
//! not been returned to it.

use std::collections::VecDeque;
use std::sync::Arc;

use super::arena::PoolArena;
use super::chunk::{ChunkMemory, Handle};
use crate::config;

struct CacheEntry {
    memory: Arc<ChunkMemory>,
    chunk_id: u64,
    handle: Handle,
}

struct ClassCache {
    entries: VecDeque<CacheEntry>,
    cap: usize,
    /// Hits since the last trim; the decay signal.
    hits: u32,
}

impl ClassCache {
    fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cap,
            hits: 0,
        }
    }

    fn pop(&mut self) -> Option<CacheEntry> {
        let entry = self.entries.pop_front()?;
        self.hits = self.hits.saturating_add(1);
        Some(entry)
    }

    fn push(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        if self.cap == 0 || self.entries.len() >= self.cap {
            return Some(entry);
        }
        self.entries.push_back(entry);
        None
    }

    /// Drop entries in excess of the hit rate observed since the last trim.
    fn trim(&mut self, arena: &PoolArena, size_idx: usize) {
        let keep = self.hits as usize;
        self.hits = 0;
        while self.entries.len() > keep {
            let Some(entry) = self.entries.pop_back() else {
                break;
            };
            arena.free(entry.chunk_id, entry.handle, size_idx);
        }
    }

    fn drain(&mut self, arena: &PoolArena, size_idx: usize) {
        while let Some(entry) = self.entries.pop_front() {
            arena.free(entry.chunk_id, entry.handle, size_idx);
        }
    }
}

/// Thread-private cache for one arena. Owned by a `thread_local!` slot in
/// the allocator facade; drained back to the arena on thread exit.
pub(crate) struct ThreadCache {
    arena: Arc<PoolArena>,
    small: Vec<ClassCache>,
    normal: Vec<ClassCache>,
    /// First normal size class index (small classes precede it).
    normal_base: usize,
    allocations: u32,
    trim_interval: u32,
}

impl ThreadCache {
    pub(crate) fn new(arena: Arc<PoolArena>) -> Self {
        let sc = arena.size_classes();
        let n_small = sc.n_subpages();
        let n_normal = (n_small..sc.n_sizes())
            .take_while(|&idx| sc.idx_to_size(idx) <= config::DEFAULT_MAX_CACHED_BUFFER_CAPACITY)
            .count();

        let small_cap = config::small_cache_size();
        let normal_cap = config::normal_cache_size();

        Self {
            small: (0..n_small).map(|_| ClassCache::new(small_cap)).collect(),
            normal: (0..n_normal).map(|_| ClassCache::new(normal_cap)).collect(),
            normal_base: n_small,
            allocations: 0,
            trim_interval: config::cache_trim_interval(),
            arena,
        }
    }

    #[inline]
    pub(crate) fn arena(&self) -> &Arc<PoolArena> {
        &self.arena
    }

    fn class_cache(&mut self, size_idx: usize) -> Option<&mut ClassCache> {
        if size_idx < self.normal_base {
            self.small.get_mut(size_idx)
        } else {
            self.normal.get_mut(size_idx - self.normal_base)
        }
    }

    /// Pop a cached handle for `size_idx`, counting toward the trim clock.
    pub(crate) fn try_allocate(
        &mut self,
        size_idx: usize,
    ) -> Option<(Arc<ChunkMemory>, u64, Handle)> {
        self.allocations = self.allocations.wrapping_add(1);
        if self.allocations % self.trim_interval == 0 {
            self.trim_all();
        }

        let entry = self.class_cache(size_idx)?.pop()?;
        Some((entry.memory, entry.chunk_id, entry.handle))
    }

    /// Cache a released handle. Returns `false` when the class is not
    /// cacheable or the queue is full; the caller then frees to the arena.
    pub(crate) fn add(
        &mut self,
        arena: &Arc<PoolArena>,
        memory: Arc<ChunkMemory>,
        chunk_id: u64,
        handle: Handle,
        size_idx: usize,
    ) -> bool {
        if !Arc::ptr_eq(arena, &self.arena) {
            return false;
        }
        let Some(class) = self.class_cache(size_idx) else {
            return false;
        };
        match class.push(CacheEntry {
            memory,
            chunk_id,
            handle,
        }) {
            None => true,
            Some(_rejected) => false,
        }
    }

    fn trim_all(&mut self) {
        for (idx, class) in self.small.iter_mut().enumerate() {
            class.trim(&self.arena, idx);
        }
        let base = self.normal_base;
        for (off, class) in self.normal.iter_mut().enumerate() {
            class.trim(&self.arena, base + off);
        }
    }

    /// Total cached entries (diagnostics and tests).
    pub(crate) fn cached_entries(&self) -> usize {
        self.small
            .iter()
            .chain(self.normal.iter())
            .map(|c| c.entries.len())
            .sum()
    }
}

impl Drop for ThreadCache {
    fn drop(&mut self) {
        for (idx, class) in self.small.iter_mut().enumerate() {
            class.drain(&self.arena, idx);
        }
        let base = self.normal_base;
        for (off, class) in self.normal.iter_mut().enumerate() {
            class.drain(&self.arena, base + off);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buf::arena::ArenaAlloc;
    use crate::buf::size_classes::SizeClasses;

    fn arena() -> Arc<PoolArena> {
        Arc::new(PoolArena::new(Arc::new(SizeClasses::new(8192, 8192 << 11))))
    }

    fn pooled(arena: &Arc<PoolArena>, req: usize) -> (Arc<ChunkMemory>, u64, Handle, usize) {
        match arena.allocate(req) {
            ArenaAlloc::Pooled {
                memory,
                chunk_id,
                handle,
                size_idx,
                ..
            } => (memory, chunk_id, handle, size_idx),
            ArenaAlloc::Huge { .. } => panic!("expected pooled"),
        }
    }

    #[test]
    fn test_cache_round_trip() {
        let arena = arena();
        let mut cache = ThreadCache::new(Arc::clone(&arena));

        let (memory, chunk_id, handle, size_idx) = pooled(&arena, 100);
        assert!(cache.add(&arena, memory, chunk_id, handle, size_idx));
        assert_eq!(cache.cached_entries(), 1);

        let (_mem, c, h) = cache.try_allocate(size_idx).expect("cache hit");
        assert_eq!((c, h), (chunk_id, handle));
        assert_eq!(cache.cached_entries(), 0);

        arena.free(c, h, size_idx);
    }

    #[test]
    fn test_miss_on_other_class() {
        let arena = arena();
        let mut cache = ThreadCache::new(Arc::clone(&arena));
        let (memory, chunk_id, handle, size_idx) = pooled(&arena, 100);
        assert!(cache.add(&arena, memory, chunk_id, handle, size_idx));
        assert!(cache.try_allocate(size_idx + 1).is_none());
        // Entry for the original class is still there.
        assert_eq!(cache.cached_entries(), 1);
        drop(cache); // drains back to the arena
        let (_, _, _, deallocs) = arena.alloc_counts();
        assert_eq!(deallocs, 1);
    }

    #[test]
    fn test_oversized_class_not_cached() {
        let arena = arena();
        let mut cache = ThreadCache::new(Arc::clone(&arena));
        // 64 KiB is beyond the cached capacity ceiling (32 KiB).
        let (memory, chunk_id, handle, size_idx) = pooled(&arena, 64 * 1024);
        assert!(!cache.add(&arena, memory, chunk_id, handle, size_idx));
        arena.free(chunk_id, handle, size_idx);
    }

    #[test]
    fn test_foreign_arena_rejected() {
        let a1 = arena();
        let a2 = arena();
        let mut cache = ThreadCache::new(Arc::clone(&a1));
        let (memory, chunk_id, handle, size_idx) = pooled(&a2, 100);
        assert!(!cache.add(&a2, memory, chunk_id, handle, size_idx));
        a2.free(chunk_id, handle, size_idx);
    }

    #[test]
    fn test_drop_drains_to_arena() {
        let arena = arena();
        let mut cache = ThreadCache::new(Arc::clone(&arena));
        let mut live = Vec::new();
        for _ in 0..16 {
            live.push(pooled(&arena, 512));
        }
        for (memory, chunk_id, handle, size_idx) in live {
            assert!(cache.add(&arena, memory, chunk_id, handle, size_idx));
        }
        assert_eq!(cache.cached_entries(), 16);
        drop(cache);
        // All cached handles made it back; the drained chunk can be reused.
        let (small, _, _, deallocs) = arena.alloc_counts();
        assert_eq!(small, 16);
        assert_eq!(deallocs, 16);
    }

    #[test]
    fn test_trim_decays_idle_entries() {
        let arena = arena();
        let mut cache = ThreadCache::new(Arc::clone(&arena));

        for _ in 0..8 {
            let (memory, chunk_id, handle, size_idx) = pooled(&arena, 256);
            assert!(cache.add(&arena, memory, chunk_id, handle, size_idx));
        }
        assert_eq!(cache.cached_entries(), 8);

        // No hits since the entries were cached: a trim drops all of them.
        cache.trim_all();
        assert_eq!(cache.cached_entries(), 0);
    }
}
