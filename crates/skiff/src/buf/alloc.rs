// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Pooled allocator facade.
//!
//! Owns the arenas, binds each calling thread to the least-used arena on
//! first contact, and fronts allocation/release with the per-thread cache.
//! `buffer()` / `heap_buffer()` / `direct_buffer()` are the public entry
//! points; in this implementation "direct" and "heap" share the same pooled
//! storage kind, both exist so allocator-agnostic code keeps working.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use super::arena::{ArenaAlloc, PoolArena};
use super::byte_buf::{calculate_new_capacity, ByteBuf};
use super::cache::ThreadCache;
use super::chunk::{ChunkMemory, Handle};
use super::composite::CompositeByteBuf;
use super::size_classes::SizeClasses;
use crate::config;
use crate::error::Result;

/// Default initial capacity for `buffer()`.
const DEFAULT_INITIAL_CAPACITY: usize = 256;

/// Default capacity ceiling when the caller does not pass one.
const DEFAULT_MAX_CAPACITY: usize = usize::MAX;

static NEXT_ALLOCATOR_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// (allocator id, cache) for the allocator this thread last used.
    static TL_CACHE: RefCell<Option<(u64, ThreadCache)>> = const { RefCell::new(None) };
}

/// Arena-backed buffer allocator with per-thread caches.
pub struct PooledAllocator {
    id: u64,
    sc: Arc<SizeClasses>,
    arenas: Vec<Arc<PoolArena>>,
}

impl PooledAllocator {
    /// Allocator with configuration taken from the environment
    /// (`SKIFF_ALLOC_*`), the common entry point.
    pub fn new() -> Self {
        Self::with_config(
            config::page_size(),
            config::max_order(),
            config::num_arenas(),
        )
    }

    /// Explicitly configured allocator. `page_size` must be a power of two
    /// >= 4096 and `max_order` bounded so chunks stay addressable.
    pub fn with_config(page_size: usize, max_order: u32, num_arenas: usize) -> Self {
        assert!(
            page_size.is_power_of_two() && page_size >= config::MIN_PAGE_SIZE,
            "page_size must be a power of two >= {}",
            config::MIN_PAGE_SIZE
        );
        assert!(
            max_order <= config::MAX_ORDER_LIMIT,
            "max_order must be <= {}",
            config::MAX_ORDER_LIMIT
        );
        let chunk_size = page_size << max_order;
        let sc = Arc::new(SizeClasses::new(page_size, chunk_size));
        let arenas = (0..num_arenas.max(1))
            .map(|_| Arc::new(PoolArena::new(Arc::clone(&sc))))
            .collect();
        Self {
            id: NEXT_ALLOCATOR_ID.fetch_add(1, Ordering::Relaxed),
            sc,
            arenas,
        }
    }

    /// Process-wide default instance.
    pub fn shared() -> Arc<PooledAllocator> {
        static DEFAULT: OnceLock<Arc<PooledAllocator>> = OnceLock::new();
        Arc::clone(DEFAULT.get_or_init(|| Arc::new(PooledAllocator::new())))
    }

    // ------------------------------------------------------------------
    // Public allocation surface
    // ------------------------------------------------------------------

    /// Buffer with the default initial capacity and unbounded growth.
    pub fn buffer(&self) -> Result<ByteBuf> {
        self.buffer_with_max(DEFAULT_INITIAL_CAPACITY, DEFAULT_MAX_CAPACITY)
    }

    /// Buffer with `initial` capacity and unbounded growth.
    pub fn buffer_with(&self, initial: usize) -> Result<ByteBuf> {
        self.buffer_with_max(initial, DEFAULT_MAX_CAPACITY)
    }

    /// Buffer with `initial` capacity, growable up to `max`.
    pub fn buffer_with_max(&self, initial: usize, max: usize) -> Result<ByteBuf> {
        if initial > max {
            return Err(crate::error::Error::IllegalState(format!(
                "initial capacity {} > max capacity {}",
                initial, max
            )));
        }
        Ok(self.allocate(initial, max))
    }

    /// Alias of [`Self::buffer_with_max`]; pooled storage serves both the
    /// "direct" and "heap" entry points here.
    pub fn direct_buffer(&self, initial: usize, max: usize) -> Result<ByteBuf> {
        self.buffer_with_max(initial, max)
    }

    /// Alias of [`Self::buffer_with_max`].
    pub fn heap_buffer(&self, initial: usize, max: usize) -> Result<ByteBuf> {
        self.buffer_with_max(initial, max)
    }

    /// Composite buffer that consolidates past `max_components`.
    pub fn composite_buffer(&self, max_components: usize) -> CompositeByteBuf {
        CompositeByteBuf::new(max_components)
    }

    /// Whether the default allocation path is pooled.
    pub fn is_direct_buffer_pooled(&self) -> bool {
        true
    }

    /// Post-growth capacity for `min_new`, exposed for transports sizing
    /// receive buffers.
    pub fn calculate_new_capacity(&self, min_new: usize, max: usize) -> usize {
        calculate_new_capacity(min_new, max)
    }

    /// Arena count (diagnostics).
    pub fn num_arenas(&self) -> usize {
        self.arenas.len()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn allocate(&self, requested: usize, max: usize) -> ByteBuf {
        let size_idx = self.sc.size_to_idx(requested);

        // Pooled classes: try the thread cache first.
        if size_idx < self.sc.n_sizes() {
            let cached = self.with_thread_cache(|cache| {
                cache
                    .try_allocate(size_idx)
                    .map(|(memory, chunk_id, handle)| {
                        let arena = Arc::clone(cache.arena());
                        (arena, memory, chunk_id, handle)
                    })
            });
            if let Some((arena, memory, chunk_id, handle)) = cached {
                let normalized = self.sc.idx_to_size(size_idx);
                let offset = cached_offset(&self.sc, handle, normalized);
                return ByteBuf::from_cached(
                    &arena, memory, chunk_id, handle, size_idx, offset, normalized, requested, max,
                );
            }
        }

        let arena = self.thread_arena();
        ByteBuf::from_arena_alloc(arena.allocate(requested), &arena, requested, max)
    }

    /// Arena bound to the current thread, binding lazily to the least-used
    /// arena (and installing the thread cache) on first use.
    fn thread_arena(&self) -> Arc<PoolArena> {
        TL_CACHE.with(|slot| {
            let mut slot = slot.borrow_mut();
            match slot.as_ref() {
                Some((id, cache)) if *id == self.id => Arc::clone(cache.arena()),
                _ => {
                    let arena = self.least_used_arena();
                    arena.assign_thread();
                    // Dropping a previous binding drains its cache.
                    *slot = Some((self.id, ThreadCache::new(Arc::clone(&arena))));
                    arena
                }
            }
        })
    }

    fn with_thread_cache<R>(&self, f: impl FnOnce(&mut ThreadCache) -> Option<R>) -> Option<R> {
        TL_CACHE.with(|slot| {
            let mut slot = slot.try_borrow_mut().ok()?;
            match slot.as_mut() {
                Some((id, cache)) if *id == self.id => f(cache),
                _ => None,
            }
        })
    }

    fn least_used_arena(&self) -> Arc<PoolArena> {
        self.arenas
            .iter()
            .min_by_key(|a| a.assigned_threads())
            .map(Arc::clone)
            .unwrap_or_else(|| unreachable!("allocator always has at least one arena"))
    }
}

impl Default for PooledAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Offset of a pooled handle inside its chunk.
fn cached_offset(sc: &SizeClasses, handle: Handle, elem_size: usize) -> usize {
    use super::chunk as h;
    let base = h::run_offset(handle) << sc.page_shifts();
    if h::is_subpage(handle) {
        base + h::bitmap_idx(handle) * elem_size
    } else {
        base
    }
}

/// Return a released pooled handle: thread cache when this thread fronts the
/// owning arena, the arena itself otherwise.
pub(crate) fn release_pooled(
    arena: &Arc<PoolArena>,
    memory: Arc<ChunkMemory>,
    chunk_id: u64,
    handle: Handle,
    size_idx: usize,
) {
    let cached = TL_CACHE.with(|slot| match slot.try_borrow_mut() {
        Ok(mut slot) => match slot.as_mut() {
            Some((_, cache)) => cache.add(arena, memory, chunk_id, handle, size_idx),
            None => false,
        },
        Err(_) => false,
    });
    if !cached {
        arena.free(chunk_id, handle, size_idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_allocator() -> PooledAllocator {
        PooledAllocator::with_config(8192, 11, 1)
    }

    #[test]
    fn test_buffer_defaults() {
        let alloc = small_allocator();
        let buf = alloc.buffer().expect("buffer");
        assert_eq!(buf.capacity(), 256);
        assert_eq!(buf.reader_index(), 0);
        assert_eq!(buf.writer_index(), 0);
        assert_eq!(buf.ref_cnt(), 1);
        assert!(buf.release().expect("release"));
    }

    #[test]
    fn test_initial_above_max_rejected() {
        let alloc = small_allocator();
        assert!(alloc.buffer_with_max(128, 64).is_err());
    }

    #[test]
    fn test_scenario_s1_round_trip() {
        let alloc = small_allocator();
        let mut buf = alloc.buffer_with(100).expect("buffer");
        assert_eq!(buf.capacity(), 100, "logical capacity is the request");

        let bytes: Vec<u8> = (0x00..=0x0F).collect();
        buf.write_bytes(&bytes).expect("write");
        assert_eq!(buf.writer_index(), 16);
        assert_eq!(buf.read_u32().expect("read"), 0x00010203);
        assert_eq!(buf.reader_index(), 4);

        assert!(buf.release().expect("release returns true"));
        assert_eq!(buf.ref_cnt(), 0);
        assert!(buf.release().is_err(), "second release fails");
    }

    #[test]
    fn test_cache_hit_on_realloc() {
        let alloc = small_allocator();
        let buf = alloc.buffer_with(100).expect("buffer");
        buf.release().expect("release into cache");
        // Same class allocation is served from the thread cache.
        let again = alloc.buffer_with(100).expect("buffer");
        again.release().expect("release");
    }

    #[test]
    fn test_huge_buffer() {
        let alloc = small_allocator();
        let chunk_size = 8192usize << 11;
        let mut buf = alloc.buffer_with(chunk_size + 1).expect("huge buffer");
        buf.write_u8(1).expect("usable");
        assert!(buf.release().expect("release"));
    }

    #[test]
    fn test_growth_through_arena() {
        let alloc = small_allocator();
        let mut buf = alloc.buffer_with(100).expect("buffer");
        buf.write_bytes(&vec![3u8; 100]).expect("fill");
        // Forces reallocation beyond the 112 B class.
        buf.write_bytes(&[4u8; 100]).expect("grow");
        assert!(buf.capacity() >= 200);
        assert_eq!(buf.get_u8(0).expect("content kept"), 3);
        assert_eq!(buf.get_u8(100).expect("appended"), 4);
        buf.release().expect("release");
    }

    #[test]
    fn test_shared_returns_same_instance() {
        let a = PooledAllocator::shared();
        let b = PooledAllocator::shared();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_calculate_new_capacity_exposed() {
        let alloc = small_allocator();
        assert_eq!(alloc.calculate_new_capacity(100, usize::MAX), 128);
    }
}
