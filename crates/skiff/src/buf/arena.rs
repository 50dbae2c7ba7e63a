// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Pool arena: broker between allocation requests and chunks.
//!
//! Chunks are organized into occupancy bands; the allocation order
//! (q050 -> q025 -> q000 -> qInit -> q075) keeps hot chunks hot, and the
//! overlapping band ranges give hysteresis so a chunk does not thrash
//! between bands on small usage fluctuations. Small classes are served from
//! an arena-anchored subpage pool before any chunk is consulted.
//!
//! All chunk and subpage mutation happens under the single arena lock; the
//! thread cache in front of the arena avoids this lock for the common case.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::chunk::{self, ChunkMemory, Handle, PoolChunk};
use super::size_classes::SizeClasses;

// ============================================================================
// Occupancy bands
// ============================================================================

/// Band boundaries: qInit[0,25) q000[1,50) q025[25,75) q050[50,100)
/// q075[75,100) q100[100,100].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Band {
    QInit,
    Q000,
    Q025,
    Q050,
    Q075,
    Q100,
}

impl Band {
    /// Usage floor; dropping below it demotes the chunk (or destroys it when
    /// there is no lower band).
    fn min_usage(self) -> isize {
        match self {
            Band::QInit => isize::MIN, // never demoted below qInit
            Band::Q000 => 1,
            Band::Q025 => 25,
            Band::Q050 => 50,
            Band::Q075 => 75,
            Band::Q100 => 100,
        }
    }

    /// Usage ceiling; reaching it promotes the chunk.
    fn max_usage(self) -> usize {
        match self {
            Band::QInit => 25,
            Band::Q000 => 50,
            Band::Q025 => 75,
            Band::Q050 => 100,
            Band::Q075 => 100,
            Band::Q100 => usize::MAX,
        }
    }

    fn promote(self) -> Band {
        match self {
            Band::QInit => Band::Q000,
            Band::Q000 => Band::Q025,
            Band::Q025 => Band::Q050,
            Band::Q050 => Band::Q075,
            Band::Q075 | Band::Q100 => Band::Q100,
        }
    }

    /// Lower band, or `None` when demotion means destruction.
    fn demote(self) -> Option<Band> {
        match self {
            Band::QInit => Some(Band::QInit),
            Band::Q000 => None, // empty q000 chunks are destroyed
            Band::Q025 => Some(Band::Q000),
            Band::Q050 => Some(Band::Q025),
            Band::Q075 => Some(Band::Q050),
            Band::Q100 => Some(Band::Q075),
        }
    }
}

/// Allocation scan order over the bands.
const ALLOC_ORDER: [Band; 5] = [Band::Q050, Band::Q025, Band::Q000, Band::QInit, Band::Q075];

// ============================================================================
// Arena
// ============================================================================

/// A successful arena allocation, carrying everything a buffer needs to use
/// and later return the memory.
pub(crate) enum ArenaAlloc {
    /// Served from a pooled chunk.
    Pooled {
        memory: Arc<ChunkMemory>,
        chunk_id: u64,
        handle: Handle,
        offset: usize,
        capacity: usize,
        size_idx: usize,
    },
    /// One-shot region for requests beyond the chunk size.
    Huge {
        memory: Arc<ChunkMemory>,
        capacity: usize,
    },
}

struct ChunkEntry {
    chunk: PoolChunk,
    band: Band,
}

struct ArenaInner {
    chunks: HashMap<u64, ChunkEntry>,
    next_chunk_id: u64,
    /// Per small size class: subpages with free slots, as (chunk_id, run_offset).
    small_pools: Vec<VecDeque<(u64, usize)>>,
}

/// Broker between callers and chunks; one of `num_arenas` instances owned by
/// the pooled allocator.
pub(crate) struct PoolArena {
    sc: Arc<SizeClasses>,
    inner: Mutex<ArenaInner>,

    // Statistics (monotonic counters, read without the lock).
    n_small_allocs: AtomicU64,
    n_normal_allocs: AtomicU64,
    n_huge_allocs: AtomicU64,
    n_deallocs: AtomicU64,
    /// Threads currently assigned here (guides least-used assignment).
    n_assigned_threads: AtomicU64,
}

impl PoolArena {
    pub(crate) fn new(sc: Arc<SizeClasses>) -> Self {
        let n_subpages = sc.n_subpages();
        Self {
            sc,
            inner: Mutex::new(ArenaInner {
                chunks: HashMap::new(),
                next_chunk_id: 0,
                small_pools: (0..n_subpages).map(|_| VecDeque::new()).collect(),
            }),
            n_small_allocs: AtomicU64::new(0),
            n_normal_allocs: AtomicU64::new(0),
            n_huge_allocs: AtomicU64::new(0),
            n_deallocs: AtomicU64::new(0),
            n_assigned_threads: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn size_classes(&self) -> &Arc<SizeClasses> {
        &self.sc
    }

    /// Serve `req_capacity` bytes: small -> subpage pool then chunks,
    /// normal -> chunks (creating one if needed), huge -> one-shot region.
    pub(crate) fn allocate(&self, req_capacity: usize) -> ArenaAlloc {
        let size_idx = self.sc.size_to_idx(req_capacity);
        if size_idx >= self.sc.n_sizes() {
            let capacity = self.sc.normalize(req_capacity);
            self.n_huge_allocs.fetch_add(1, Ordering::Relaxed);
            return ArenaAlloc::Huge {
                memory: ChunkMemory::new(capacity),
                capacity,
            };
        }

        if self.sc.is_subpage(size_idx) {
            self.n_small_allocs.fetch_add(1, Ordering::Relaxed);
            self.allocate_small(size_idx)
        } else {
            self.n_normal_allocs.fetch_add(1, Ordering::Relaxed);
            self.allocate_normal(size_idx)
        }
    }

    fn allocate_small(&self, size_idx: usize) -> ArenaAlloc {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let elem_size = self.sc.idx_to_size(size_idx);

        // Pooled subpage with a free slot?
        while let Some(&(chunk_id, offset)) = inner.small_pools[size_idx].front() {
            let entry = match inner.chunks.get_mut(&chunk_id) {
                Some(e) => e,
                None => {
                    inner.small_pools[size_idx].pop_front();
                    continue;
                }
            };
            match entry.chunk.allocate_subpage_slot(offset) {
                Some(handle) => {
                    let exhausted = entry
                        .chunk
                        .subpage(offset)
                        .map(|s| s.num_avail() == 0)
                        .unwrap_or(true);
                    let memory = entry.chunk.memory();
                    if exhausted {
                        inner.small_pools[size_idx].pop_front();
                        if let Some(sub) = inner
                            .chunks
                            .get_mut(&chunk_id)
                            .and_then(|e| e.chunk.subpage_mut(offset))
                        {
                            sub.set_in_pool(false);
                        }
                    }
                    return self.finish_pooled(inner, chunk_id, handle, elem_size, size_idx, memory);
                }
                None => {
                    // Stale entry (subpage vanished or filled elsewhere).
                    inner.small_pools[size_idx].pop_front();
                }
            }
        }

        // No pooled subpage: carve a fresh one from a banded chunk.
        let (chunk_id, handle, memory) =
            self.allocate_from_bands(inner, |chunk| chunk.allocate_subpage(size_idx));

        let offset = chunk::run_offset(handle);
        if let Some(entry) = inner.chunks.get_mut(&chunk_id) {
            let has_room = entry
                .chunk
                .subpage(offset)
                .map(|s| s.num_avail() > 0)
                .unwrap_or(false);
            if has_room {
                if let Some(sub) = entry.chunk.subpage_mut(offset) {
                    sub.set_in_pool(true);
                }
                inner.small_pools[size_idx].push_front((chunk_id, offset));
            }
        }
        self.finish_pooled(inner, chunk_id, handle, elem_size, size_idx, memory)
    }

    fn allocate_normal(&self, size_idx: usize) -> ArenaAlloc {
        let run_size = self.sc.idx_to_size(size_idx);
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let (chunk_id, handle, memory) =
            self.allocate_from_bands(inner, |chunk| chunk.allocate_run(run_size));
        self.finish_pooled(inner, chunk_id, handle, run_size, size_idx, memory)
    }

    /// Try each band in allocation order, then fall back to a new chunk.
    fn allocate_from_bands(
        &self,
        inner: &mut ArenaInner,
        mut attempt: impl FnMut(&mut PoolChunk) -> Option<Handle>,
    ) -> (u64, Handle, Arc<ChunkMemory>) {
        for band in ALLOC_ORDER {
            let candidate = inner
                .chunks
                .iter_mut()
                .filter(|(_, e)| e.band == band)
                .find_map(|(&id, e)| attempt(&mut e.chunk).map(|h| (id, h, e.chunk.memory())));
            if let Some(found) = candidate {
                return found;
            }
        }

        // Every existing chunk refused: reserve a new one in qInit.
        let id = inner.next_chunk_id;
        inner.next_chunk_id += 1;
        let mut chunk = PoolChunk::new(Arc::clone(&self.sc));
        let handle = attempt(&mut chunk)
            .unwrap_or_else(|| unreachable!("fresh chunk must satisfy a pooled request"));
        let memory = chunk.memory();
        inner.chunks.insert(
            id,
            ChunkEntry {
                chunk,
                band: Band::QInit,
            },
        );
        (id, handle, memory)
    }

    fn finish_pooled(
        &self,
        inner: &mut ArenaInner,
        chunk_id: u64,
        handle: Handle,
        capacity: usize,
        size_idx: usize,
        memory: Arc<ChunkMemory>,
    ) -> ArenaAlloc {
        self.reclassify_after_alloc(inner, chunk_id);

        let offset = (chunk::run_offset(handle) << self.sc.page_shifts())
            + if chunk::is_subpage(handle) {
                chunk::bitmap_idx(handle) * capacity
            } else {
                0
            };

        ArenaAlloc::Pooled {
            memory,
            chunk_id,
            handle,
            offset,
            capacity,
            size_idx,
        }
    }

    /// Return a pooled handle. Reclassifies the band; a chunk emptying out
    /// of q000 is destroyed to bound pool growth.
    pub(crate) fn free(&self, chunk_id: u64, handle: Handle, size_idx: usize) {
        self.n_deallocs.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let Some(entry) = inner.chunks.get_mut(&chunk_id) else {
            debug_assert!(false, "free for unknown chunk {}", chunk_id);
            return;
        };

        if chunk::is_subpage(handle) {
            let offset = chunk::run_offset(handle);
            let was_full = entry
                .chunk
                .subpage(offset)
                .map(|s| s.num_avail() == 0)
                .unwrap_or(false);

            let still_in_use = entry.chunk.free(handle);

            if still_in_use {
                let in_pool = entry
                    .chunk
                    .subpage(offset)
                    .map(super::chunk::PoolSubpage::in_pool)
                    .unwrap_or(false);
                if was_full && !in_pool {
                    if let Some(sub) = entry.chunk.subpage_mut(offset) {
                        sub.set_in_pool(true);
                    }
                    inner.small_pools[size_idx].push_front((chunk_id, offset));
                }
                self.reclassify_after_free(inner, chunk_id);
                return;
            }
            // Subpage fully freed and unregistered: drop its pool entry.
            inner.small_pools[size_idx].retain(|&(c, o)| !(c == chunk_id && o == offset));
        } else {
            entry.chunk.free(handle);
        }

        self.reclassify_after_free(inner, chunk_id);
    }

    fn reclassify_after_alloc(&self, inner: &mut ArenaInner, chunk_id: u64) {
        if let Some(entry) = inner.chunks.get_mut(&chunk_id) {
            let usage = entry.chunk.usage();
            while usage >= entry.band.max_usage() {
                entry.band = entry.band.promote();
            }
        }
    }

    fn reclassify_after_free(&self, inner: &mut ArenaInner, chunk_id: u64) {
        let Some(entry) = inner.chunks.get_mut(&chunk_id) else {
            return;
        };
        let usage = entry.chunk.usage() as isize;
        while usage < entry.band.min_usage() {
            match entry.band.demote() {
                Some(lower) if lower != entry.band => entry.band = lower,
                Some(_) => break, // qInit demotes to itself
                None => {
                    // Empty chunk leaving q000: destroy it and purge any
                    // subpage pool entries that still point at it.
                    inner.chunks.remove(&chunk_id);
                    for pool in &mut inner.small_pools {
                        pool.retain(|&(c, _)| c != chunk_id);
                    }
                    return;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Statistics / assignment
    // ------------------------------------------------------------------

    pub(crate) fn assign_thread(&self) {
        self.n_assigned_threads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn assigned_threads(&self) -> u64 {
        self.n_assigned_threads.load(Ordering::Relaxed)
    }

    pub(crate) fn num_chunks(&self) -> usize {
        self.inner.lock().chunks.len()
    }

    pub(crate) fn alloc_counts(&self) -> (u64, u64, u64, u64) {
        (
            self.n_small_allocs.load(Ordering::Relaxed),
            self.n_normal_allocs.load(Ordering::Relaxed),
            self.n_huge_allocs.load(Ordering::Relaxed),
            self.n_deallocs.load(Ordering::Relaxed),
        )
    }
}
