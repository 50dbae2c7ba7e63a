// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Cursored byte buffer over pooled or heap storage.
//!
//! A `ByteBuf` carries two cursors over a backing region:
//!
//! ```text
//! +-------------------+------------------+------------------+
//! | discardable bytes |  readable bytes  |  writable bytes  |
//! +-------------------+------------------+------------------+
//! 0              reader_index       writer_index        capacity
//! ```
//!
//! Invariant after every public operation:
//! `0 <= reader_index <= writer_index <= capacity <= max_capacity`.
//!
//! Views created by `slice`/`duplicate` share content with the parent but
//! keep independent cursors and marks. Non-retained views do not touch the
//! reference count; `retained_*` variants do. The last `release` returns
//! pooled storage to the thread cache or arena; dropping every view of an
//! unreleased buffer triggers the leak detector and reclaims the memory.
//!
//! Multi-byte accessors default to network order (big-endian) with `_le`
//! variants.

use std::sync::Arc;

use super::arena::{ArenaAlloc, PoolArena};
use super::chunk::{ChunkMemory, Handle};
use super::leak::{self, LeakTracker};
use super::ref_cnt::RefCnt;
use crate::error::{Error, Result};

/// Growth switches from power-of-two doubling to fixed increments past this
/// threshold (4 MiB).
pub(crate) const GROWTH_THRESHOLD: usize = 4 * 1024 * 1024;

/// Smallest capacity produced by the doubling policy.
const MIN_GROWTH_CAPACITY: usize = 64;

/// Compute the post-growth capacity: smallest power of two >= `min_new`
/// below the threshold, then threshold-quantized increments, clamped to
/// `max_capacity`.
pub(crate) fn calculate_new_capacity(min_new: usize, max_capacity: usize) -> usize {
    debug_assert!(min_new <= max_capacity);
    if min_new == GROWTH_THRESHOLD {
        return GROWTH_THRESHOLD;
    }
    if min_new > GROWTH_THRESHOLD {
        let mut new_capacity = min_new / GROWTH_THRESHOLD * GROWTH_THRESHOLD;
        if new_capacity > max_capacity.saturating_sub(GROWTH_THRESHOLD) {
            new_capacity = max_capacity;
        } else {
            new_capacity += GROWTH_THRESHOLD;
        }
        return new_capacity;
    }
    let mut new_capacity = MIN_GROWTH_CAPACITY;
    while new_capacity < min_new {
        new_capacity <<= 1;
    }
    new_capacity.min(max_capacity)
}

// ============================================================================
// Shared backing
// ============================================================================

/// Storage kind behind a buffer and all of its views.
pub(crate) enum Storage {
    /// Served from an arena chunk; returned on final release.
    Pooled {
        arena: Arc<PoolArena>,
        memory: Arc<ChunkMemory>,
        chunk_id: u64,
        handle: Handle,
        size_idx: usize,
    },
    /// Plain heap region (unpooled and huge allocations); freed on drop.
    Heap { memory: Arc<ChunkMemory> },
}

impl Storage {
    #[inline]
    fn memory(&self) -> &Arc<ChunkMemory> {
        match self {
            Storage::Pooled { memory, .. } | Storage::Heap { memory } => memory,
        }
    }
}

/// Backing shared by a buffer and its views: storage + reference count +
/// optional leak tracker.
pub(crate) struct SharedBuf {
    storage: Storage,
    ref_cnt: RefCnt,
    leak: Option<LeakTracker>,
}

impl SharedBuf {
    pub(crate) fn new(storage: Storage) -> Arc<Self> {
        Arc::new(Self {
            storage,
            ref_cnt: RefCnt::new(),
            leak: leak::sample(),
        })
    }

    /// Decrement; on the final release, return the storage. `Ok(true)`
    /// exactly once.
    fn release_one(&self) -> Result<bool> {
        if self.ref_cnt.release(1)? {
            self.deallocate();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn deallocate(&self) {
        if let Storage::Pooled {
            arena,
            memory,
            chunk_id,
            handle,
            size_idx,
        } = &self.storage
        {
            super::alloc::release_pooled(arena, Arc::clone(memory), *chunk_id, *handle, *size_idx);
        }
        // Heap storage is freed when the last Arc drops.
    }
}

impl Drop for SharedBuf {
    fn drop(&mut self) {
        if !self.ref_cnt.is_destroyed() {
            // Dropped without release: report if sampled, reclaim always.
            if let Some(tracker) = &self.leak {
                tracker.report();
            }
            self.deallocate();
        }
    }
}

// ============================================================================
// ByteBuf
// ============================================================================

/// Indexed, cursored byte buffer. See the module docs for the cursor model.
pub struct ByteBuf {
    shared: Arc<SharedBuf>,
    /// Base offset of this view inside the backing region.
    offset: usize,
    capacity: usize,
    /// Backing bytes usable without reallocating (normalized class size).
    fast_max: usize,
    max_capacity: usize,
    reader: usize,
    writer: usize,
    marked_reader: usize,
    marked_writer: usize,
}

impl ByteBuf {
    // ------------------------------------------------------------------
    // Construction (crate-internal; the allocator facade is the public way)
    // ------------------------------------------------------------------

    pub(crate) fn from_arena_alloc(
        alloc: ArenaAlloc,
        arena: &Arc<PoolArena>,
        requested: usize,
        max_capacity: usize,
    ) -> ByteBuf {
        match alloc {
            ArenaAlloc::Pooled {
                memory,
                chunk_id,
                handle,
                offset,
                capacity,
                size_idx,
            } => ByteBuf {
                shared: SharedBuf::new(Storage::Pooled {
                    arena: Arc::clone(arena),
                    memory,
                    chunk_id,
                    handle,
                    size_idx,
                }),
                offset,
                capacity: requested,
                fast_max: capacity,
                max_capacity,
                reader: 0,
                writer: 0,
                marked_reader: 0,
                marked_writer: 0,
            },
            ArenaAlloc::Huge { memory, capacity } => ByteBuf {
                shared: SharedBuf::new(Storage::Heap { memory }),
                offset: 0,
                capacity: requested,
                fast_max: capacity,
                max_capacity,
                reader: 0,
                writer: 0,
                marked_reader: 0,
                marked_writer: 0,
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_cached(
        arena: &Arc<PoolArena>,
        memory: Arc<ChunkMemory>,
        chunk_id: u64,
        handle: Handle,
        size_idx: usize,
        offset: usize,
        normalized: usize,
        requested: usize,
        max_capacity: usize,
    ) -> ByteBuf {
        ByteBuf {
            shared: SharedBuf::new(Storage::Pooled {
                arena: Arc::clone(arena),
                memory,
                chunk_id,
                handle,
                size_idx,
            }),
            offset,
            capacity: requested,
            fast_max: normalized,
            max_capacity,
            reader: 0,
            writer: 0,
            marked_reader: 0,
            marked_writer: 0,
        }
    }

    /// Plain heap-backed buffer.
    pub(crate) fn heap(capacity: usize, max_capacity: usize) -> ByteBuf {
        ByteBuf {
            shared: SharedBuf::new(Storage::Heap {
                memory: ChunkMemory::new(capacity),
            }),
            offset: 0,
            capacity,
            fast_max: capacity,
            max_capacity,
            reader: 0,
            writer: 0,
            marked_reader: 0,
            marked_writer: 0,
        }
    }

    // ------------------------------------------------------------------
    // Cursors and bounds
    // ------------------------------------------------------------------

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    #[inline]
    pub fn reader_index(&self) -> usize {
        self.reader
    }

    #[inline]
    pub fn writer_index(&self) -> usize {
        self.writer
    }

    pub fn set_reader_index(&mut self, index: usize) -> Result<()> {
        if index > self.writer {
            return Err(Error::IndexOutOfBounds {
                index,
                length: 0,
                capacity: self.writer,
            });
        }
        self.reader = index;
        Ok(())
    }

    pub fn set_writer_index(&mut self, index: usize) -> Result<()> {
        if index < self.reader || index > self.capacity {
            return Err(Error::IndexOutOfBounds {
                index,
                length: 0,
                capacity: self.capacity,
            });
        }
        self.writer = index;
        Ok(())
    }

    /// Set both cursors at once (`reader <= writer <= capacity`).
    pub fn set_index(&mut self, reader: usize, writer: usize) -> Result<()> {
        if reader > writer || writer > self.capacity {
            return Err(Error::IndexOutOfBounds {
                index: reader,
                length: writer.saturating_sub(reader),
                capacity: self.capacity,
            });
        }
        self.reader = reader;
        self.writer = writer;
        Ok(())
    }

    #[inline]
    pub fn readable_bytes(&self) -> usize {
        self.writer - self.reader
    }

    #[inline]
    pub fn writable_bytes(&self) -> usize {
        self.capacity - self.writer
    }

    #[inline]
    pub fn max_writable_bytes(&self) -> usize {
        self.max_capacity - self.writer
    }

    #[inline]
    pub fn is_readable(&self) -> bool {
        self.writer > self.reader
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.capacity > self.writer
    }

    /// Reset both cursors to zero. Content is untouched.
    pub fn clear(&mut self) {
        self.reader = 0;
        self.writer = 0;
    }

    pub fn mark_reader_index(&mut self) {
        self.marked_reader = self.reader;
    }

    pub fn reset_reader_index(&mut self) -> Result<()> {
        let marked = self.marked_reader;
        self.set_reader_index(marked)
    }

    pub fn mark_writer_index(&mut self) {
        self.marked_writer = self.writer;
    }

    pub fn reset_writer_index(&mut self) -> Result<()> {
        let marked = self.marked_writer;
        self.set_writer_index(marked)
    }

    /// Move readable bytes to the front, reclaiming discarded space. Marks
    /// shift with the content.
    pub fn discard_read_bytes(&mut self) {
        if self.reader == 0 {
            return;
        }
        let readable = self.readable_bytes();
        if readable > 0 {
            // SAFETY: both ranges lie inside this view; copy handles overlap.
            unsafe {
                std::ptr::copy(
                    self.ptr().add(self.reader),
                    self.ptr(),
                    readable,
                );
            }
        }
        self.marked_reader = self.marked_reader.saturating_sub(self.reader);
        self.marked_writer = self.marked_writer.saturating_sub(self.reader);
        self.writer = readable;
        self.reader = 0;
    }

    // ------------------------------------------------------------------
    // Reference counting
    // ------------------------------------------------------------------

    #[inline]
    pub fn ref_cnt(&self) -> u32 {
        self.shared.ref_cnt.ref_cnt()
    }

    pub fn retain(&self) -> Result<()> {
        self.shared.ref_cnt.retain(1)
    }

    /// Drop one reference. `Ok(true)` when this call deallocated the
    /// backing; a further release fails with a refcount error.
    pub fn release(&self) -> Result<bool> {
        self.shared.release_one()
    }

    /// Record a leak-detector touch point (no-op unless tracked).
    pub fn touch(&self, hint: &str) {
        if let Some(tracker) = &self.shared.leak {
            tracker.touch(hint);
        }
    }

    // ------------------------------------------------------------------
    // Raw access helpers
    // ------------------------------------------------------------------

    #[inline]
    fn ptr(&self) -> *mut u8 {
        // SAFETY: offset stays within the backing region for the lifetime of
        // the shared storage (checked at construction).
        unsafe { self.shared.storage.memory().base_ptr().add(self.offset) }
    }

    #[inline]
    fn check_index(&self, index: usize, length: usize) -> Result<()> {
        if index.checked_add(length).map_or(true, |end| end > self.capacity) {
            return Err(Error::IndexOutOfBounds {
                index,
                length,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    #[inline]
    fn check_readable(&self, length: usize) -> Result<()> {
        if self.readable_bytes() < length {
            return Err(Error::InsufficientReadableBytes {
                requested: length,
                readable: self.readable_bytes(),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Absolute accessors
    // ------------------------------------------------------------------

    pub fn get_bytes(&self, index: usize, dst: &mut [u8]) -> Result<()> {
        self.check_index(index, dst.len())?;
        // SAFETY: range checked above; dst is a caller-owned exclusive slice.
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr().add(index), dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }

    pub fn set_bytes(&mut self, index: usize, src: &[u8]) -> Result<()> {
        self.check_index(index, src.len())?;
        // SAFETY: range checked above; src cannot alias the raw region
        // mutably (it is a shared slice).
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr().add(index), src.len());
        }
        Ok(())
    }

    pub fn get_u8(&self, index: usize) -> Result<u8> {
        self.check_index(index, 1)?;
        // SAFETY: single byte inside the checked range.
        Ok(unsafe { *self.ptr().add(index) })
    }

    pub fn get_i8(&self, index: usize) -> Result<i8> {
        Ok(self.get_u8(index)? as i8)
    }

    pub fn set_u8(&mut self, index: usize, value: u8) -> Result<()> {
        self.check_index(index, 1)?;
        // SAFETY: single byte inside the checked range.
        unsafe { *self.ptr().add(index) = value };
        Ok(())
    }

    pub fn get_u16(&self, index: usize) -> Result<u16> {
        let mut b = [0u8; 2];
        self.get_bytes(index, &mut b)?;
        Ok(u16::from_be_bytes(b))
    }

    pub fn get_u16_le(&self, index: usize) -> Result<u16> {
        let mut b = [0u8; 2];
        self.get_bytes(index, &mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    pub fn get_u32(&self, index: usize) -> Result<u32> {
        let mut b = [0u8; 4];
        self.get_bytes(index, &mut b)?;
        Ok(u32::from_be_bytes(b))
    }

    pub fn get_u32_le(&self, index: usize) -> Result<u32> {
        let mut b = [0u8; 4];
        self.get_bytes(index, &mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    pub fn get_i32(&self, index: usize) -> Result<i32> {
        Ok(self.get_u32(index)? as i32)
    }

    pub fn get_u64(&self, index: usize) -> Result<u64> {
        let mut b = [0u8; 8];
        self.get_bytes(index, &mut b)?;
        Ok(u64::from_be_bytes(b))
    }

    pub fn get_u64_le(&self, index: usize) -> Result<u64> {
        let mut b = [0u8; 8];
        self.get_bytes(index, &mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    pub fn get_i64(&self, index: usize) -> Result<i64> {
        Ok(self.get_u64(index)? as i64)
    }

    pub fn set_u16(&mut self, index: usize, value: u16) -> Result<()> {
        self.set_bytes(index, &value.to_be_bytes())
    }

    pub fn set_u16_le(&mut self, index: usize, value: u16) -> Result<()> {
        self.set_bytes(index, &value.to_le_bytes())
    }

    pub fn set_u32(&mut self, index: usize, value: u32) -> Result<()> {
        self.set_bytes(index, &value.to_be_bytes())
    }

    pub fn set_u32_le(&mut self, index: usize, value: u32) -> Result<()> {
        self.set_bytes(index, &value.to_le_bytes())
    }

    pub fn set_i32(&mut self, index: usize, value: i32) -> Result<()> {
        self.set_u32(index, value as u32)
    }

    pub fn set_u64(&mut self, index: usize, value: u64) -> Result<()> {
        self.set_bytes(index, &value.to_be_bytes())
    }

    pub fn set_u64_le(&mut self, index: usize, value: u64) -> Result<()> {
        self.set_bytes(index, &value.to_le_bytes())
    }

    pub fn set_i64(&mut self, index: usize, value: i64) -> Result<()> {
        self.set_u64(index, value as u64)
    }

    // ------------------------------------------------------------------
    // Cursor accessors
    // ------------------------------------------------------------------

    pub fn read_bytes(&mut self, dst: &mut [u8]) -> Result<()> {
        self.check_readable(dst.len())?;
        self.get_bytes(self.reader, dst)?;
        self.reader += dst.len();
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.check_readable(1)?;
        let v = self.get_u8(self.reader)?;
        self.reader += 1;
        Ok(v)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.check_readable(2)?;
        let v = self.get_u16(self.reader)?;
        self.reader += 2;
        Ok(v)
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        self.check_readable(2)?;
        let v = self.get_u16_le(self.reader)?;
        self.reader += 2;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.check_readable(4)?;
        let v = self.get_u32(self.reader)?;
        self.reader += 4;
        Ok(v)
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        self.check_readable(4)?;
        let v = self.get_u32_le(self.reader)?;
        self.reader += 4;
        Ok(v)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.check_readable(8)?;
        let v = self.get_u64(self.reader)?;
        self.reader += 8;
        Ok(v)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn skip_bytes(&mut self, n: usize) -> Result<()> {
        self.check_readable(n)?;
        self.reader += n;
        Ok(())
    }

    pub fn write_bytes(&mut self, src: &[u8]) -> Result<()> {
        self.ensure_writable(src.len())?;
        let writer = self.writer;
        self.set_bytes(writer, src)?;
        self.writer += src.len();
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    pub fn write_i8(&mut self, value: i8) -> Result<()> {
        self.write_u8(value as u8)
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_u16_le(&mut self, value: u16) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_u32_le(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_u32(value as u32)
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.write_u64(value as u64)
    }

    /// Copy the readable region into a fresh `Vec` (does not move cursors).
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.readable_bytes()];
        // Readable range is inside capacity, so this cannot fail.
        let _ = self.get_bytes(self.reader, &mut out);
        out
    }

    // ------------------------------------------------------------------
    // Growth
    // ------------------------------------------------------------------

    /// Four-value contract, the canonical form:
    /// - 0: enough writable space already
    /// - 1: not enough, and growth past `max_capacity` refused (unchanged)
    /// - 2: not enough, grown to `max_capacity` (force mode)
    /// - 3: grown to satisfy the request
    pub fn ensure_writable_force(&mut self, min_writable: usize, force: bool) -> u8 {
        if self.writable_bytes() >= min_writable {
            return 0;
        }
        let required = self.writer.saturating_add(min_writable);
        if required > self.max_capacity {
            if !force || self.capacity == self.max_capacity {
                return 1;
            }
            let max_capacity = self.max_capacity;
            self.adjust_capacity(max_capacity);
            return 2;
        }
        let new_capacity = calculate_new_capacity(required, self.max_capacity);
        self.adjust_capacity(new_capacity);
        3
    }

    /// Grow so at least `min_writable` bytes are writable, or fail with
    /// [`Error::CapacityExceeded`]. Derived from the four-value form.
    pub fn ensure_writable(&mut self, min_writable: usize) -> Result<()> {
        match self.ensure_writable_force(min_writable, false) {
            1 => Err(Error::CapacityExceeded {
                required: self.writer.saturating_add(min_writable),
                max_capacity: self.max_capacity,
            }),
            _ => Ok(()),
        }
    }

    fn adjust_capacity(&mut self, new_capacity: usize) {
        debug_assert!(new_capacity >= self.capacity);
        if new_capacity <= self.fast_max {
            // The normalized backing already covers it.
            self.capacity = new_capacity;
            return;
        }

        // Reallocate in kind, copy content, drop our claim on the old region.
        let (new_shared, new_offset, new_fast_max) = match &self.shared.storage {
            Storage::Pooled { arena, .. } => {
                let arena = Arc::clone(arena);
                let alloc = arena.allocate(new_capacity);
                match alloc {
                    ArenaAlloc::Pooled {
                        memory,
                        chunk_id,
                        handle,
                        offset,
                        capacity,
                        size_idx,
                    } => (
                        SharedBuf::new(Storage::Pooled {
                            arena,
                            memory,
                            chunk_id,
                            handle,
                            size_idx,
                        }),
                        offset,
                        capacity,
                    ),
                    ArenaAlloc::Huge { memory, capacity } => {
                        (SharedBuf::new(Storage::Heap { memory }), 0, capacity)
                    }
                }
            }
            Storage::Heap { .. } => (
                SharedBuf::new(Storage::Heap {
                    memory: ChunkMemory::new(new_capacity),
                }),
                0,
                new_capacity,
            ),
        };

        let copy_len = self.capacity.min(new_capacity);
        if copy_len > 0 {
            // SAFETY: source range is inside the old view, destination inside
            // the freshly allocated region; the regions are distinct.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.ptr(),
                    new_shared.storage.memory().base_ptr().add(new_offset),
                    copy_len,
                );
            }
        }

        let old = std::mem::replace(&mut self.shared, new_shared);
        self.offset = new_offset;
        self.capacity = new_capacity;
        self.fast_max = new_fast_max;
        // Give up this view's claim; other views keep the old region alive.
        let _ = old.release_one();
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// View over the readable region, cursors reset to cover it.
    pub fn slice(&self) -> ByteBuf {
        // The readable range is always in bounds.
        self.slice_at(self.reader, self.readable_bytes())
            .unwrap_or_else(|_| unreachable!("readable range is in bounds"))
    }

    /// View over `[index, index + length)`; shares content, independent
    /// cursors, cannot grow.
    pub fn slice_at(&self, index: usize, length: usize) -> Result<ByteBuf> {
        self.check_index(index, length)?;
        Ok(ByteBuf {
            shared: Arc::clone(&self.shared),
            offset: self.offset + index,
            capacity: length,
            fast_max: length,
            max_capacity: length,
            reader: 0,
            writer: length,
            marked_reader: 0,
            marked_writer: 0,
        })
    }

    /// Retained variant of [`Self::slice_at`].
    pub fn retained_slice_at(&self, index: usize, length: usize) -> Result<ByteBuf> {
        self.shared.ref_cnt.retain(1)?;
        match self.slice_at(index, length) {
            Ok(view) => Ok(view),
            Err(e) => {
                let _ = self.shared.ref_cnt.release(1);
                Err(e)
            }
        }
    }

    /// Full-range view sharing cursors' current values.
    ///
    /// The view shares the parent's reference count without incrementing
    /// it: releasing (or growing, which consumes the shared claim on the
    /// old backing) through either side affects both. Use
    /// [`Self::retained_duplicate`] when the parent must outlive the view.
    pub fn duplicate(&self) -> ByteBuf {
        ByteBuf {
            shared: Arc::clone(&self.shared),
            offset: self.offset,
            capacity: self.capacity,
            fast_max: self.fast_max,
            max_capacity: self.max_capacity,
            reader: self.reader,
            writer: self.writer,
            marked_reader: self.marked_reader,
            marked_writer: self.marked_writer,
        }
    }

    /// Retained variant of [`Self::duplicate`].
    pub fn retained_duplicate(&self) -> Result<ByteBuf> {
        self.shared.ref_cnt.retain(1)?;
        Ok(self.duplicate())
    }

    /// Slice off the next `length` readable bytes, advancing the reader.
    pub fn read_slice(&mut self, length: usize) -> Result<ByteBuf> {
        self.check_readable(length)?;
        let view = self.slice_at(self.reader, length)?;
        self.reader += length;
        Ok(view)
    }

    /// Retained variant of [`Self::read_slice`].
    pub fn read_retained_slice(&mut self, length: usize) -> Result<ByteBuf> {
        self.check_readable(length)?;
        let view = self.retained_slice_at(self.reader, length)?;
        self.reader += length;
        Ok(view)
    }

    /// Copy the readable region into a fresh heap-backed buffer.
    pub fn copy(&self) -> Result<ByteBuf> {
        self.copy_range(self.reader, self.readable_bytes())
    }

    /// Copy `[index, index + length)` into a fresh heap-backed buffer.
    pub fn copy_range(&self, index: usize, length: usize) -> Result<ByteBuf> {
        self.check_index(index, length)?;
        let mut out = ByteBuf::heap(length, length);
        let mut tmp = vec![0u8; length];
        self.get_bytes(index, &mut tmp)?;
        out.write_bytes(&tmp)?;
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// Locate `needle` in `[from, to)`; `from > to` searches descending
    /// through `(to, from]`-style ranges, mirroring the ascending form.
    pub fn index_of(&self, from: usize, to: usize, needle: u8) -> Option<usize> {
        if from <= to {
            let to = to.min(self.capacity);
            (from..to).find(|&i| {
                self.get_u8(i).map(|b| b == needle).unwrap_or(false)
            })
        } else {
            let from = from.min(self.capacity);
            (to..from)
                .rev()
                .find(|&i| self.get_u8(i).map(|b| b == needle).unwrap_or(false))
        }
    }

    /// Run `processor` over `[from, to)`; like [`Self::index_of`], `from >
    /// to` iterates descending. Returns the index where the processor
    /// stopped (returned `false`), or `None` when the range was exhausted.
    pub fn for_each_byte_between<F: FnMut(u8) -> bool>(
        &self,
        from: usize,
        to: usize,
        mut processor: F,
    ) -> Option<usize> {
        let step = |i: usize, processor: &mut F| -> Option<Option<usize>> {
            let byte = self.get_u8(i).ok()?;
            Some((!processor(byte)).then_some(i))
        };
        if from <= to {
            let to = to.min(self.capacity);
            for i in from..to {
                if let Some(stop) = step(i, &mut processor)? {
                    return Some(stop);
                }
            }
        } else {
            let from = from.min(self.capacity);
            for i in (to..from).rev() {
                if let Some(stop) = step(i, &mut processor)? {
                    return Some(stop);
                }
            }
        }
        None
    }

    /// Ascending iteration over the readable bytes.
    pub fn for_each_byte<F: FnMut(u8) -> bool>(&self, processor: F) -> Option<usize> {
        self.for_each_byte_between(self.reader, self.writer, processor)
    }

    /// Descending iteration over the readable bytes.
    pub fn for_each_byte_desc<F: FnMut(u8) -> bool>(&self, processor: F) -> Option<usize> {
        self.for_each_byte_between(self.writer, self.reader, processor)
    }
}

impl std::fmt::Debug for ByteBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteBuf")
            .field("reader", &self.reader)
            .field("writer", &self.writer)
            .field("capacity", &self.capacity)
            .field("max_capacity", &self.max_capacity)
            .field("ref_cnt", &self.ref_cnt())
            .finish()
    }
}
