// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Pooled, reference-counted byte buffer subsystem.
//!
//! Allocation requests are normalized onto a quantized size-class table and
//! served out of pre-reserved chunks: page runs for normal sizes, bitmap
//! subpages for small ones, a one-shot region for anything beyond the chunk
//! size. Per-thread caches short-circuit the arena lock for the common
//! alloc/free cycle, and an even/odd reference count drives deterministic
//! reclamation.
//!
//! Layering, bottom up:
//!
//! - `size_classes` - request size -> class index mapping
//! - `chunk` - one region: run splitting/merging + subpage bitmaps
//! - `arena` - occupancy-banded chunk broker, subpage pools
//! - `cache` - per-thread free lists in front of the arena
//! - `ref_cnt` / [`leak`] - lifecycle: retain/release + leak reports
//! - [`byte_buf`] / [`composite`] / [`unpooled`] - the buffer surface
//! - [`alloc`] - the public allocator facade

pub(crate) mod arena;
pub(crate) mod cache;
pub(crate) mod chunk;
pub mod leak;
pub(crate) mod ref_cnt;
pub(crate) mod size_classes;

pub mod alloc;
pub mod byte_buf;
pub mod composite;
pub mod unpooled;

pub use alloc::PooledAllocator;
pub use byte_buf::ByteBuf;
pub use composite::CompositeByteBuf;
pub use leak::LeakLevel;
