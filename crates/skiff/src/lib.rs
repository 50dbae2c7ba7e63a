// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! # skiff - event-driven asynchronous network I/O framework
//!
//! skiff separates I/O scheduling (event loops) from protocol logic
//! (handler pipelines) and amortizes allocation cost with a pooled,
//! reference-counted byte buffer subsystem.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use skiff::buf::PooledAllocator;
//! use skiff::executor::EventLoopGroup;
//!
//! fn main() -> skiff::Result<()> {
//!     let alloc = PooledAllocator::shared();
//!     let mut buf = alloc.buffer()?;
//!     buf.write_u32(0xCAFEBABE)?;
//!
//!     let group = EventLoopGroup::new(2)?;
//!     let future = group.next().submit(move || buf.release());
//!     future.sync()?;
//!     group.shutdown_gracefully_default().sync()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                        Application Layer                           |
//! |        Channel -> Pipeline -> Handler / Handler / Handler          |
//! +--------------------------------------------------------------------+
//! |                         Executor Layer                             |
//! |   EventLoopGroup -> EventLoop (task queue | scheduled | mio poll)  |
//! +--------------------------------------------------------------------+
//! |                          Buffer Layer                              |
//! |   PooledAllocator -> Arena -> Chunk (runs) / Subpage (bitmaps)     |
//! |                 ThreadCache | RefCnt | LeakDetector                |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`buf::ByteBuf`] | Cursored byte buffer over pooled or heap storage |
//! | [`buf::PooledAllocator`] | Arena-backed allocator with per-thread caches |
//! | [`executor::EventLoop`] | Single-threaded task + I/O scheduler |
//! | [`executor::EventLoopGroup`] | Fixed pool of loops with a round-robin chooser |
//! | [`executor::Promise`] | Writable completion handle with a listener chain |
//! | [`channel::Channel`] | Endpoint bound to one loop, driving a pipeline |
//! | [`channel::Pipeline`] | Doubly linked handler list (inbound/outbound) |
//!
//! ## Modules Overview
//!
//! - [`buf`] - pooled buffer allocator and the `ByteBuf` surface (start here)
//! - [`executor`] - event loops, groups, promises, scheduled tasks
//! - [`channel`] - channels, pipelines, handlers, typed options
//! - [`transport`] - the transport seam consumed by channels
//! - [`config`] - `SKIFF_*` tuning knobs

/// Pooled byte buffer subsystem (size classes, chunks, arenas, caches).
pub mod buf;
/// Channels, handler pipelines, and typed channel options.
pub mod channel;
/// Runtime tuning knobs (`SKIFF_*` environment variables).
pub mod config;
/// Crate error type.
pub mod error;
/// Event loops, groups, promises, and scheduled tasks.
pub mod executor;
/// Transport seam consumed by channels (sockets live outside this crate).
pub mod transport;

pub use buf::{ByteBuf, CompositeByteBuf, PooledAllocator};
pub use channel::{Channel, ChannelOption, Handler, HandlerMask, Pipeline};
pub use error::{Error, Result};
pub use executor::{EventLoop, EventLoopGroup, Future, Promise};

/// skiff version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
