// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Channels: endpoints bound to one event loop, driving a handler pipeline.
//!
//! A channel is permanently bound to the loop it is first registered with;
//! every handler callback and listener for that channel runs on that loop's
//! thread. Outbound writes queue in the channel until `flush`; queued bytes
//! are tracked against the write-buffer water marks, flipping
//! `is_writable()` at the high mark and back at the low mark.

pub mod context;
pub mod embedded;
pub mod handler;
pub mod initializer;
pub mod options;
pub mod pipeline;

pub use context::HandlerContext;
pub use embedded::EmbeddedChannel;
pub use handler::{Handler, HandlerMask, Message};
pub use initializer::ChannelInitializer;
pub use options::{
    AdaptiveRecvBufAllocator, ChannelOption, DefaultMessageSizeEstimator, MessageSizeEstimator,
    RecvBufAllocator, WriteBufferWaterMark,
};
pub use pipeline::Pipeline;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::buf::{ByteBuf, PooledAllocator};
use crate::error::{Error, Result};
use crate::executor::{EventLoop, Future, Promise};
use crate::transport::Transport;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

struct OutboundEntry {
    msg: Message,
    size: usize,
    promise: Promise<()>,
}

struct Outbound {
    queue: VecDeque<OutboundEntry>,
    queued_bytes: usize,
}

pub(crate) struct ChannelInner {
    id: u64,
    pipeline: Pipeline,
    event_loop: OnceLock<EventLoop>,
    transport: Arc<dyn Transport>,
    config: ChannelConfig,
    open: AtomicBool,
    active: AtomicBool,
    registered: AtomicBool,
    writable: AtomicBool,
    outbound: Mutex<Outbound>,
}

/// Cloneable channel handle.
#[derive(Clone)]
pub struct Channel {
    pub(crate) inner: Arc<ChannelInner>,
}

impl Channel {
    /// Channel over `transport` with a fresh pipeline. Register it with a
    /// loop before expecting loop-bound execution; without registration
    /// (tests, [`EmbeddedChannel`]) events run inline on the caller.
    pub fn new(transport: Arc<dyn Transport>) -> Channel {
        let pipeline = Pipeline::new();
        let inner = Arc::new(ChannelInner {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            pipeline: pipeline.clone(),
            event_loop: OnceLock::new(),
            transport,
            config: ChannelConfig::new(),
            open: AtomicBool::new(true),
            active: AtomicBool::new(false),
            registered: AtomicBool::new(false),
            writable: AtomicBool::new(true),
            outbound: Mutex::new(Outbound {
                queue: VecDeque::new(),
                queued_bytes: 0,
            }),
        });
        pipeline.attach_channel(&inner);
        Channel { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn pipeline(&self) -> Pipeline {
        self.inner.pipeline.clone()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Bind to an event loop. The binding is permanent; a second call
    /// fails. Fires `channel_registered` through the pipeline.
    pub fn register(&self, event_loop: EventLoop) -> Result<()> {
        if self.inner.event_loop.set(event_loop).is_err() {
            return Err(Error::IllegalState(
                "channel already registered with an event loop".into(),
            ));
        }
        self.inner.registered.store(true, Ordering::Release);
        self.inner.pipeline.fire_channel_registered();
        Ok(())
    }

    /// The bound loop, if registered.
    pub fn event_loop(&self) -> Option<EventLoop> {
        self.inner.event_loop.get().cloned()
    }

    pub(crate) fn event_loop_opt(&self) -> Option<EventLoop> {
        self.inner.event_loop.get().cloned()
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn is_registered(&self) -> bool {
        self.inner.registered.load(Ordering::Acquire)
    }

    /// False while queued outbound bytes sit above the high water mark.
    pub fn is_writable(&self) -> bool {
        self.inner.writable.load(Ordering::Acquire)
    }

    /// Bytes queued for flush.
    pub fn queued_bytes(&self) -> usize {
        self.inner.outbound.lock().queued_bytes
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.transport.local_addr()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.transport.peer_addr()
    }

    // ------------------------------------------------------------------
    // Outbound operations (enter the pipeline at the tail)
    // ------------------------------------------------------------------

    pub fn write(&self, msg: Message) -> Future<()> {
        self.inner.pipeline.write(msg)
    }

    pub fn flush(&self) {
        self.inner.pipeline.flush();
    }

    pub fn write_and_flush(&self, msg: Message) -> Future<()> {
        self.inner.pipeline.write_and_flush(msg)
    }

    pub fn bind(&self, addr: SocketAddr) -> Future<()> {
        self.inner.pipeline.bind(addr)
    }

    pub fn connect(&self, addr: SocketAddr) -> Future<()> {
        self.inner.pipeline.connect(addr)
    }

    pub fn disconnect(&self) -> Future<()> {
        self.inner.pipeline.disconnect()
    }

    pub fn close(&self) -> Future<()> {
        self.inner.pipeline.close()
    }

    // ------------------------------------------------------------------
    // Head terminal operations (transport side; called by the head context)
    // ------------------------------------------------------------------

    pub(crate) fn head_bind(&self, addr: SocketAddr, promise: Promise<()>) {
        match self.inner.transport.bind(addr) {
            Ok(()) => {
                promise.try_success(());
            }
            Err(e) => {
                promise.try_failure(e);
            }
        }
    }

    pub(crate) fn head_connect(&self, addr: SocketAddr, promise: Promise<()>) {
        match self.inner.transport.connect(addr) {
            Ok(()) => {
                self.inner.active.store(true, Ordering::Release);
                promise.try_success(());
                self.inner.pipeline.fire_channel_active();
            }
            Err(e) => {
                promise.try_failure(e);
            }
        }
    }

    pub(crate) fn head_disconnect(&self, promise: Promise<()>) {
        match self.inner.transport.disconnect() {
            Ok(()) => {
                if self.inner.active.swap(false, Ordering::AcqRel) {
                    self.inner.pipeline.fire_channel_inactive();
                }
                promise.try_success(());
            }
            Err(e) => {
                promise.try_failure(e);
            }
        }
    }

    pub(crate) fn head_close(&self, promise: Promise<()>) {
        if !self.inner.open.swap(false, Ordering::AcqRel) {
            promise.try_success(()); // already closed
            return;
        }
        // Fail everything still queued. Promises complete outside the lock
        // so inline listeners can touch the channel again.
        let abandoned: Vec<Promise<()>> = {
            let mut outbound = self.inner.outbound.lock();
            outbound.queued_bytes = 0;
            outbound
                .queue
                .drain(..)
                .map(|entry| {
                    release_if_buf(entry.msg);
                    entry.promise
                })
                .collect()
        };
        for promise in abandoned {
            promise.try_failure(Error::IllegalState("channel closed".into()));
        }
        let result = self.inner.transport.close();
        if self.inner.active.swap(false, Ordering::AcqRel) {
            self.inner.pipeline.fire_channel_inactive();
        }
        match result {
            Ok(()) => {
                promise.try_success(());
            }
            Err(e) => {
                promise.try_failure(e);
            }
        }
    }

    pub(crate) fn head_write(&self, msg: Message, promise: Promise<()>) {
        if !self.is_open() {
            release_if_buf(msg);
            promise.try_failure(Error::IllegalState("channel closed".into()));
            return;
        }
        let size = self.inner.config.estimator().size(&msg);
        let crossed_high = {
            let mut outbound = self.inner.outbound.lock();
            outbound.queue.push_back(OutboundEntry { msg, size, promise });
            outbound.queued_bytes += size;
            outbound.queued_bytes > self.inner.config.water_mark().high
        };
        if crossed_high && self.inner.writable.swap(false, Ordering::AcqRel) {
            self.inner.pipeline.fire_channel_writability_changed();
        }
    }

    pub(crate) fn head_flush(&self) {
        let spin = self.inner.config.write_spin_count().max(1);
        // Promise completions are deferred past the lock so inline listeners
        // can write again without deadlocking on the outbound queue.
        let mut completions: Vec<(Promise<()>, Result<()>)> = Vec::new();

        let mut outbound = self.inner.outbound.lock();
        while let Some(entry) = outbound.queue.pop_front() {
            let OutboundEntry { msg, size, promise } = entry;
            let mut buf = match msg.downcast::<ByteBuf>() {
                Ok(buf) => *buf,
                Err(_) => {
                    outbound.queued_bytes -= size;
                    completions.push((
                        promise,
                        Err(Error::Unsupported("only ByteBuf messages reach the transport")),
                    ));
                    continue;
                }
            };

            let mut failed = None;
            let mut spins = 0;
            while buf.is_readable() && spins < spin {
                match self.inner.transport.write(&mut buf) {
                    Ok(0) => spins += 1,
                    Ok(_) => {}
                    Err(e) => {
                        failed = Some(e);
                        break;
                    }
                }
            }

            if let Some(e) = failed {
                outbound.queued_bytes -= size;
                let _ = buf.release();
                completions.push((promise, Err(e)));
                continue;
            }
            if buf.is_readable() {
                // Transport saturated: requeue what is left and stop. The
                // remaining size stays counted against the water marks.
                let remaining = buf.readable_bytes();
                outbound.queued_bytes -= size - remaining;
                outbound.queue.push_front(OutboundEntry {
                    msg: Box::new(buf),
                    size: remaining,
                    promise,
                });
                break;
            }
            outbound.queued_bytes -= size;
            let _ = buf.release();
            completions.push((promise, Ok(())));
        }
        let below_low = outbound.queued_bytes < self.inner.config.water_mark().low;
        drop(outbound);

        for (promise, result) in completions {
            match result {
                Ok(()) => {
                    promise.try_success(());
                }
                Err(e) => {
                    promise.try_failure(e);
                }
            }
        }
        if below_low && !self.inner.writable.swap(true, Ordering::AcqRel) {
            self.inner.pipeline.fire_channel_writability_changed();
        }
    }
}

fn release_if_buf(msg: Message) {
    if let Ok(buf) = msg.downcast::<ByteBuf>() {
        let _ = buf.release();
    }
}

// ============================================================================
// Channel configuration
// ============================================================================

/// Per-channel configuration: typed fields for the hot options plus a
/// generic store for everything else (transport-socket options are read by
/// the transport implementation).
pub struct ChannelConfig {
    allocator: Mutex<Arc<PooledAllocator>>,
    water_mark: Mutex<WriteBufferWaterMark>,
    auto_read: AtomicBool,
    auto_close: AtomicBool,
    connect_timeout_ms: AtomicU64,
    write_spin_count: AtomicU32,
    estimator: Mutex<Arc<dyn MessageSizeEstimator>>,
    recv_alloc: Mutex<Arc<dyn RecvBufAllocator>>,
    options: options::OptionMap,
}

impl ChannelConfig {
    fn new() -> Self {
        Self {
            allocator: Mutex::new(PooledAllocator::shared()),
            water_mark: Mutex::new(WriteBufferWaterMark::default()),
            auto_read: AtomicBool::new(true),
            auto_close: AtomicBool::new(true),
            connect_timeout_ms: AtomicU64::new(30_000),
            write_spin_count: AtomicU32::new(16),
            estimator: Mutex::new(Arc::new(DefaultMessageSizeEstimator::default())),
            recv_alloc: Mutex::new(Arc::new(AdaptiveRecvBufAllocator::default())),
            options: options::OptionMap::new(),
        }
    }

    pub fn allocator(&self) -> Arc<PooledAllocator> {
        Arc::clone(&self.allocator.lock())
    }

    pub fn water_mark(&self) -> WriteBufferWaterMark {
        *self.water_mark.lock()
    }

    pub fn set_water_mark(&self, water_mark: WriteBufferWaterMark) {
        *self.water_mark.lock() = water_mark;
    }

    pub fn is_auto_read(&self) -> bool {
        self.auto_read.load(Ordering::Acquire)
    }

    pub fn set_auto_read(&self, auto_read: bool) {
        self.auto_read.store(auto_read, Ordering::Release);
    }

    pub fn is_auto_close(&self) -> bool {
        self.auto_close.load(Ordering::Acquire)
    }

    pub fn connect_timeout_millis(&self) -> u64 {
        self.connect_timeout_ms.load(Ordering::Acquire)
    }

    pub fn write_spin_count(&self) -> u32 {
        self.write_spin_count.load(Ordering::Acquire)
    }

    pub fn estimator(&self) -> Arc<dyn MessageSizeEstimator> {
        Arc::clone(&self.estimator.lock())
    }

    pub fn recv_buf_allocator(&self) -> Arc<dyn RecvBufAllocator> {
        Arc::clone(&self.recv_alloc.lock())
    }

    /// Set an option; the well-known keys update their typed fields, the
    /// rest land in the generic store for the transport to read.
    pub fn set_option<T: std::any::Any + Send + Sync + Clone>(
        &self,
        option: &ChannelOption<T>,
        value: T,
    ) {
        let any = &value as &dyn std::any::Any;
        if option.id() == options::write_buffer_water_mark().id() {
            if let Some(wm) = any.downcast_ref::<WriteBufferWaterMark>() {
                self.set_water_mark(*wm);
                return;
            }
        } else if option.id() == options::auto_read().id() {
            if let Some(v) = any.downcast_ref::<bool>() {
                self.set_auto_read(*v);
                return;
            }
        } else if option.id() == options::auto_close().id() {
            if let Some(v) = any.downcast_ref::<bool>() {
                self.auto_close.store(*v, Ordering::Release);
                return;
            }
        } else if option.id() == options::connect_timeout_millis().id() {
            if let Some(v) = any.downcast_ref::<u64>() {
                self.connect_timeout_ms.store(*v, Ordering::Release);
                return;
            }
        } else if option.id() == options::write_spin_count().id() {
            if let Some(v) = any.downcast_ref::<u32>() {
                self.write_spin_count.store(*v, Ordering::Release);
                return;
            }
        } else if option.id() == options::message_size_estimator().id() {
            if let Some(v) = any.downcast_ref::<Arc<dyn MessageSizeEstimator>>() {
                *self.estimator.lock() = Arc::clone(v);
                return;
            }
        } else if option.id() == options::rcvbuf_allocator().id() {
            if let Some(v) = any.downcast_ref::<Arc<dyn RecvBufAllocator>>() {
                *self.recv_alloc.lock() = Arc::clone(v);
                return;
            }
        } else if option.id() == options::allocator().id() {
            if let Some(v) = any.downcast_ref::<Arc<PooledAllocator>>() {
                *self.allocator.lock() = Arc::clone(v);
                return;
            }
        }
        self.options.set(option, value);
    }

    /// Read an option from the typed fields or the generic store.
    pub fn get_option<T: std::any::Any + Send + Sync + Clone>(
        &self,
        option: &ChannelOption<T>,
    ) -> Option<T> {
        fn as_t<T: 'static + Clone>(value: &dyn std::any::Any) -> Option<T> {
            value.downcast_ref::<T>().cloned()
        }
        if option.id() == options::write_buffer_water_mark().id() {
            return as_t(&self.water_mark());
        }
        if option.id() == options::auto_read().id() {
            return as_t(&self.is_auto_read());
        }
        if option.id() == options::auto_close().id() {
            return as_t(&self.is_auto_close());
        }
        if option.id() == options::connect_timeout_millis().id() {
            return as_t(&self.connect_timeout_millis());
        }
        if option.id() == options::write_spin_count().id() {
            return as_t(&self.write_spin_count());
        }
        self.options.get(option)
    }
}
