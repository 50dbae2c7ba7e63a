// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Handler pipeline: doubly linked context list with sentinel head and tail.
//!
//! The head is the transport-facing terminal: outbound operations that walk
//! past every user handler land on it and hit the channel, and inbound
//! events injected by the transport start right after it. The tail absorbs
//! inbound events nothing else consumed (releasing buffers, logging
//! exceptions).
//!
//! Structural changes (`add_*`, `remove`, `replace`) are legal while events
//! propagate: links are swapped under the pipeline lock, a removed context
//! keeps its own links so in-flight walks continue past it, and the
//! `handler_added` / `handler_removed` callbacks run on the channel's loop.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::context::{self, HandlerContext};
use super::handler::{Handler, HandlerMask, Message};
use super::{Channel, ChannelInner};
use crate::buf::ByteBuf;
use crate::error::{Error, Result};
use crate::executor::{EventLoop, Executor, Future, Promise};

pub(crate) struct PipelineInner {
    head: Arc<HandlerContext>,
    tail: Arc<HandlerContext>,
    channel: Mutex<Weak<ChannelInner>>,
    /// Serializes structural list mutation.
    structure: Mutex<()>,
}

impl PipelineInner {
    pub(crate) fn channel(&self) -> Option<Channel> {
        self.channel.lock().upgrade().map(|inner| Channel { inner })
    }
}

/// Cloneable pipeline handle; one per channel.
#[derive(Clone)]
pub struct Pipeline {
    pub(crate) inner: Arc<PipelineInner>,
}

impl Pipeline {
    pub(crate) fn new() -> Pipeline {
        let inner = Arc::new_cyclic(|weak: &Weak<PipelineInner>| PipelineInner {
            head: HandlerContext::new(
                "head".to_string(),
                Arc::new(HeadHandler),
                None,
                weak.clone(),
            ),
            tail: HandlerContext::new(
                "tail".to_string(),
                Arc::new(TailHandler),
                None,
                weak.clone(),
            ),
            channel: Mutex::new(Weak::new()),
            structure: Mutex::new(()),
        });
        *inner.head.next.lock() = Some(Arc::clone(&inner.tail));
        *inner.tail.prev.lock() = Arc::downgrade(&inner.head);
        Pipeline { inner }
    }

    pub(crate) fn attach_channel(&self, channel: &Arc<ChannelInner>) {
        *self.inner.channel.lock() = Arc::downgrade(channel);
    }

    /// The channel this pipeline drives.
    pub fn channel(&self) -> Option<Channel> {
        self.inner.channel()
    }

    // ------------------------------------------------------------------
    // Structural modification
    // ------------------------------------------------------------------

    /// Append a handler just before the tail.
    pub fn add_last(&self, name: &str, handler: Arc<dyn Handler>) -> Result<()> {
        self.add_last_with_executor(name, None, handler)
    }

    /// Append with an executor override: events for this handler run on
    /// `executor` instead of the channel's loop, preserving per-pipeline
    /// order through task submission.
    pub fn add_last_with_executor(
        &self,
        name: &str,
        executor: Option<EventLoop>,
        handler: Arc<dyn Handler>,
    ) -> Result<()> {
        let ctx = {
            let _guard = self.inner.structure.lock();
            self.check_duplicate(name)?;
            let ctx = HandlerContext::new(
                name.to_string(),
                handler,
                executor,
                Arc::downgrade(&self.inner),
            );
            let prev = self
                .inner
                .tail
                .prev
                .lock()
                .upgrade()
                .unwrap_or_else(|| unreachable!("tail always has a predecessor"));
            link_after(&prev, &ctx);
            ctx
        };
        // Callback outside the structure lock: handler_added may add more
        // handlers (the initializer does).
        self.invoke_handler_added(ctx);
        Ok(())
    }

    /// Prepend a handler just after the head.
    pub fn add_first(&self, name: &str, handler: Arc<dyn Handler>) -> Result<()> {
        let ctx = {
            let _guard = self.inner.structure.lock();
            self.check_duplicate(name)?;
            let ctx = HandlerContext::new(
                name.to_string(),
                handler,
                None,
                Arc::downgrade(&self.inner),
            );
            link_after(&self.inner.head, &ctx);
            ctx
        };
        self.invoke_handler_added(ctx);
        Ok(())
    }

    /// Insert before the named handler.
    pub fn add_before(&self, base: &str, name: &str, handler: Arc<dyn Handler>) -> Result<()> {
        let ctx = {
            let _guard = self.inner.structure.lock();
            self.check_duplicate(name)?;
            let anchor = self
                .context(base)
                .ok_or_else(|| Error::IllegalState(format!("no handler named {}", base)))?;
            let prev = anchor
                .prev
                .lock()
                .upgrade()
                .ok_or_else(|| Error::IllegalState(format!("{} already unlinked", base)))?;
            let ctx = HandlerContext::new(
                name.to_string(),
                handler,
                None,
                Arc::downgrade(&self.inner),
            );
            link_after(&prev, &ctx);
            ctx
        };
        self.invoke_handler_added(ctx);
        Ok(())
    }

    /// Insert after the named handler.
    pub fn add_after(&self, base: &str, name: &str, handler: Arc<dyn Handler>) -> Result<()> {
        let ctx = {
            let _guard = self.inner.structure.lock();
            self.check_duplicate(name)?;
            let anchor = self
                .context(base)
                .ok_or_else(|| Error::IllegalState(format!("no handler named {}", base)))?;
            let ctx = HandlerContext::new(
                name.to_string(),
                handler,
                None,
                Arc::downgrade(&self.inner),
            );
            link_after(&anchor, &ctx);
            ctx
        };
        self.invoke_handler_added(ctx);
        Ok(())
    }

    /// Unlink the named handler; its `handler_removed` runs exactly once.
    pub fn remove(&self, name: &str) -> Result<()> {
        let ctx = {
            let _guard = self.inner.structure.lock();
            let ctx = self
                .context(name)
                .ok_or_else(|| Error::IllegalState(format!("no handler named {}", name)))?;
            unlink(&ctx);
            ctx
        };
        if ctx.mark_removed() {
            self.run_on_loop({
                let ctx = Arc::clone(&ctx);
                move || ctx.handler().handler_removed(&ctx)
            });
        }
        Ok(())
    }

    /// Swap the named handler for a new one in place.
    pub fn replace(&self, old: &str, name: &str, handler: Arc<dyn Handler>) -> Result<()> {
        let (old_ctx, new_ctx) = {
            let _guard = self.inner.structure.lock();
            if old != name {
                self.check_duplicate(name)?;
            }
            let old_ctx = self
                .context(old)
                .ok_or_else(|| Error::IllegalState(format!("no handler named {}", old)))?;
            let prev = old_ctx
                .prev
                .lock()
                .upgrade()
                .ok_or_else(|| Error::IllegalState(format!("{} already unlinked", old)))?;
            let new_ctx = HandlerContext::new(
                name.to_string(),
                handler,
                None,
                Arc::downgrade(&self.inner),
            );
            unlink(&old_ctx);
            link_after(&prev, &new_ctx);
            (old_ctx, new_ctx)
        };
        self.invoke_handler_added(new_ctx);
        if old_ctx.mark_removed() {
            self.run_on_loop({
                let ctx = Arc::clone(&old_ctx);
                move || ctx.handler().handler_removed(&ctx)
            });
        }
        Ok(())
    }

    /// Context of the named handler (sentinels excluded).
    pub fn context(&self, name: &str) -> Option<Arc<HandlerContext>> {
        let mut cursor = self.inner.head.next.lock().clone();
        while let Some(ctx) = cursor {
            if Arc::ptr_eq(&ctx, &self.inner.tail) {
                return None;
            }
            if ctx.name() == name && !ctx.is_removed() {
                return Some(ctx);
            }
            cursor = ctx.next.lock().clone();
        }
        None
    }

    /// Handler names, head to tail.
    pub fn names(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut cursor = self.inner.head.next.lock().clone();
        while let Some(ctx) = cursor {
            if Arc::ptr_eq(&ctx, &self.inner.tail) {
                break;
            }
            out.push(ctx.name().to_string());
            cursor = ctx.next.lock().clone();
        }
        out
    }

    fn check_duplicate(&self, name: &str) -> Result<()> {
        if name == "head" || name == "tail" || self.context(name).is_some() {
            return Err(Error::IllegalState(format!(
                "duplicate handler name: {}",
                name
            )));
        }
        Ok(())
    }

    fn invoke_handler_added(&self, ctx: Arc<HandlerContext>) {
        self.run_on_loop(move || ctx.handler().handler_added(&ctx));
    }

    /// Run `f` on the channel's loop if one is bound and we are off it;
    /// inline otherwise.
    fn run_on_loop(&self, f: impl FnOnce() + Send + 'static) {
        let event_loop = self.channel().and_then(|c| c.event_loop_opt());
        match event_loop {
            Some(el) if !el.in_event_loop() => {
                if let Err(e) = el.execute(f) {
                    log::warn!("[pipeline] deferred callback rejected: {}", e);
                }
            }
            _ => f(),
        }
    }

    // ------------------------------------------------------------------
    // Inbound entry points (transport side)
    // ------------------------------------------------------------------

    pub fn fire_channel_registered(&self) {
        context::invoke_channel_registered(&self.inner.head);
    }

    pub fn fire_channel_active(&self) {
        context::invoke_channel_active(&self.inner.head);
    }

    pub fn fire_channel_inactive(&self) {
        context::invoke_channel_inactive(&self.inner.head);
    }

    pub fn fire_channel_read(&self, msg: Message) {
        context::invoke_channel_read(&self.inner.head, msg);
    }

    pub fn fire_channel_read_complete(&self) {
        context::invoke_channel_read_complete(&self.inner.head);
    }

    pub fn fire_channel_writability_changed(&self) {
        context::invoke_channel_writability_changed(&self.inner.head);
    }

    pub fn fire_user_event(&self, event: Message) {
        context::invoke_user_event(&self.inner.head, event);
    }

    pub fn fire_exception_caught(&self, cause: Error) {
        context::invoke_exception_caught(&self.inner.head, cause);
    }

    // ------------------------------------------------------------------
    // Outbound entry points (user side, starting at the tail)
    // ------------------------------------------------------------------

    fn new_promise(&self) -> Promise<()> {
        let executor = self
            .channel()
            .and_then(|c| c.event_loop_opt())
            .map(|el| Arc::new(el) as Arc<dyn Executor>);
        Promise::new(executor)
    }

    pub fn write(&self, msg: Message) -> Future<()> {
        let promise = self.new_promise();
        self.inner.tail.invoke_write(msg, promise.clone());
        promise.future()
    }

    pub fn flush(&self) {
        self.inner.tail.invoke_flush();
    }

    pub fn write_and_flush(&self, msg: Message) -> Future<()> {
        let future = self.write(msg);
        self.flush();
        future
    }

    pub fn bind(&self, addr: SocketAddr) -> Future<()> {
        let promise = self.new_promise();
        self.inner.tail.invoke_bind(addr, promise.clone());
        promise.future()
    }

    pub fn connect(&self, addr: SocketAddr) -> Future<()> {
        let promise = self.new_promise();
        self.inner.tail.invoke_connect(addr, promise.clone());
        promise.future()
    }

    pub fn disconnect(&self) -> Future<()> {
        let promise = self.new_promise();
        self.inner.tail.invoke_disconnect(promise.clone());
        promise.future()
    }

    pub fn close(&self) -> Future<()> {
        let promise = self.new_promise();
        self.inner.tail.invoke_close(promise.clone());
        promise.future()
    }
}

/// Insert `ctx` between `prev` and `prev.next`.
fn link_after(prev: &Arc<HandlerContext>, ctx: &Arc<HandlerContext>) {
    let next = prev
        .next
        .lock()
        .clone()
        .unwrap_or_else(|| unreachable!("link anchor always has a successor"));
    *ctx.prev.lock() = Arc::downgrade(prev);
    *ctx.next.lock() = Some(Arc::clone(&next));
    *prev.next.lock() = Some(Arc::clone(ctx));
    *next.prev.lock() = Arc::downgrade(ctx);
}

/// Splice `ctx` out of the list. Its own links are left intact so walks
/// that already reached it continue into the live list.
fn unlink(ctx: &Arc<HandlerContext>) {
    let prev = ctx.prev.lock().upgrade();
    let next = ctx.next.lock().clone();
    if let (Some(prev), Some(next)) = (prev, next) {
        *prev.next.lock() = Some(Arc::clone(&next));
        *next.prev.lock() = Arc::downgrade(&prev);
    }
}

// ============================================================================
// Sentinel handlers
// ============================================================================

/// Transport-facing outbound terminal.
struct HeadHandler;

impl Handler for HeadHandler {
    fn bind(&self, ctx: &Arc<HandlerContext>, addr: SocketAddr, promise: Promise<()>) {
        match ctx.channel() {
            Some(channel) => channel.head_bind(addr, promise),
            None => {
                promise.try_failure(Error::IllegalState("channel gone".into()));
            }
        }
    }

    fn connect(&self, ctx: &Arc<HandlerContext>, addr: SocketAddr, promise: Promise<()>) {
        match ctx.channel() {
            Some(channel) => channel.head_connect(addr, promise),
            None => {
                promise.try_failure(Error::IllegalState("channel gone".into()));
            }
        }
    }

    fn disconnect(&self, ctx: &Arc<HandlerContext>, promise: Promise<()>) {
        match ctx.channel() {
            Some(channel) => channel.head_disconnect(promise),
            None => {
                promise.try_failure(Error::IllegalState("channel gone".into()));
            }
        }
    }

    fn close(&self, ctx: &Arc<HandlerContext>, promise: Promise<()>) {
        match ctx.channel() {
            Some(channel) => channel.head_close(promise),
            None => {
                promise.try_failure(Error::IllegalState("channel gone".into()));
            }
        }
    }

    fn write(&self, ctx: &Arc<HandlerContext>, msg: Message, promise: Promise<()>) {
        match ctx.channel() {
            Some(channel) => channel.head_write(msg, promise),
            None => {
                promise.try_failure(Error::IllegalState("channel gone".into()));
            }
        }
    }

    fn flush(&self, ctx: &Arc<HandlerContext>) {
        if let Some(channel) = ctx.channel() {
            channel.head_flush();
        }
    }
}

/// Inbound terminal: absorbs whatever reached the end of the pipeline.
struct TailHandler;

impl Handler for TailHandler {
    fn mask(&self) -> HandlerMask {
        HandlerMask::inbound()
    }

    fn channel_read(&self, _ctx: &Arc<HandlerContext>, msg: Message) -> Result<()> {
        log::debug!("[pipeline] discarded inbound message that reached the tail");
        if let Ok(buf) = msg.downcast::<ByteBuf>() {
            let _ = buf.release();
        }
        Ok(())
    }

    fn exception_caught(&self, _ctx: &Arc<HandlerContext>, cause: Error) -> Result<()> {
        log::warn!(
            "[pipeline] exception reached the tail (add an exception handler): {}",
            cause
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::EmbeddedChannel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Probe {
        added: AtomicUsize,
        removed: AtomicUsize,
    }

    impl Probe {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                added: AtomicUsize::new(0),
                removed: AtomicUsize::new(0),
            })
        }
    }

    impl Handler for Probe {
        fn handler_added(&self, _ctx: &Arc<HandlerContext>) {
            self.added.fetch_add(1, Ordering::SeqCst);
        }
        fn handler_removed(&self, _ctx: &Arc<HandlerContext>) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_add_order_and_names() {
        let channel = EmbeddedChannel::new();
        let pipeline = channel.pipeline();
        pipeline.add_last("b", Probe::new()).expect("add b");
        pipeline.add_first("a", Probe::new()).expect("add a");
        pipeline.add_last("d", Probe::new()).expect("add d");
        pipeline.add_before("d", "c", Probe::new()).expect("add c");
        pipeline.add_after("d", "e", Probe::new()).expect("add e");
        assert_eq!(pipeline.names(), vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let channel = EmbeddedChannel::new();
        let pipeline = channel.pipeline();
        pipeline.add_last("x", Probe::new()).expect("add");
        assert!(pipeline.add_last("x", Probe::new()).is_err());
        assert!(pipeline.add_last("head", Probe::new()).is_err());
        assert!(pipeline.add_last("tail", Probe::new()).is_err());
    }

    #[test]
    fn test_add_remove_callbacks_once() {
        let channel = EmbeddedChannel::new();
        let pipeline = channel.pipeline();
        let probe = Probe::new();
        pipeline
            .add_last("probe", Arc::clone(&probe) as Arc<dyn Handler>)
            .expect("add");
        assert_eq!(probe.added.load(Ordering::SeqCst), 1);

        pipeline.remove("probe").expect("remove");
        assert_eq!(probe.removed.load(Ordering::SeqCst), 1);
        assert!(pipeline.remove("probe").is_err(), "second remove fails");
        assert_eq!(probe.removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_replace_swaps_in_place() {
        let channel = EmbeddedChannel::new();
        let pipeline = channel.pipeline();
        let old = Probe::new();
        let new = Probe::new();
        pipeline.add_last("a", Probe::new()).expect("add a");
        pipeline
            .add_last("mid", Arc::clone(&old) as Arc<dyn Handler>)
            .expect("add mid");
        pipeline.add_last("z", Probe::new()).expect("add z");

        pipeline
            .replace("mid", "mid2", Arc::clone(&new) as Arc<dyn Handler>)
            .expect("replace");
        assert_eq!(pipeline.names(), vec!["a", "mid2", "z"]);
        assert_eq!(old.removed.load(Ordering::SeqCst), 1);
        assert_eq!(new.added.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_anchor_errors() {
        let channel = EmbeddedChannel::new();
        let pipeline = channel.pipeline();
        assert!(pipeline.add_before("ghost", "x", Probe::new()).is_err());
        assert!(pipeline.add_after("ghost", "x", Probe::new()).is_err());
        assert!(pipeline.remove("ghost").is_err());
    }
}
