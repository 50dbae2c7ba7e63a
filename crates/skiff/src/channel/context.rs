// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Pipeline node: one handler plus its links and executor binding.
//!
//! Inbound events walk `next` pointers head-to-tail, outbound operations
//! walk `prev` pointers tail-to-head; both skip contexts whose mask lacks
//! the event. When a context is bound to an executor other than the current
//! thread, the invocation is re-submitted there, preserving per-pipeline
//! ordering.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::handler::{Handler, HandlerMask, Message};
use super::pipeline::PipelineInner;
use super::Channel;
use crate::error::Error;
use crate::executor::{EventLoop, Promise};

/// Node in the pipeline's doubly linked handler list.
pub struct HandlerContext {
    name: String,
    handler: Arc<dyn Handler>,
    mask: HandlerMask,
    executor: Option<EventLoop>,
    pub(crate) prev: Mutex<Weak<HandlerContext>>,
    pub(crate) next: Mutex<Option<Arc<HandlerContext>>>,
    removed: AtomicBool,
    pipeline: Weak<PipelineInner>,
}

impl HandlerContext {
    pub(crate) fn new(
        name: String,
        handler: Arc<dyn Handler>,
        executor: Option<EventLoop>,
        pipeline: Weak<PipelineInner>,
    ) -> Arc<Self> {
        let mask = handler.mask();
        Arc::new(Self {
            name,
            handler,
            mask,
            executor,
            prev: Mutex::new(Weak::new()),
            next: Mutex::new(None),
            removed: AtomicBool::new(false),
            pipeline,
        })
    }

    /// Handler name, unique within the pipeline.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    /// Executor override this context was added with, if any.
    pub fn executor(&self) -> Option<&EventLoop> {
        self.executor.as_ref()
    }

    /// Channel this pipeline belongs to (absent before registration).
    pub fn channel(&self) -> Option<Channel> {
        self.pipeline.upgrade().and_then(|p| p.channel())
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    /// Mark removed; `true` only for the call that did the marking (gates
    /// the single `handler_removed` callback).
    pub(crate) fn mark_removed(&self) -> bool {
        !self.removed.swap(true, Ordering::AcqRel)
    }

    /// The executor events for this context run on: the per-context
    /// override, else the channel's loop, else inline.
    fn effective_executor(&self) -> Option<EventLoop> {
        if let Some(executor) = &self.executor {
            return Some(executor.clone());
        }
        self.channel().and_then(|c| c.event_loop_opt())
    }

    #[inline]
    fn in_executor(&self) -> bool {
        self.effective_executor()
            .map_or(true, |e| e.in_event_loop())
    }

    fn submit(&self, task: impl FnOnce() + Send + 'static) {
        match self.effective_executor() {
            Some(executor) => {
                if let Err(e) = executor.execute(task) {
                    log::warn!("[pipeline] event submission to {} failed: {}", self.name, e);
                }
            }
            None => task(),
        }
    }

    // ------------------------------------------------------------------
    // Link walking
    // ------------------------------------------------------------------

    fn find_next(&self, event: HandlerMask) -> Option<Arc<HandlerContext>> {
        let mut cursor = self.next.lock().clone();
        while let Some(ctx) = cursor {
            if !ctx.is_removed() && ctx.mask.contains(event) {
                return Some(ctx);
            }
            cursor = ctx.next.lock().clone();
        }
        None
    }

    fn find_prev(&self, event: HandlerMask) -> Option<Arc<HandlerContext>> {
        let mut cursor = self.prev.lock().upgrade();
        while let Some(ctx) = cursor {
            if !ctx.is_removed() && ctx.mask.contains(event) {
                return Some(ctx);
            }
            cursor = ctx.prev.lock().upgrade();
        }
        None
    }

    // ------------------------------------------------------------------
    // Inbound firing (towards the tail)
    // ------------------------------------------------------------------

    pub fn fire_channel_registered(&self) {
        if let Some(target) = self.find_next(HandlerMask::CHANNEL_REGISTERED) {
            invoke_channel_registered(&target);
        }
    }

    pub fn fire_channel_active(&self) {
        if let Some(target) = self.find_next(HandlerMask::CHANNEL_ACTIVE) {
            invoke_channel_active(&target);
        }
    }

    pub fn fire_channel_inactive(&self) {
        if let Some(target) = self.find_next(HandlerMask::CHANNEL_INACTIVE) {
            invoke_channel_inactive(&target);
        }
    }

    pub fn fire_channel_read(&self, msg: Message) {
        if let Some(target) = self.find_next(HandlerMask::CHANNEL_READ) {
            invoke_channel_read(&target, msg);
        }
    }

    pub fn fire_channel_read_complete(&self) {
        if let Some(target) = self.find_next(HandlerMask::CHANNEL_READ_COMPLETE) {
            invoke_channel_read_complete(&target);
        }
    }

    pub fn fire_channel_writability_changed(&self) {
        if let Some(target) = self.find_next(HandlerMask::WRITABILITY_CHANGED) {
            invoke_channel_writability_changed(&target);
        }
    }

    pub fn fire_user_event(&self, event: Message) {
        if let Some(target) = self.find_next(HandlerMask::USER_EVENT) {
            invoke_user_event(&target, event);
        }
    }

    pub fn fire_exception_caught(&self, cause: Error) {
        if let Some(target) = self.find_next(HandlerMask::EXCEPTION_CAUGHT) {
            invoke_exception_caught(&target, cause);
        } else {
            log::warn!("[pipeline] unhandled exception reached list end: {}", cause);
        }
    }

    // ------------------------------------------------------------------
    // Outbound invocation (towards the head)
    // ------------------------------------------------------------------

    pub fn invoke_bind(&self, addr: SocketAddr, promise: Promise<()>) {
        match self.find_prev(HandlerMask::BIND) {
            Some(target) => invoke_bind(&target, addr, promise),
            None => {
                promise.try_failure(Error::IllegalState("no outbound terminal".into()));
            }
        }
    }

    pub fn invoke_connect(&self, addr: SocketAddr, promise: Promise<()>) {
        match self.find_prev(HandlerMask::CONNECT) {
            Some(target) => invoke_connect(&target, addr, promise),
            None => {
                promise.try_failure(Error::IllegalState("no outbound terminal".into()));
            }
        }
    }

    pub fn invoke_disconnect(&self, promise: Promise<()>) {
        match self.find_prev(HandlerMask::DISCONNECT) {
            Some(target) => invoke_disconnect(&target, promise),
            None => {
                promise.try_failure(Error::IllegalState("no outbound terminal".into()));
            }
        }
    }

    pub fn invoke_close(&self, promise: Promise<()>) {
        match self.find_prev(HandlerMask::CLOSE) {
            Some(target) => invoke_close(&target, promise),
            None => {
                promise.try_failure(Error::IllegalState("no outbound terminal".into()));
            }
        }
    }

    pub fn invoke_write(&self, msg: Message, promise: Promise<()>) {
        match self.find_prev(HandlerMask::WRITE) {
            Some(target) => invoke_write(&target, msg, promise),
            None => {
                promise.try_failure(Error::IllegalState("no outbound terminal".into()));
            }
        }
    }

    pub fn invoke_flush(&self) {
        if let Some(target) = self.find_prev(HandlerMask::FLUSH) {
            invoke_flush(&target);
        }
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("name", &self.name)
            .field("removed", &self.is_removed())
            .finish()
    }
}

// ============================================================================
// Invocation helpers (executor-aware, error-routing)
// ============================================================================

macro_rules! invoke_simple_inbound {
    ($fn_name:ident, $method:ident) => {
        pub(crate) fn $fn_name(target: &Arc<HandlerContext>) {
            if target.in_executor() {
                let handler = Arc::clone(&target.handler);
                if let Err(e) = handler.$method(target) {
                    target.fire_exception_caught(e);
                }
            } else {
                let target = Arc::clone(target);
                target.clone().submit(move || $fn_name(&target));
            }
        }
    };
}

invoke_simple_inbound!(invoke_channel_registered, channel_registered);
invoke_simple_inbound!(invoke_channel_active, channel_active);
invoke_simple_inbound!(invoke_channel_inactive, channel_inactive);
invoke_simple_inbound!(invoke_channel_read_complete, channel_read_complete);
invoke_simple_inbound!(
    invoke_channel_writability_changed,
    channel_writability_changed
);

pub(crate) fn invoke_channel_read(target: &Arc<HandlerContext>, msg: Message) {
    if target.in_executor() {
        let handler = Arc::clone(&target.handler);
        if let Err(e) = handler.channel_read(target, msg) {
            target.fire_exception_caught(e);
        }
    } else {
        let target = Arc::clone(target);
        target.clone().submit(move || invoke_channel_read(&target, msg));
    }
}

pub(crate) fn invoke_user_event(target: &Arc<HandlerContext>, event: Message) {
    if target.in_executor() {
        let handler = Arc::clone(&target.handler);
        if let Err(e) = handler.user_event(target, event) {
            target.fire_exception_caught(e);
        }
    } else {
        let target = Arc::clone(target);
        target.clone().submit(move || invoke_user_event(&target, event));
    }
}

pub(crate) fn invoke_exception_caught(target: &Arc<HandlerContext>, cause: Error) {
    if target.in_executor() {
        let handler = Arc::clone(&target.handler);
        if let Err(e) = handler.exception_caught(target, cause) {
            log::warn!(
                "[pipeline] exception handler {} failed: {}",
                target.name,
                e
            );
        }
    } else {
        let target = Arc::clone(target);
        target
            .clone()
            .submit(move || invoke_exception_caught(&target, cause));
    }
}

pub(crate) fn invoke_bind(target: &Arc<HandlerContext>, addr: SocketAddr, promise: Promise<()>) {
    if target.in_executor() {
        let handler = Arc::clone(&target.handler);
        handler.bind(target, addr, promise);
    } else {
        let target = Arc::clone(target);
        target
            .clone()
            .submit(move || invoke_bind(&target, addr, promise));
    }
}

pub(crate) fn invoke_connect(target: &Arc<HandlerContext>, addr: SocketAddr, promise: Promise<()>) {
    if target.in_executor() {
        let handler = Arc::clone(&target.handler);
        handler.connect(target, addr, promise);
    } else {
        let target = Arc::clone(target);
        target
            .clone()
            .submit(move || invoke_connect(&target, addr, promise));
    }
}

pub(crate) fn invoke_disconnect(target: &Arc<HandlerContext>, promise: Promise<()>) {
    if target.in_executor() {
        let handler = Arc::clone(&target.handler);
        handler.disconnect(target, promise);
    } else {
        let target = Arc::clone(target);
        target
            .clone()
            .submit(move || invoke_disconnect(&target, promise));
    }
}

pub(crate) fn invoke_close(target: &Arc<HandlerContext>, promise: Promise<()>) {
    if target.in_executor() {
        let handler = Arc::clone(&target.handler);
        handler.close(target, promise);
    } else {
        let target = Arc::clone(target);
        target.clone().submit(move || invoke_close(&target, promise));
    }
}

pub(crate) fn invoke_write(target: &Arc<HandlerContext>, msg: Message, promise: Promise<()>) {
    if target.in_executor() {
        let handler = Arc::clone(&target.handler);
        handler.write(target, msg, promise);
    } else {
        let target = Arc::clone(target);
        target
            .clone()
            .submit(move || invoke_write(&target, msg, promise));
    }
}

pub(crate) fn invoke_flush(target: &Arc<HandlerContext>) {
    if target.in_executor() {
        let handler = Arc::clone(&target.handler);
        handler.flush(target);
    } else {
        let target = Arc::clone(target);
        target.clone().submit(move || invoke_flush(&target));
    }
}
