// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Handler trait and the event mask controlling propagation skips.
//!
//! Default method bodies forward the event to the next (inbound) or
//! previous (outbound) context, so a handler overrides only what it cares
//! about. The [`HandlerMask`] is sampled once when the handler is added;
//! contexts whose mask lacks an event are skipped during propagation
//! without invoking them.
//!
//! Inbound callbacks return `Result`; an `Err` makes the pipeline fire
//! `exception_caught` starting at the next context. Outbound failures are
//! routed into the operation's promise by the caller.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use super::context::HandlerContext;
use crate::error::{Error, Result};
use crate::executor::Promise;

/// Type-erased message travelling through a pipeline (commonly a
/// [`crate::buf::ByteBuf`]).
pub type Message = Box<dyn Any + Send>;

/// Bit set of the events a handler implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerMask(u32);

impl HandlerMask {
    pub const CHANNEL_REGISTERED: HandlerMask = HandlerMask(1 << 0);
    pub const CHANNEL_ACTIVE: HandlerMask = HandlerMask(1 << 1);
    pub const CHANNEL_INACTIVE: HandlerMask = HandlerMask(1 << 2);
    pub const CHANNEL_READ: HandlerMask = HandlerMask(1 << 3);
    pub const CHANNEL_READ_COMPLETE: HandlerMask = HandlerMask(1 << 4);
    pub const WRITABILITY_CHANGED: HandlerMask = HandlerMask(1 << 5);
    pub const USER_EVENT: HandlerMask = HandlerMask(1 << 6);
    pub const EXCEPTION_CAUGHT: HandlerMask = HandlerMask(1 << 7);
    pub const BIND: HandlerMask = HandlerMask(1 << 8);
    pub const CONNECT: HandlerMask = HandlerMask(1 << 9);
    pub const DISCONNECT: HandlerMask = HandlerMask(1 << 10);
    pub const CLOSE: HandlerMask = HandlerMask(1 << 11);
    pub const WRITE: HandlerMask = HandlerMask(1 << 12);
    pub const FLUSH: HandlerMask = HandlerMask(1 << 13);

    /// Every inbound event.
    pub const fn inbound() -> HandlerMask {
        HandlerMask(
            Self::CHANNEL_REGISTERED.0
                | Self::CHANNEL_ACTIVE.0
                | Self::CHANNEL_INACTIVE.0
                | Self::CHANNEL_READ.0
                | Self::CHANNEL_READ_COMPLETE.0
                | Self::WRITABILITY_CHANGED.0
                | Self::USER_EVENT.0
                | Self::EXCEPTION_CAUGHT.0,
        )
    }

    /// Every outbound event.
    pub const fn outbound() -> HandlerMask {
        HandlerMask(
            Self::BIND.0
                | Self::CONNECT.0
                | Self::DISCONNECT.0
                | Self::CLOSE.0
                | Self::WRITE.0
                | Self::FLUSH.0,
        )
    }

    /// Everything (the default for handlers that do not narrow their mask).
    pub const fn all() -> HandlerMask {
        HandlerMask(Self::inbound().0 | Self::outbound().0)
    }

    pub const fn none() -> HandlerMask {
        HandlerMask(0)
    }

    #[must_use]
    pub const fn union(self, other: HandlerMask) -> HandlerMask {
        HandlerMask(self.0 | other.0)
    }

    #[inline]
    pub const fn contains(self, other: HandlerMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for HandlerMask {
    type Output = HandlerMask;
    fn bitor(self, rhs: HandlerMask) -> HandlerMask {
        self.union(rhs)
    }
}

/// Protocol logic attached to a pipeline.
///
/// Handlers are invoked on their context's executor (the channel's loop by
/// default) so their state needs no synchronization across events of one
/// channel.
#[allow(unused_variables)]
pub trait Handler: Send + Sync {
    /// Events this handler implements; sampled once at add time.
    fn mask(&self) -> HandlerMask {
        HandlerMask::all()
    }

    /// Invoked once after the handler joined a pipeline, before any event.
    fn handler_added(&self, ctx: &Arc<HandlerContext>) {}

    /// Invoked exactly once after removal.
    fn handler_removed(&self, ctx: &Arc<HandlerContext>) {}

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    fn channel_registered(&self, ctx: &Arc<HandlerContext>) -> Result<()> {
        ctx.fire_channel_registered();
        Ok(())
    }

    fn channel_active(&self, ctx: &Arc<HandlerContext>) -> Result<()> {
        ctx.fire_channel_active();
        Ok(())
    }

    fn channel_inactive(&self, ctx: &Arc<HandlerContext>) -> Result<()> {
        ctx.fire_channel_inactive();
        Ok(())
    }

    fn channel_read(&self, ctx: &Arc<HandlerContext>, msg: Message) -> Result<()> {
        ctx.fire_channel_read(msg);
        Ok(())
    }

    fn channel_read_complete(&self, ctx: &Arc<HandlerContext>) -> Result<()> {
        ctx.fire_channel_read_complete();
        Ok(())
    }

    fn channel_writability_changed(&self, ctx: &Arc<HandlerContext>) -> Result<()> {
        ctx.fire_channel_writability_changed();
        Ok(())
    }

    fn user_event(&self, ctx: &Arc<HandlerContext>, event: Message) -> Result<()> {
        ctx.fire_user_event(event);
        Ok(())
    }

    fn exception_caught(&self, ctx: &Arc<HandlerContext>, cause: Error) -> Result<()> {
        ctx.fire_exception_caught(cause);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    fn bind(&self, ctx: &Arc<HandlerContext>, addr: SocketAddr, promise: Promise<()>) {
        ctx.invoke_bind(addr, promise);
    }

    fn connect(&self, ctx: &Arc<HandlerContext>, addr: SocketAddr, promise: Promise<()>) {
        ctx.invoke_connect(addr, promise);
    }

    fn disconnect(&self, ctx: &Arc<HandlerContext>, promise: Promise<()>) {
        ctx.invoke_disconnect(promise);
    }

    fn close(&self, ctx: &Arc<HandlerContext>, promise: Promise<()>) {
        ctx.invoke_close(promise);
    }

    fn write(&self, ctx: &Arc<HandlerContext>, msg: Message, promise: Promise<()>) {
        ctx.invoke_write(msg, promise);
    }

    fn flush(&self, ctx: &Arc<HandlerContext>) {
        ctx.invoke_flush();
    }
}
