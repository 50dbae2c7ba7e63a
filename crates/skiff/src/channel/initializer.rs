// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! One-shot pipeline initializer.
//!
//! Runs user setup code when the handler joins a pipeline (`handler_added`,
//! with `channel_registered` as fallback for pipelines assembled before
//! registration), then removes itself. The setup closure is consumed on
//! first run, so re-entrant invocation is harmless.

use std::sync::Arc;

use parking_lot::Mutex;

use super::context::HandlerContext;
use super::handler::Handler;
use crate::error::Result;

type InitFn = Box<dyn FnOnce(&super::Pipeline) + Send>;

/// One-shot handler populating the pipeline, in the spirit of a channel
/// bootstrap step:
///
/// ```rust,no_run
/// use skiff::channel::{ChannelInitializer, EmbeddedChannel};
/// use std::sync::Arc;
///
/// let channel = EmbeddedChannel::new();
/// channel.pipeline().add_last(
///     "init",
///     Arc::new(ChannelInitializer::new(|pipeline| {
///         // add decoder / logic handlers here
///         let _ = pipeline;
///     })),
/// ).unwrap();
/// ```
pub struct ChannelInitializer {
    init: Mutex<Option<InitFn>>,
}

impl ChannelInitializer {
    pub fn new(init: impl FnOnce(&super::Pipeline) + Send + 'static) -> Self {
        Self {
            init: Mutex::new(Some(Box::new(init))),
        }
    }

    fn initialize(&self, ctx: &Arc<HandlerContext>) {
        let Some(init) = self.init.lock().take() else {
            return; // already ran (or running re-entrantly)
        };
        let Some(channel) = ctx.channel() else {
            log::warn!("[initializer] no channel attached, dropping init");
            return;
        };
        let pipeline = channel.pipeline();
        init(&pipeline);
        if let Err(e) = pipeline.remove(ctx.name()) {
            log::debug!("[initializer] self-removal failed: {}", e);
        }
    }
}

impl Handler for ChannelInitializer {
    fn handler_added(&self, ctx: &Arc<HandlerContext>) {
        self.initialize(ctx);
    }

    fn channel_registered(&self, ctx: &Arc<HandlerContext>) -> Result<()> {
        // Fallback for pipelines whose initializer was added before the
        // channel had a chance to call handler_added.
        self.initialize(ctx);
        ctx.fire_channel_registered();
        Ok(())
    }
}
