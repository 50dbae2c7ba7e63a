// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! In-memory channel for exercising pipelines without sockets or loops.
//!
//! Inbound messages are injected with [`EmbeddedChannel::write_inbound`];
//! flushed outbound bytes are captured and read back with
//! [`EmbeddedChannel::read_outbound`]. No event loop is registered, so
//! every handler runs inline on the calling thread.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::handler::Message;
use super::{Channel, Pipeline};
use crate::buf::ByteBuf;
use crate::error::{Error, Result};
use crate::executor::Future;
use crate::transport::Transport;

struct EmbeddedTransport {
    captured: Arc<Mutex<VecDeque<Vec<u8>>>>,
    open: AtomicBool,
}

impl Transport for EmbeddedTransport {
    fn read(&self, _buf: &mut ByteBuf) -> Result<usize> {
        Ok(0) // inbound data is injected, never read
    }

    fn write(&self, buf: &mut ByteBuf) -> Result<usize> {
        if !self.open.load(Ordering::Acquire) {
            return Err(Error::IllegalState("transport closed".into()));
        }
        let bytes = buf.to_vec();
        let n = bytes.len();
        buf.skip_bytes(n)?;
        self.captured.lock().push_back(bytes);
        Ok(n)
    }

    fn bind(&self, _addr: SocketAddr) -> Result<()> {
        Ok(())
    }

    fn connect(&self, _addr: SocketAddr) -> Result<()> {
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Loopback channel for tests.
pub struct EmbeddedChannel {
    channel: Channel,
    captured: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl EmbeddedChannel {
    pub fn new() -> Self {
        let captured = Arc::new(Mutex::new(VecDeque::new()));
        let transport = Arc::new(EmbeddedTransport {
            captured: Arc::clone(&captured),
            open: AtomicBool::new(true),
        });
        Self {
            channel: Channel::new(transport),
            captured,
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn pipeline(&self) -> Pipeline {
        self.channel.pipeline()
    }

    /// Inject an inbound message at the head, then fire read-complete.
    pub fn write_inbound(&self, msg: Message) {
        let pipeline = self.channel.pipeline();
        pipeline.fire_channel_read(msg);
        pipeline.fire_channel_read_complete();
    }

    /// Write and flush an outbound message through the whole pipeline.
    pub fn write_outbound(&self, msg: Message) -> Future<()> {
        self.channel.write_and_flush(msg)
    }

    /// Next captured outbound payload, if any.
    pub fn read_outbound(&self) -> Option<Vec<u8>> {
        self.captured.lock().pop_front()
    }

    /// Close the channel, failing anything still queued.
    pub fn finish(&self) -> Future<()> {
        self.channel.close()
    }
}

impl Default for EmbeddedChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buf::unpooled;
    use crate::channel::context::HandlerContext;
    use crate::channel::handler::{Handler, HandlerMask};
    use crate::channel::ChannelInitializer;
    use crate::executor::Promise;
    use std::sync::atomic::AtomicUsize;

    /// Reads a u32 frame and forwards the decoded value.
    struct Decoder {
        fired: AtomicUsize,
    }

    impl Handler for Decoder {
        fn channel_read(
            &self,
            ctx: &Arc<HandlerContext>,
            msg: Message,
        ) -> crate::error::Result<()> {
            let mut buf = *msg.downcast::<ByteBuf>().expect("decoder expects ByteBuf");
            let decoded = buf.read_u32()?;
            let _ = buf.release();
            self.fired.fetch_add(1, Ordering::SeqCst);
            ctx.fire_channel_read(Box::new(decoded));
            Ok(())
        }
    }

    /// Consumes decoded values without forwarding.
    struct Logic {
        seen: Mutex<Vec<u32>>,
        remove_self: bool,
        removed: AtomicUsize,
    }

    impl Handler for Logic {
        fn channel_read(
            &self,
            ctx: &Arc<HandlerContext>,
            msg: Message,
        ) -> crate::error::Result<()> {
            let value = *msg.downcast::<u32>().expect("logic expects decoded u32");
            self.seen.lock().push(value);
            if self.remove_self {
                let pipeline = ctx.channel().expect("channel").pipeline();
                pipeline.remove(ctx.name()).expect("self removal");
            }
            Ok(())
        }

        fn handler_removed(&self, _ctx: &Arc<HandlerContext>) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn frame(value: u32) -> Message {
        let buf = unpooled::copied_buffer(&value.to_be_bytes()).expect("frame");
        Box::new(buf)
    }

    #[test]
    fn test_scenario_s6_decode_and_dispatch() {
        let channel = EmbeddedChannel::new();
        let decoder = Arc::new(Decoder {
            fired: AtomicUsize::new(0),
        });
        let logic = Arc::new(Logic {
            seen: Mutex::new(Vec::new()),
            remove_self: false,
            removed: AtomicUsize::new(0),
        });
        channel
            .pipeline()
            .add_last("decoder", Arc::clone(&decoder) as Arc<dyn Handler>)
            .expect("add decoder");
        channel
            .pipeline()
            .add_last("logic", Arc::clone(&logic) as Arc<dyn Handler>)
            .expect("add logic");

        channel.write_inbound(frame(0xAB));
        assert_eq!(decoder.fired.load(Ordering::SeqCst), 1);
        assert_eq!(&*logic.seen.lock(), &[0xAB], "logic saw the decoded value");
    }

    #[test]
    fn test_scenario_s6_remove_during_read() {
        let channel = EmbeddedChannel::new();
        let decoder = Arc::new(Decoder {
            fired: AtomicUsize::new(0),
        });
        let logic = Arc::new(Logic {
            seen: Mutex::new(Vec::new()),
            remove_self: true,
            removed: AtomicUsize::new(0),
        });
        channel
            .pipeline()
            .add_last("decoder", Arc::clone(&decoder) as Arc<dyn Handler>)
            .expect("add decoder");
        channel
            .pipeline()
            .add_last("logic", Arc::clone(&logic) as Arc<dyn Handler>)
            .expect("add logic");

        channel.write_inbound(frame(1));
        assert_eq!(logic.removed.load(Ordering::SeqCst), 1, "removed once");
        assert!(channel.pipeline().context("logic").is_none());

        // The next read no longer reaches logic; it flows to the tail.
        channel.write_inbound(frame(2));
        assert_eq!(&*logic.seen.lock(), &[1]);
        assert_eq!(logic.removed.load(Ordering::SeqCst), 1, "still exactly once");
    }

    #[test]
    fn test_outbound_capture() {
        let channel = EmbeddedChannel::new();
        let buf = unpooled::copied_buffer(&[1, 2, 3, 4]).expect("buf");
        let future = channel.write_outbound(Box::new(buf));
        future.sync().expect("flush");
        assert_eq!(channel.read_outbound(), Some(vec![1, 2, 3, 4]));
        assert_eq!(channel.read_outbound(), None);
    }

    #[test]
    fn test_outbound_handler_transforms() {
        /// Prepends a length byte to outbound frames.
        struct Framer;
        impl Handler for Framer {
            fn mask(&self) -> HandlerMask {
                HandlerMask::outbound()
            }
            fn write(&self, ctx: &Arc<HandlerContext>, msg: Message, promise: Promise<()>) {
                let buf = *msg.downcast::<ByteBuf>().expect("framer expects ByteBuf");
                let mut framed =
                    unpooled::buffer(buf.readable_bytes() + 1);
                framed
                    .write_u8(buf.readable_bytes() as u8)
                    .expect("length byte");
                framed.write_bytes(&buf.to_vec()).expect("payload");
                let _ = buf.release();
                ctx.invoke_write(Box::new(framed), promise);
            }
        }

        let channel = EmbeddedChannel::new();
        channel
            .pipeline()
            .add_last("framer", Arc::new(Framer))
            .expect("add framer");
        let buf = unpooled::copied_buffer(&[9, 9]).expect("buf");
        channel.write_outbound(Box::new(buf)).sync().expect("flush");
        assert_eq!(channel.read_outbound(), Some(vec![2, 9, 9]));
    }

    #[test]
    fn test_exception_flow_on_decode_error() {
        /// Collects exceptions that propagate to it.
        struct Catcher {
            caught: AtomicUsize,
        }
        impl Handler for Catcher {
            fn exception_caught(
                &self,
                _ctx: &Arc<HandlerContext>,
                _cause: crate::error::Error,
            ) -> crate::error::Result<()> {
                self.caught.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let channel = EmbeddedChannel::new();
        let decoder = Arc::new(Decoder {
            fired: AtomicUsize::new(0),
        });
        let catcher = Arc::new(Catcher {
            caught: AtomicUsize::new(0),
        });
        channel
            .pipeline()
            .add_last("decoder", Arc::clone(&decoder) as Arc<dyn Handler>)
            .expect("add decoder");
        channel
            .pipeline()
            .add_last("catcher", Arc::clone(&catcher) as Arc<dyn Handler>)
            .expect("add catcher");

        // Two bytes cannot decode as u32: the decoder errors and the
        // exception fires starting at the next context.
        let buf = unpooled::copied_buffer(&[0, 1]).expect("buf");
        channel.write_inbound(Box::new(buf));
        assert_eq!(catcher.caught.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_initializer_populates_and_removes_itself() {
        let channel = EmbeddedChannel::new();
        channel
            .pipeline()
            .add_last(
                "init",
                Arc::new(ChannelInitializer::new(|pipeline| {
                    pipeline
                        .add_last(
                            "decoder",
                            Arc::new(Decoder {
                                fired: AtomicUsize::new(0),
                            }),
                        )
                        .expect("init adds decoder");
                })),
            )
            .expect("add initializer");

        let names = channel.pipeline().names();
        assert_eq!(names, vec!["decoder".to_string()], "initializer removed");
    }

    #[test]
    fn test_write_after_close_fails() {
        let channel = EmbeddedChannel::new();
        channel.finish().sync().expect("close");
        let buf = unpooled::copied_buffer(&[1]).expect("buf");
        let future = channel.write_outbound(Box::new(buf));
        assert!(future.sync().is_err());
    }
}
