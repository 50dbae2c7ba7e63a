// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Channel + pipeline integration tests
//!
//! Loop-bound channels: handler execution on the channel's thread, water
//! mark transitions, and handler pipelines over the embedded channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use skiff::buf::unpooled;
use skiff::channel::{
    EmbeddedChannel, Handler, HandlerContext, Message, WriteBufferWaterMark,
};
use skiff::executor::EventLoop;

struct Recorder {
    reads: Mutex<Vec<Vec<u8>>>,
    threads: Mutex<Vec<Option<String>>>,
    writability_flips: AtomicUsize,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            reads: Mutex::new(Vec::new()),
            threads: Mutex::new(Vec::new()),
            writability_flips: AtomicUsize::new(0),
        })
    }
}

impl Handler for Recorder {
    fn channel_read(
        &self,
        _ctx: &Arc<HandlerContext>,
        msg: Message,
    ) -> skiff::Result<()> {
        let buf = *msg.downcast::<skiff::ByteBuf>().expect("ByteBuf");
        self.reads.lock().push(buf.to_vec());
        self.threads
            .lock()
            .push(thread::current().name().map(String::from));
        let _ = buf.release();
        Ok(())
    }

    fn channel_writability_changed(
        &self,
        ctx: &Arc<HandlerContext>,
    ) -> skiff::Result<()> {
        self.writability_flips.fetch_add(1, Ordering::SeqCst);
        ctx.fire_channel_writability_changed();
        Ok(())
    }
}

#[test]
fn test_loop_bound_channel_runs_handlers_on_loop() {
    let el = EventLoop::new("chan-loop").expect("loop");
    let embedded = EmbeddedChannel::new();
    let recorder = Recorder::new();
    embedded
        .pipeline()
        .add_last("recorder", Arc::clone(&recorder) as Arc<dyn Handler>)
        .expect("add");
    embedded.channel().register(el.clone()).expect("register");

    let buf = unpooled::copied_buffer(&[1, 2, 3]).expect("buf");
    embedded.write_inbound(Box::new(buf));

    let deadline = Instant::now() + Duration::from_secs(2);
    while recorder.reads.lock().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(&*recorder.reads.lock(), &[vec![1, 2, 3]]);
    assert_eq!(
        recorder.threads.lock()[0].as_deref(),
        Some("chan-loop"),
        "handler must run on the channel's loop thread"
    );
    el.shutdown_gracefully(Duration::from_millis(10), Duration::from_secs(5))
        .sync()
        .expect("shutdown");
}

#[test]
fn test_registration_is_permanent() {
    let el1 = EventLoop::new("chan-a").expect("loop");
    let el2 = EventLoop::new("chan-b").expect("loop");
    let embedded = EmbeddedChannel::new();
    embedded.channel().register(el1.clone()).expect("register");
    assert!(
        embedded.channel().register(el2.clone()).is_err(),
        "re-registration must fail"
    );
    for el in [el1, el2] {
        el.shutdown_gracefully(Duration::from_millis(10), Duration::from_secs(5))
            .sync()
            .expect("shutdown");
    }
}

#[test]
fn test_water_mark_transitions() {
    let embedded = EmbeddedChannel::new();
    let recorder = Recorder::new();
    embedded
        .pipeline()
        .add_last("recorder", Arc::clone(&recorder) as Arc<dyn Handler>)
        .expect("add");
    let channel = embedded.channel();
    channel
        .config()
        .set_water_mark(WriteBufferWaterMark::new(8, 16));
    assert!(channel.is_writable());

    // Queue 20 bytes without flushing: crosses the high mark.
    let buf = unpooled::copied_buffer(&[0u8; 20]).expect("buf");
    let pending = channel.write(Box::new(buf));
    assert!(!channel.is_writable(), "above high water mark");
    assert_eq!(recorder.writability_flips.load(Ordering::SeqCst), 1);

    // Flush drains the queue below the low mark: writable again.
    channel.flush();
    pending.sync().expect("write completed");
    assert!(channel.is_writable());
    assert_eq!(recorder.writability_flips.load(Ordering::SeqCst), 2);
    assert_eq!(channel.queued_bytes(), 0);
}

#[test]
fn test_write_promise_fails_on_closed_channel() {
    let embedded = EmbeddedChannel::new();
    embedded.finish().sync().expect("close");
    let buf = unpooled::copied_buffer(&[1]).expect("buf");
    let future = embedded.channel().write_and_flush(Box::new(buf));
    assert!(future.sync().is_err(), "write after close fails the promise");
}

#[test]
fn test_outbound_future_completes_on_flush() {
    let embedded = EmbeddedChannel::new();
    let buf = unpooled::copied_buffer(&[5, 6]).expect("buf");
    let future = embedded.channel().write(Box::new(buf));
    assert!(!future.is_done(), "unflushed write stays pending");
    embedded.channel().flush();
    future.sync().expect("flushed");
    assert_eq!(embedded.read_outbound(), Some(vec![5, 6]));
}

#[test]
fn test_channel_option_round_trip_via_config() {
    use skiff::channel::options;
    let embedded = EmbeddedChannel::new();
    let config = embedded.channel().config();

    config.set_option(&options::tcp_nodelay(), true);
    assert_eq!(config.get_option(&options::tcp_nodelay()), Some(true));

    config.set_option(
        &options::write_buffer_water_mark(),
        WriteBufferWaterMark::new(1024, 2048),
    );
    assert_eq!(config.water_mark().high, 2048);
    assert_eq!(
        config.get_option(&options::write_buffer_water_mark()),
        Some(WriteBufferWaterMark::new(1024, 2048))
    );
}
