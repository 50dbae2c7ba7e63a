// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Typed channel options over a process-wide interned constant pool.
//!
//! Options are keys in a global name pool: `value_of` with the same name
//! always yields the same constant (same id), created lazily on first use
//! and kept for the process lifetime. Ids are not stable across runs.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::Mutex;

use super::handler::Message;
use crate::buf::ByteBuf;

fn pool() -> &'static DashMap<String, u32> {
    static POOL: OnceLock<DashMap<String, u32>> = OnceLock::new();
    POOL.get_or_init(DashMap::new)
}

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

/// Typed option key. Two `value_of` calls with one name return the same
/// constant; the type parameter is a compile-time convention, checked at
/// option-map access through downcasting.
pub struct ChannelOption<T: 'static> {
    id: u32,
    name: Arc<str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Clone for ChannelOption<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: Arc::clone(&self.name),
            _marker: PhantomData,
        }
    }
}

impl<T: 'static> ChannelOption<T> {
    /// Interned constant for `name`.
    pub fn value_of(name: &str) -> Self {
        let id = *pool()
            .entry(name.to_string())
            .or_insert_with(|| NEXT_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            id,
            name: Arc::from(name),
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Required option constants
// ============================================================================

/// Buffer allocator used by the channel.
pub fn allocator() -> ChannelOption<Arc<crate::buf::PooledAllocator>> {
    ChannelOption::value_of("ALLOCATOR")
}

/// Receive-buffer sizing strategy.
pub fn rcvbuf_allocator() -> ChannelOption<Arc<dyn RecvBufAllocator>> {
    ChannelOption::value_of("RCVBUF_ALLOCATOR")
}

/// Outbound message size estimation for water-mark accounting.
pub fn message_size_estimator() -> ChannelOption<Arc<dyn MessageSizeEstimator>> {
    ChannelOption::value_of("MESSAGE_SIZE_ESTIMATOR")
}

pub fn connect_timeout_millis() -> ChannelOption<u64> {
    ChannelOption::value_of("CONNECT_TIMEOUT_MILLIS")
}

pub fn write_spin_count() -> ChannelOption<u32> {
    ChannelOption::value_of("WRITE_SPIN_COUNT")
}

pub fn write_buffer_water_mark() -> ChannelOption<WriteBufferWaterMark> {
    ChannelOption::value_of("WRITE_BUFFER_WATER_MARK")
}

pub fn auto_read() -> ChannelOption<bool> {
    ChannelOption::value_of("AUTO_READ")
}

pub fn auto_close() -> ChannelOption<bool> {
    ChannelOption::value_of("AUTO_CLOSE")
}

pub fn allow_half_closure() -> ChannelOption<bool> {
    ChannelOption::value_of("ALLOW_HALF_CLOSURE")
}

pub fn so_keepalive() -> ChannelOption<bool> {
    ChannelOption::value_of("SO_KEEPALIVE")
}

pub fn so_reuseaddr() -> ChannelOption<bool> {
    ChannelOption::value_of("SO_REUSEADDR")
}

pub fn so_rcvbuf() -> ChannelOption<usize> {
    ChannelOption::value_of("SO_RCVBUF")
}

pub fn so_sndbuf() -> ChannelOption<usize> {
    ChannelOption::value_of("SO_SNDBUF")
}

pub fn so_linger() -> ChannelOption<i32> {
    ChannelOption::value_of("SO_LINGER")
}

pub fn so_backlog() -> ChannelOption<u32> {
    ChannelOption::value_of("SO_BACKLOG")
}

pub fn tcp_nodelay() -> ChannelOption<bool> {
    ChannelOption::value_of("TCP_NODELAY")
}

pub fn ip_tos() -> ChannelOption<u32> {
    ChannelOption::value_of("IP_TOS")
}

pub fn ip_multicast_ttl() -> ChannelOption<u32> {
    ChannelOption::value_of("IP_MULTICAST_TTL")
}

pub fn ip_multicast_loop_disabled() -> ChannelOption<bool> {
    ChannelOption::value_of("IP_MULTICAST_LOOP_DISABLED")
}

pub fn ip_multicast_addr() -> ChannelOption<IpAddr> {
    ChannelOption::value_of("IP_MULTICAST_ADDR")
}

pub fn ip_multicast_if() -> ChannelOption<u32> {
    ChannelOption::value_of("IP_MULTICAST_IF")
}

// ============================================================================
// Water marks
// ============================================================================

/// Queued-bytes thresholds steering `Channel::is_writable`: above `high`
/// the channel reports unwritable, back below `low` it recovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteBufferWaterMark {
    pub low: usize,
    pub high: usize,
}

impl WriteBufferWaterMark {
    pub fn new(low: usize, high: usize) -> Self {
        assert!(low <= high, "low water mark must not exceed high");
        Self { low, high }
    }
}

impl Default for WriteBufferWaterMark {
    fn default() -> Self {
        Self {
            low: crate::config::DEFAULT_LOW_WATER_MARK,
            high: crate::config::DEFAULT_HIGH_WATER_MARK,
        }
    }
}

// ============================================================================
// Sizing strategies
// ============================================================================

/// Estimates the queued size of an outbound message.
pub trait MessageSizeEstimator: Send + Sync {
    fn size(&self, msg: &Message) -> usize;
}

/// `ByteBuf` messages count their readable bytes; anything else a fixed
/// fallback.
pub struct DefaultMessageSizeEstimator {
    unknown_size: usize,
}

impl DefaultMessageSizeEstimator {
    pub fn new(unknown_size: usize) -> Self {
        Self { unknown_size }
    }
}

impl Default for DefaultMessageSizeEstimator {
    fn default() -> Self {
        Self::new(8)
    }
}

impl MessageSizeEstimator for DefaultMessageSizeEstimator {
    fn size(&self, msg: &Message) -> usize {
        msg.downcast_ref::<ByteBuf>()
            .map(ByteBuf::readable_bytes)
            .unwrap_or(self.unknown_size)
    }
}

/// Guesses receive buffer sizes from observed read sizes.
pub trait RecvBufAllocator: Send + Sync {
    /// Capacity to use for the next read.
    fn guess(&self) -> usize;
    /// Feed back the bytes actually read.
    fn record(&self, actual: usize);
}

/// Doubles after full reads, halves after two consecutive small reads,
/// bounded to `[min, max]`.
pub struct AdaptiveRecvBufAllocator {
    min: usize,
    max: usize,
    current: Mutex<AdaptiveState>,
}

struct AdaptiveState {
    guess: usize,
    shrink_hits: u8,
}

impl AdaptiveRecvBufAllocator {
    pub fn new(min: usize, initial: usize, max: usize) -> Self {
        assert!(min <= initial && initial <= max);
        Self {
            min,
            max,
            current: Mutex::new(AdaptiveState {
                guess: initial,
                shrink_hits: 0,
            }),
        }
    }
}

impl Default for AdaptiveRecvBufAllocator {
    fn default() -> Self {
        Self::new(64, 2048, 65536)
    }
}

impl RecvBufAllocator for AdaptiveRecvBufAllocator {
    fn guess(&self) -> usize {
        self.current.lock().guess
    }

    fn record(&self, actual: usize) {
        let mut state = self.current.lock();
        if actual >= state.guess {
            state.guess = (state.guess * 2).min(self.max);
            state.shrink_hits = 0;
        } else if actual <= state.guess / 2 {
            // Shrink only after two consecutive small reads.
            if state.shrink_hits == 0 {
                state.shrink_hits = 1;
            } else {
                state.guess = (state.guess / 2).max(self.min);
                state.shrink_hits = 0;
            }
        } else {
            state.shrink_hits = 0;
        }
    }
}

// ============================================================================
// Option storage
// ============================================================================

/// Per-channel store for options without a dedicated config field.
pub(crate) struct OptionMap {
    map: Mutex<HashMap<u32, Box<dyn Any + Send + Sync>>>,
}

impl OptionMap {
    pub(crate) fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn set<T: Any + Send + Sync>(&self, option: &ChannelOption<T>, value: T) {
        self.map.lock().insert(option.id(), Box::new(value));
    }

    pub(crate) fn get<T: Any + Send + Sync + Clone>(
        &self,
        option: &ChannelOption<T>,
    ) -> Option<T> {
        self.map
            .lock()
            .get(&option.id())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_name_same_constant() {
        let a: ChannelOption<bool> = ChannelOption::value_of("TEST_OPTION_X");
        let b: ChannelOption<bool> = ChannelOption::value_of("TEST_OPTION_X");
        assert_eq!(a.id(), b.id());
        assert_eq!(a.name(), "TEST_OPTION_X");
    }

    #[test]
    fn test_distinct_names_distinct_ids() {
        let a: ChannelOption<bool> = ChannelOption::value_of("TEST_OPTION_A");
        let b: ChannelOption<bool> = ChannelOption::value_of("TEST_OPTION_B");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_required_constants_resolve() {
        assert_eq!(so_backlog().name(), "SO_BACKLOG");
        assert_eq!(tcp_nodelay().name(), "TCP_NODELAY");
        assert_eq!(write_buffer_water_mark().name(), "WRITE_BUFFER_WATER_MARK");
        // Constants are stable across calls.
        assert_eq!(so_backlog().id(), so_backlog().id());
    }

    #[test]
    fn test_option_map_round_trip() {
        let map = OptionMap::new();
        map.set(&tcp_nodelay(), true);
        assert_eq!(map.get(&tcp_nodelay()), Some(true));
        assert_eq!(map.get(&so_keepalive()), None);
    }

    #[test]
    fn test_default_water_marks() {
        let wm = WriteBufferWaterMark::default();
        assert_eq!(wm.low, 32 * 1024);
        assert_eq!(wm.high, 64 * 1024);
    }

    #[test]
    fn test_default_estimator() {
        let est = DefaultMessageSizeEstimator::default();
        let buf = crate::buf::unpooled::copied_buffer(&[1, 2, 3]).expect("buf");
        let msg: Message = Box::new(buf);
        assert_eq!(est.size(&msg), 3);
        let other: Message = Box::new("hello");
        assert_eq!(est.size(&other), 8);
    }

    #[test]
    fn test_adaptive_recv_alloc() {
        let alloc = AdaptiveRecvBufAllocator::new(64, 1024, 8192);
        assert_eq!(alloc.guess(), 1024);
        alloc.record(1024); // full read doubles
        assert_eq!(alloc.guess(), 2048);
        alloc.record(100); // first small read: no change yet
        assert_eq!(alloc.guess(), 2048);
        alloc.record(100); // second small read: halves
        assert_eq!(alloc.guess(), 1024);
    }
}
