// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Unpooled buffer constructors.
//!
//! Same `ByteBuf` surface as pooled buffers over a plain heap allocation.
//! Useful for one-off messages and in tests where pooling is noise.

use super::byte_buf::ByteBuf;
use crate::error::Result;

/// Heap buffer with `initial` capacity and unbounded growth.
pub fn buffer(initial: usize) -> ByteBuf {
    ByteBuf::heap(initial, usize::MAX)
}

/// Heap buffer with `initial` capacity, growable up to `max`.
pub fn buffer_with_max(initial: usize, max: usize) -> ByteBuf {
    ByteBuf::heap(initial, max)
}

/// Heap buffer pre-filled with `content` (reader 0, writer at the end).
pub fn copied_buffer(content: &[u8]) -> Result<ByteBuf> {
    let mut buf = ByteBuf::heap(content.len().max(1), usize::MAX);
    buf.write_bytes(content)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_empty() {
        let buf = buffer(32);
        assert_eq!(buf.capacity(), 32);
        assert_eq!(buf.readable_bytes(), 0);
    }

    #[test]
    fn test_copied_buffer_readable() {
        let buf = copied_buffer(&[1, 2, 3]).expect("copied");
        assert_eq!(buf.readable_bytes(), 3);
        assert_eq!(buf.to_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn test_bounded_growth() {
        let mut buf = buffer_with_max(4, 8);
        buf.write_bytes(&[0u8; 8]).expect("grow to max");
        assert!(buf.write_u8(1).is_err());
    }
}
