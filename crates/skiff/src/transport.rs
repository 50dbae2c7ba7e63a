// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Transport seam consumed by channels.
//!
//! Concrete sockets live outside this crate; a channel drives whatever
//! implements [`Transport`]. The readiness side of a transport registers
//! with its channel's event loop through [`crate::executor::EventLoop::register_io`].

use std::net::SocketAddr;

use crate::buf::ByteBuf;
use crate::error::Result;

/// Byte-level endpoint operations a channel needs from its transport.
///
/// `read` fills the buffer's writable region and `write` drains the readable
/// region; both report the byte count moved (0 from `read` means the peer
/// closed its side).
pub trait Transport: Send + Sync {
    fn read(&self, buf: &mut ByteBuf) -> Result<usize>;
    fn write(&self, buf: &mut ByteBuf) -> Result<usize>;
    fn bind(&self, addr: SocketAddr) -> Result<()>;
    fn connect(&self, addr: SocketAddr) -> Result<()>;
    fn disconnect(&self) -> Result<()>;
    fn close(&self) -> Result<()>;
    fn local_addr(&self) -> Option<SocketAddr>;
    fn peer_addr(&self) -> Option<SocketAddr>;
}

/// Apply the socket-level options from a channel config to an OS socket.
///
/// Transports call this after creating their socket and before
/// bind/connect. Only options the user actually set are applied.
pub fn apply_socket_options(
    socket: &socket2::Socket,
    config: &crate::channel::ChannelConfig,
) -> std::io::Result<()> {
    use crate::channel::options;

    if let Some(v) = config.get_option(&options::so_reuseaddr()) {
        socket.set_reuse_address(v)?;
    }
    if let Some(v) = config.get_option(&options::so_keepalive()) {
        socket.set_keepalive(v)?;
    }
    if let Some(v) = config.get_option(&options::so_rcvbuf()) {
        socket.set_recv_buffer_size(v)?;
    }
    if let Some(v) = config.get_option(&options::so_sndbuf()) {
        socket.set_send_buffer_size(v)?;
    }
    if let Some(v) = config.get_option(&options::so_linger()) {
        let linger = (v >= 0).then(|| std::time::Duration::from_secs(v as u64));
        socket.set_linger(linger)?;
    }
    if let Some(v) = config.get_option(&options::tcp_nodelay()) {
        socket.set_nodelay(v)?;
    }
    #[cfg(not(windows))]
    if let Some(v) = config.get_option(&options::ip_tos()) {
        socket.set_tos(v)?;
    }
    if let Some(v) = config.get_option(&options::ip_multicast_ttl()) {
        socket.set_multicast_ttl_v4(v)?;
    }
    if let Some(v) = config.get_option(&options::ip_multicast_loop_disabled()) {
        socket.set_multicast_loop_v4(!v)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{options, EmbeddedChannel};
    use socket2::{Domain, Socket, Type};

    #[test]
    fn test_apply_socket_options() {
        let channel = EmbeddedChannel::new();
        let config = channel.channel().config();
        config.set_option(&options::so_reuseaddr(), true);
        config.set_option(&options::so_rcvbuf(), 64 * 1024usize);

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, None).expect("socket");
        apply_socket_options(&socket, config).expect("apply");
        assert!(socket.reuse_address().expect("query"));
        // The kernel may round the buffer size; it must not shrink below
        // the request.
        assert!(socket.recv_buffer_size().expect("query") >= 64 * 1024);
    }

    #[test]
    fn test_unset_options_left_alone() {
        let channel = EmbeddedChannel::new();
        let socket = Socket::new(Domain::IPV4, Type::STREAM, None).expect("socket");
        apply_socket_options(&socket, channel.channel().config()).expect("apply");
    }
}
