//! Socket construction and option helpers.
//!
//! Entities need options applied before binding (`SO_REUSEADDR`,
//! multicast membership), which the runtime's own constructors do not
//! expose. Sockets are therefore built with `socket2`, configured, and
//! converted into compio sockets through their raw handles.
//!
//! # Safety
//!
//! This module uses unsafe code to cross the raw fd/socket boundary
//! in both directions: ownership transfers exactly once when a
//! configured socket becomes a compio socket (`into_raw_fd` then
//! `from_raw_fd`), and established streams are only ever borrowed
//! (`ManuallyDrop`) for an option call. No descriptor is leaked or
//! double-closed.

#![allow(unsafe_code)]

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use compio::net::{TcpListener, TcpStream, ToSocketAddrsAsync, UdpSocket};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::error::{LongeronError, Result};

const LISTEN_BACKLOG: i32 = 1024;

#[cfg(unix)]
fn into_compio<T: std::os::fd::FromRawFd>(sock: Socket) -> T {
    use std::os::fd::IntoRawFd;
    unsafe { T::from_raw_fd(sock.into_raw_fd()) }
}

#[cfg(windows)]
fn into_compio<T: std::os::windows::io::FromRawSocket>(sock: Socket) -> T {
    use std::os::windows::io::IntoRawSocket;
    unsafe { T::from_raw_socket(sock.into_raw_socket()) }
}

// Inverse of `into_compio`: borrow an established compio stream as a
// socket2 handle for one option call. ManuallyDrop because the stream
// still owns the descriptor.
#[cfg(unix)]
fn with_borrowed_socket<T>(
    stream: &TcpStream,
    op: impl FnOnce(&Socket) -> io::Result<T>,
) -> io::Result<T> {
    use compio::driver::AsRawFd;
    use std::mem::ManuallyDrop;
    use std::os::fd::FromRawFd;
    let sock = ManuallyDrop::new(unsafe { Socket::from_raw_fd(stream.as_raw_fd()) });
    op(&sock)
}

#[cfg(windows)]
fn with_borrowed_socket<T>(
    stream: &TcpStream,
    op: impl FnOnce(&Socket) -> io::Result<T>,
) -> io::Result<T> {
    use std::mem::ManuallyDrop;
    use std::os::windows::io::{AsRawSocket, FromRawSocket};
    let sock = ManuallyDrop::new(unsafe { Socket::from_raw_socket(stream.as_raw_socket()) });
    op(&sock)
}

fn configure_common(sock: &Socket) -> io::Result<()> {
    // compio uses blocking sockets on Linux with io_uring; everywhere
    // else the driver polls and needs non-blocking mode.
    if cfg!(not(target_os = "linux")) {
        sock.set_nonblocking(true)?;
    }
    Ok(())
}

/// Bind and listen on `addr`, optionally with `SO_REUSEADDR`.
pub fn bind_tcp_listener(addr: SocketAddr, reuse_address: bool) -> io::Result<TcpListener> {
    let domain = Domain::for_address(addr);
    let sock = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    sock.set_reuse_address(reuse_address)?;
    configure_common(&sock)?;
    sock.bind(&addr.into())?;
    sock.listen(LISTEN_BACKLOG)?;
    debug!("listening on {addr} (reuse_address={reuse_address})");
    Ok(into_compio(sock))
}

/// Bind a UDP socket, optionally joining an IPv4 multicast group.
///
/// Multicast receivers conventionally bind with `SO_REUSEADDR` so
/// several processes can share the group port; the membership is added
/// on the unspecified interface.
pub fn bind_udp_socket(
    addr: SocketAddr,
    reuse_address: bool,
    multicast_group: Option<Ipv4Addr>,
) -> io::Result<UdpSocket> {
    let domain = Domain::for_address(addr);
    let sock = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_reuse_address(reuse_address)?;
    configure_common(&sock)?;
    sock.bind(&addr.into())?;
    if let Some(group) = multicast_group {
        sock.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        sock.set_multicast_loop_v4(true)?;
        debug!("joined multicast group {group} on {addr}");
    }
    Ok(into_compio(sock))
}

/// Disable Nagle's algorithm on an established stream, so small
/// framed messages hit the wire as soon as their write completes.
///
/// # Errors
///
/// Returns an error if the socket option cannot be set.
#[inline]
pub fn enable_tcp_nodelay(stream: &TcpStream) -> io::Result<()> {
    with_borrowed_socket(stream, |sock| sock.set_nodelay(true))
}

/// Resolve a `host:port` string into socket addresses.
pub async fn resolve_endpoints(endpoint: &str) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = endpoint
        .to_socket_addrs_async()
        .await
        .map_err(|e| LongeronError::ResolverError(format!("{endpoint}: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(LongeronError::ResolverError(format!(
            "{endpoint}: no addresses"
        )));
    }
    Ok(addrs)
}
