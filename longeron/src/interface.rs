//! Weak application handles to active I/O handlers.
//!
//! An [`IoInterface`] is handed to the application through the state
//! change callback when a connection opens. It is a value type over a
//! weak reference: holding one never extends the handler's lifetime,
//! and every operation first upgrades the reference, failing with
//! [`LongeronError::WeakReferenceExpired`] once the handler is gone.
//!
//! [`IoOutput`] is the restricted view passed to message handlers so
//! they can reply without being given the full interface.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use bytes::Bytes;

use longeron_core::error::{LongeronError, Result};
use longeron_core::output_queue::OutQueueStats;

use crate::tcp_io::TcpIo;
use crate::udp_io::UdpIo;

/// Weak handle to one active I/O handler.
pub struct IoInterface<H> {
    inner: Weak<H>,
}

/// Weak send-only handle, the reply token for message handlers.
pub struct IoOutput<H> {
    inner: Weak<H>,
}

impl<H> Clone for IoInterface<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<H> Clone for IoOutput<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<H> IoInterface<H> {
    pub(crate) fn from_arc(handler: &Arc<H>) -> Self {
        Self {
            inner: Arc::downgrade(handler),
        }
    }

    fn upgrade(&self) -> Result<Arc<H>> {
        self.inner.upgrade().ok_or(LongeronError::WeakReferenceExpired)
    }

    /// Whether the underlying handler is still alive.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl<H> IoOutput<H> {
    pub(crate) fn from_weak(handler: Weak<H>) -> Self {
        Self { inner: handler }
    }

    fn upgrade(&self) -> Result<Arc<H>> {
        self.inner.upgrade().ok_or(LongeronError::WeakReferenceExpired)
    }

    /// Whether the underlying handler is still alive.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl IoInterface<TcpIo> {
    /// Install the message framer and handler and begin reading.
    ///
    /// `initial_read_size` is the first read target, typically the
    /// fixed header length the framer inspects. May be called once per
    /// handler.
    pub fn start_io<F, M>(&self, initial_read_size: usize, framer: F, handler: M) -> Result<()>
    where
        F: Fn(&[u8]) -> usize + Send + 'static,
        M: FnMut(Bytes, IoOutput<TcpIo>, SocketAddr) -> bool + Send + 'static,
    {
        let h = self.upgrade()?;
        TcpIo::start_io(&h, initial_read_size, Box::new(framer), Box::new(handler))
    }

    /// Convenience for fixed-length messages: every `msg_len` bytes
    /// form one message.
    pub fn start_io_fixed<M>(&self, msg_len: usize, handler: M) -> Result<()>
    where
        M: FnMut(Bytes, IoOutput<TcpIo>, SocketAddr) -> bool + Send + 'static,
    {
        let len = msg_len.max(1);
        self.start_io(
            len,
            move |bytes| if bytes.len() >= len { 0 } else { len - bytes.len() },
            handler,
        )
    }

    /// Request a graceful stop of this handler.
    pub fn stop_io(&self) -> Result<()> {
        self.upgrade()?.stop_io()
    }

    /// Queue `buf` for transmission, starting a write if none is in
    /// flight.
    pub fn send(&self, buf: impl Into<Bytes>) -> Result<()> {
        self.upgrade()?.send(buf.into())
    }

    /// Whether the handler has been admitted and not yet stopped.
    pub fn is_io_started(&self) -> Result<bool> {
        Ok(self.upgrade()?.is_io_started())
    }

    /// Snapshot of the outgoing queue, for backpressure decisions.
    pub fn output_queue_stats(&self) -> Result<OutQueueStats> {
        Ok(self.upgrade()?.output_queue_stats())
    }

    /// The peer endpoint of this connection.
    pub fn remote_addr(&self) -> Result<SocketAddr> {
        Ok(self.upgrade()?.remote_addr())
    }
}

impl IoInterface<UdpIo> {
    /// Install the datagram handler and begin receiving. One handler
    /// invocation per datagram; no framing.
    pub fn start_io<M>(&self, handler: M) -> Result<()>
    where
        M: FnMut(Bytes, IoOutput<UdpIo>, SocketAddr) -> bool + Send + 'static,
    {
        let h = self.upgrade()?;
        UdpIo::start_io(&h, Some(Box::new(handler)))
    }

    /// Arm the send side only; no receives are posted.
    pub fn start_io_send_only(&self) -> Result<()> {
        let h = self.upgrade()?;
        UdpIo::start_io(&h, None)
    }

    /// Request a graceful stop of this handler.
    pub fn stop_io(&self) -> Result<()> {
        self.upgrade()?.stop_io()
    }

    /// Send to the configured default remote endpoint.
    pub fn send(&self, buf: impl Into<Bytes>) -> Result<()> {
        self.upgrade()?.send(buf.into(), None)
    }

    /// Send to an explicit destination.
    pub fn send_to(&self, buf: impl Into<Bytes>, dest: SocketAddr) -> Result<()> {
        self.upgrade()?.send(buf.into(), Some(dest))
    }

    /// Whether the handler has been admitted and not yet stopped.
    pub fn is_io_started(&self) -> Result<bool> {
        Ok(self.upgrade()?.is_io_started())
    }

    /// Snapshot of the outgoing queue, for backpressure decisions.
    pub fn output_queue_stats(&self) -> Result<OutQueueStats> {
        Ok(self.upgrade()?.output_queue_stats())
    }

    /// The bound local endpoint of the socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.upgrade()?.local_addr()
    }
}

impl IoOutput<TcpIo> {
    /// Queue `buf` for transmission on the handler this output belongs
    /// to.
    pub fn send(&self, buf: impl Into<Bytes>) -> Result<()> {
        self.upgrade()?.send(buf.into())
    }
}

impl IoOutput<UdpIo> {
    /// Send to the configured default remote endpoint.
    pub fn send(&self, buf: impl Into<Bytes>) -> Result<()> {
        self.upgrade()?.send(buf.into(), None)
    }

    /// Send to an explicit destination.
    pub fn send_to(&self, buf: impl Into<Bytes>, dest: SocketAddr) -> Result<()> {
        self.upgrade()?.send(buf.into(), Some(dest))
    }
}

/// Interface to a TCP connection handler.
pub type TcpIoInterface = IoInterface<TcpIo>;
/// Interface to a UDP socket handler.
pub type UdpIoInterface = IoInterface<UdpIo>;
/// Reply token for TCP message handlers.
pub type TcpIoOutput = IoOutput<TcpIo>;
/// Reply token for UDP message handlers.
pub type UdpIoOutput = IoOutput<UdpIo>;
