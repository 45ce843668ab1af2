//! Weak application handles to net entities.
//!
//! The [`NetHub`](crate::hub::NetHub) keeps the strong references;
//! applications get a [`NetEntity`] and control the endpoint through
//! it. Operations on a handle whose entity was removed fail with
//! [`LongeronError::WeakReferenceExpired`].

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use longeron_core::error::{LongeronError, Result};

use crate::acceptor::TcpAcceptor;
use crate::connector::TcpConnector;
use crate::interface::IoInterface;
use crate::tcp_io::TcpIo;
use crate::udp::UdpEntity;
use crate::udp_io::UdpIo;

/// Weak handle to one net entity.
pub struct NetEntity<E> {
    inner: Weak<E>,
}

impl<E> Clone for NetEntity<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E> NetEntity<E> {
    pub(crate) fn from_arc(entity: &Arc<E>) -> Self {
        Self {
            inner: Arc::downgrade(entity),
        }
    }

    pub(crate) fn ptr(&self) -> *const E {
        self.inner.as_ptr()
    }

    fn upgrade(&self) -> Result<Arc<E>> {
        self.inner.upgrade().ok_or(LongeronError::WeakReferenceExpired)
    }

    /// Whether the underlying entity is still owned by its hub.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl NetEntity<TcpAcceptor> {
    /// Bind, listen, and begin accepting.
    ///
    /// `state_cb` fires once per connection open and close with the
    /// handler's interface and the entity's current handler count;
    /// `err_cb` receives every error, including the terminal shutdown
    /// notification.
    pub fn start<F1, F2>(&self, state_cb: F1, err_cb: F2) -> Result<()>
    where
        F1: FnMut(IoInterface<TcpIo>, usize, bool) + Send + 'static,
        F2: FnMut(Option<IoInterface<TcpIo>>, LongeronError) + Send + 'static,
    {
        TcpAcceptor::start(&self.upgrade()?, state_cb, err_cb)
    }

    /// Stop accepting and tear down every owned handler.
    pub fn stop(&self) -> Result<()> {
        self.upgrade()?.stop()
    }

    /// Whether the entity is currently started.
    pub fn is_started(&self) -> Result<bool> {
        Ok(self.upgrade()?.is_started())
    }

    /// The bound local endpoint; useful with port 0 configs.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.upgrade()?.local_addr()
    }
}

impl NetEntity<TcpConnector> {
    /// Begin connecting to the configured remote endpoints.
    pub fn start<F1, F2>(&self, state_cb: F1, err_cb: F2) -> Result<()>
    where
        F1: FnMut(IoInterface<TcpIo>, usize, bool) + Send + 'static,
        F2: FnMut(Option<IoInterface<TcpIo>>, LongeronError) + Send + 'static,
    {
        TcpConnector::start(&self.upgrade()?, state_cb, err_cb)
    }

    /// Stop connecting (or disconnect) and shut the entity down.
    pub fn stop(&self) -> Result<()> {
        self.upgrade()?.stop()
    }

    /// Whether the entity is currently started.
    pub fn is_started(&self) -> Result<bool> {
        Ok(self.upgrade()?.is_started())
    }

    /// Local endpoint of the current connection.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.upgrade()?.local_addr()
    }
}

impl NetEntity<UdpEntity> {
    /// Bind (and join the configured multicast group) and report the
    /// single handler open.
    pub fn start<F1, F2>(&self, state_cb: F1, err_cb: F2) -> Result<()>
    where
        F1: FnMut(IoInterface<UdpIo>, usize, bool) + Send + 'static,
        F2: FnMut(Option<IoInterface<UdpIo>>, LongeronError) + Send + 'static,
    {
        UdpEntity::start(&self.upgrade()?, state_cb, err_cb)
    }

    /// Tear down the socket and shut the entity down.
    pub fn stop(&self) -> Result<()> {
        self.upgrade()?.stop()
    }

    /// Whether the entity is currently started.
    pub fn is_started(&self) -> Result<bool> {
        Ok(self.upgrade()?.is_started())
    }

    /// The bound local endpoint; useful with port 0 configs.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.upgrade()?.local_addr()
    }
}

/// Handle to a TCP acceptor entity.
pub type TcpAcceptorEntity = NetEntity<TcpAcceptor>;
/// Handle to a TCP connector entity.
pub type TcpConnectorEntity = NetEntity<TcpConnector>;
/// Handle to a UDP entity.
pub type UdpNetEntity = NetEntity<UdpEntity>;
