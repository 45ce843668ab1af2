//! Endpoint configuration.
//!
//! One config struct per entity kind, builder-style. These are plain
//! data: binding, connecting, and option application happen when the
//! entity starts.

use std::net::{Ipv4Addr, SocketAddr};

use crate::backoff::Backoff;

/// Default per-read buffer size for TCP handlers.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Default upper bound for a single framed TCP message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default maximum datagram size (typical Ethernet MTU payload).
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 1500;

/// Configuration for a TCP acceptor entity.
///
/// # Examples
///
/// ```
/// use longeron_core::config::AcceptorConfig;
///
/// let cfg = AcceptorConfig::new("127.0.0.1:0".parse().unwrap())
///     .with_reuse_address(true);
/// ```
#[derive(Debug, Clone)]
pub struct AcceptorConfig {
    /// Local endpoint to bind and listen on.
    pub local_addr: SocketAddr,
    /// Set `SO_REUSEADDR` before binding.
    pub reuse_address: bool,
    /// Per-read buffer size for accepted connections.
    pub read_buffer_size: usize,
    /// Reject framed messages larger than this.
    pub max_message_size: usize,
}

impl AcceptorConfig {
    #[must_use]
    pub fn new(local_addr: SocketAddr) -> Self {
        Self {
            local_addr,
            reuse_address: true,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    #[must_use]
    pub fn with_reuse_address(mut self, reuse: bool) -> Self {
        self.reuse_address = reuse;
        self
    }

    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}

/// Configuration for a TCP connector entity.
///
/// Remote endpoints are tried in order on every connection round.
/// Reconnection is opt-in: `None` means a lost connection shuts the
/// entity down.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Remote endpoints, tried in order.
    pub remote_addrs: smallvec::SmallVec<[SocketAddr; 2]>,
    /// Reconnect policy; `None` disables reconnection.
    pub reconnect: Option<Backoff>,
    /// Per-read buffer size.
    pub read_buffer_size: usize,
    /// Reject framed messages larger than this.
    pub max_message_size: usize,
}

impl ConnectorConfig {
    #[must_use]
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addrs: smallvec::smallvec![remote_addr],
            reconnect: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Build from a list of remote endpoints; the list must be
    /// non-empty by the time the connector starts.
    #[must_use]
    pub fn from_addrs(remote_addrs: impl IntoIterator<Item = SocketAddr>) -> Self {
        Self {
            remote_addrs: remote_addrs.into_iter().collect(),
            reconnect: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    #[must_use]
    pub fn with_reconnect(mut self, backoff: Backoff) -> Self {
        self.reconnect = Some(backoff);
        self
    }

    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}

/// Configuration for a UDP entity.
///
/// Three shapes are supported:
/// - receiver (and sender): `local_addr` set,
/// - sender-only: `local_addr` empty, every send carries a destination
///   or uses `default_remote`,
/// - multicast receiver: `local_addr` set plus `multicast_group`.
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Local endpoint to bind; `None` binds an ephemeral wildcard
    /// socket for sending.
    pub local_addr: Option<SocketAddr>,
    /// Destination for `send` calls without an explicit endpoint.
    pub default_remote: Option<SocketAddr>,
    /// IPv4 multicast group to join after binding.
    pub multicast_group: Option<Ipv4Addr>,
    /// Set `SO_REUSEADDR` before binding (required for multicast
    /// receivers sharing a port).
    pub reuse_address: bool,
    /// Largest datagram accepted for send and posted for receive.
    pub max_datagram_size: usize,
}

impl UdpConfig {
    /// Receiver (and sender) bound to `local_addr`.
    #[must_use]
    pub fn bound(local_addr: SocketAddr) -> Self {
        Self {
            local_addr: Some(local_addr),
            default_remote: None,
            multicast_group: None,
            reuse_address: false,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
        }
    }

    /// Sender-only: unbound, every send needs a destination.
    #[must_use]
    pub fn sender() -> Self {
        Self {
            local_addr: None,
            default_remote: None,
            multicast_group: None,
            reuse_address: false,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
        }
    }

    #[must_use]
    pub fn with_default_remote(mut self, remote: SocketAddr) -> Self {
        self.default_remote = Some(remote);
        self
    }

    #[must_use]
    pub fn with_multicast_group(mut self, group: Ipv4Addr) -> Self {
        self.multicast_group = Some(group);
        self.reuse_address = true;
        self
    }

    #[must_use]
    pub fn with_reuse_address(mut self, reuse: bool) -> Self {
        self.reuse_address = reuse;
        self
    }

    #[must_use]
    pub fn with_max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = size;
        self
    }
}
