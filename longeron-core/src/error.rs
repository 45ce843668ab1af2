/// Longeron Error Types
///
/// Comprehensive error handling for all longeron operations.
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Main error type for longeron operations.
///
/// The variants fall into three groups: usage errors reported
/// synchronously through return values (`EntityAlreadyStarted`,
/// `WeakReferenceExpired`, ...), transient network errors reported
/// through the error callback and retried, and terminal errors that
/// drive a handler or entity to its closed state.
///
/// I/O errors are stored behind an `Arc` so the error can be delivered
/// to both the error callback and the shutdown notification.
#[derive(Error, Debug, Clone)]
pub enum LongeronError {
    /// IO error during socket operations
    #[error("IO error: {0}")]
    Io(Arc<io::Error>),

    /// The message handler returned false, requesting a graceful stop
    #[error("message handler requested stop")]
    MessageHandlerTerminated,

    /// A handle was used after its target was dropped
    #[error("weak reference expired")]
    WeakReferenceExpired,

    /// Operation requires a started entity
    #[error("entity is not started")]
    EntityNotStarted,

    /// Start was called on an already started entity
    #[error("entity already started")]
    EntityAlreadyStarted,

    /// Operation requires a started I/O handler
    #[error("I/O handler is not started")]
    IoHandlerNotStarted,

    /// Start was called on an already started I/O handler
    #[error("I/O handler already started")]
    IoHandlerAlreadyStarted,

    /// Datagram larger than the configured maximum
    #[error("datagram too large: {size} bytes (max: {max})")]
    UdpMaxBufSizeExceeded { size: usize, max: usize },

    /// The message framer produced an unusable result
    #[error("message framer error: {0}")]
    TcpFramerError(String),

    /// Connection closed by the remote peer
    #[error("connection closed by peer")]
    ConnectionClosedByPeer,

    /// Connection closed by this side
    #[error("connection closed locally")]
    ConnectionClosedLocally,

    /// Endpoint resolution failed
    #[error("resolver error: {0}")]
    ResolverError(String),

    /// The local endpoint is already bound by another socket
    #[error("endpoint already in use")]
    EndpointAlreadyInUse,

    /// Catch-all for network errors outside the classified set
    #[error("unexpected network error: {0}")]
    UnexpectedNetworkError(String),
}

/// Result type alias for longeron operations
pub type Result<T> = std::result::Result<T, LongeronError>;

impl From<io::Error> for LongeronError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::AddrInUse {
            return Self::EndpointAlreadyInUse;
        }
        Self::Io(Arc::new(err))
    }
}

impl LongeronError {
    /// Check if this error is transient and the operation can be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Check if this error terminates a connection.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosedByPeer
                | Self::ConnectionClosedLocally
                | Self::MessageHandlerTerminated
                | Self::TcpFramerError(_)
        )
    }
}
