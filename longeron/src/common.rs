//! Callback plumbing shared by the entity implementations.
//!
//! Handlers never hold strong references back to their entity; they
//! report lifecycle through a flume event channel the entity's control
//! task drains. Application callbacks are taken out of their slot for
//! the duration of an invocation so re-entrant calls into the entity
//! (stop, restart) cannot deadlock on the callback mutex.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use longeron_core::error::LongeronError;

use crate::interface::{IoInterface, IoOutput};

/// Connection open/close notification: interface, total handlers
/// owned by the entity, opened flag.
pub(crate) type StateChangeCb<H> = Box<dyn FnMut(IoInterface<H>, usize, bool) + Send>;

/// Error reporter: interface of the affected handler when one exists.
pub(crate) type ErrorCb<H> = Box<dyn FnMut(Option<IoInterface<H>>, LongeronError) + Send>;

/// TCP message framer: bytes accumulated so far in, required
/// additional byte count out; zero means one complete message.
pub(crate) type MsgFramer = Box<dyn Fn(&[u8]) -> usize + Send>;

/// Complete-message dispatch; returning false requests a graceful
/// stop of the handler.
pub(crate) type MsgHandler<H> = Box<dyn FnMut(Bytes, IoOutput<H>, SocketAddr) -> bool + Send>;

pub(crate) struct EntityCbs<H> {
    pub state: StateChangeCb<H>,
    pub error: ErrorCb<H>,
}

pub(crate) type SharedCbs<H> = Arc<Mutex<Option<EntityCbs<H>>>>;

pub(crate) fn new_shared_cbs<H>() -> SharedCbs<H> {
    Arc::new(Mutex::new(None))
}

// Invoke-with-takeout: the slot is released while the application
// callback runs, and not restored if the callback replaced it (entity
// restarted from inside a callback).
fn with_cbs<H>(cbs: &SharedCbs<H>, f: impl FnOnce(&mut EntityCbs<H>)) {
    let taken = cbs.lock().take();
    if let Some(mut c) = taken {
        f(&mut c);
        let mut slot = cbs.lock();
        if slot.is_none() {
            *slot = Some(c);
        }
    }
}

pub(crate) fn notify_state<H>(cbs: &SharedCbs<H>, io: IoInterface<H>, total: usize, opened: bool) {
    with_cbs(cbs, |c| (c.state)(io, total, opened));
}

pub(crate) fn notify_error<H>(
    cbs: &SharedCbs<H>,
    io: Option<IoInterface<H>>,
    err: LongeronError,
) {
    with_cbs(cbs, |c| (c.error)(io, err));
}

/// Lifecycle events flowing handler → entity control task.
#[derive(Debug)]
pub(crate) enum HandlerEvent {
    /// Transient error; the handler keeps running.
    Error { id: u64, err: LongeronError },
    /// The handler finished tearing down, exactly once per handler.
    Closed { id: u64, err: LongeronError },
}

/// Commands consumed by a handler's write pump.
#[derive(Debug)]
pub(crate) enum WriteCmd {
    /// Start a write chain with this element.
    Write(Bytes, Option<SocketAddr>),
    /// Exit after the in-flight element, dropping the rest of the queue.
    Stop,
}

/// Accept failures that invalidate the listening socket itself; the
/// rest are per-connection and survivable.
pub(crate) fn is_fatal_accept_error(err: &io::Error) -> bool {
    !matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

/// Receive failures a UDP socket can ignore (ICMP unreachable noise).
pub(crate) fn is_transient_udp_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}
