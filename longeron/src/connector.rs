//! TCP connector entity.
//!
//! Establishes one outgoing connection, owning a single [`TcpIo`] at
//! a time. Remote endpoints are tried in order each round. With
//! reconnection enabled, a lost connection re-enters the connecting
//! state after one backoff delay; without it, loss shuts the entity
//! down. Connect attempts and backoff sleeps abort when the entity is
//! stopped.

use std::net::SocketAddr;
use std::sync::Arc;

use compio::net::TcpStream;
use flume::{Receiver, Sender};
use futures::{pin_mut, select, FutureExt};
use parking_lot::Mutex;
use tracing::{debug, trace};

use longeron_core::backoff::Backoff;
use longeron_core::config::ConnectorConfig;
use longeron_core::entity_base::EntityBase;
use longeron_core::error::{LongeronError, Result};
use longeron_core::sockopt;

use crate::common::{
    new_shared_cbs, notify_error, notify_state, EntityCbs, HandlerEvent, SharedCbs,
};
use crate::interface::IoInterface;
use crate::tcp_io::TcpIo;

/// Outgoing-connection entity owning at most one handler.
pub struct TcpConnector {
    cfg: ConnectorConfig,
    base: EntityBase<Option<IoInterface<TcpIo>>>,
    cbs: SharedCbs<TcpIo>,
    handler: Mutex<Option<Arc<TcpIo>>>,
    ctl_tx: Mutex<Option<Sender<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

enum RoundEnd {
    /// Handler closed with this error; reconnect may follow.
    Lost(LongeronError),
    /// Stop requested or channel gone; shut down with this error.
    Finished(LongeronError),
}

impl TcpConnector {
    pub(crate) fn new(cfg: ConnectorConfig) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            base: EntityBase::new(),
            cbs: new_shared_cbs(),
            handler: Mutex::new(None),
            ctl_tx: Mutex::new(None),
            local_addr: Mutex::new(None),
        })
    }

    pub(crate) fn start<F1, F2>(this: &Arc<Self>, state_cb: F1, err_cb: F2) -> Result<()>
    where
        F1: FnMut(IoInterface<TcpIo>, usize, bool) + Send + 'static,
        F2: FnMut(Option<IoInterface<TcpIo>>, LongeronError) + Send + 'static,
    {
        if this.cfg.remote_addrs.is_empty() {
            return Err(LongeronError::ResolverError(
                "connector has no remote endpoints".into(),
            ));
        }
        let shutdown_cbs = Arc::clone(&this.cbs);
        if !this.base.start(move |io, err, _remaining| {
            notify_error(&shutdown_cbs, io, err);
        }) {
            return Err(LongeronError::EntityAlreadyStarted);
        }
        *this.cbs.lock() = Some(EntityCbs {
            state: Box::new(state_cb),
            error: Box::new(err_cb),
        });

        let (ctl_tx, ctl_rx) = flume::unbounded();
        *this.ctl_tx.lock() = Some(ctl_tx);
        compio::runtime::spawn(Self::run(Arc::clone(this), ctl_rx)).detach();
        Ok(())
    }

    pub(crate) fn stop(&self) -> Result<()> {
        if !self.base.stop() {
            return Err(LongeronError::EntityNotStarted);
        }
        if let Some(tx) = self.ctl_tx.lock().as_ref() {
            let _ = tx.send(());
        }
        Ok(())
    }

    pub(crate) fn is_started(&self) -> bool {
        self.base.is_started()
    }

    pub(crate) fn local_addr(&self) -> Result<SocketAddr> {
        self.local_addr
            .lock()
            .ok_or(LongeronError::EntityNotStarted)
    }

    async fn run(this: Arc<Self>, ctl_rx: Receiver<()>) {
        let (ev_tx, ev_rx) = flume::unbounded::<HandlerEvent>();
        let mut backoff = this.cfg.reconnect.clone();
        let mut last_closed: Option<IoInterface<TcpIo>> = None;

        let final_err = loop {
            // Connecting
            let stream = match Self::connect_round(&this, &ctl_rx).await {
                Ok(Some(stream)) => stream,
                // stop requested mid-connect
                Ok(None) => break LongeronError::ConnectionClosedLocally,
                Err(err) => {
                    notify_error(&this.cbs, None, err.clone());
                    match Self::backoff_or_finish(&mut backoff, err, &ctl_rx).await {
                        Some(err) => break err,
                        None => continue,
                    }
                }
            };

            // Connected
            if let Some(b) = &mut backoff {
                b.reset();
            }
            if let Err(e) = sockopt::enable_tcp_nodelay(&stream) {
                debug!("TCP_NODELAY failed: {e}");
            }
            *this.local_addr.lock() = stream.local_addr().ok();
            let peer = stream
                .peer_addr()
                .unwrap_or_else(|_| this.cfg.remote_addrs[0]);
            let handler = TcpIo::new(
                1,
                stream,
                peer,
                this.cfg.read_buffer_size,
                this.cfg.max_message_size,
                ev_tx.clone(),
            );
            handler.admit();
            *this.handler.lock() = Some(Arc::clone(&handler));
            debug!("connected to {peer}");
            notify_state(&this.cbs, IoInterface::from_arc(&handler), 1, true);

            match Self::wait_for_close(&this, &ev_rx, &ctl_rx).await {
                RoundEnd::Lost(err) => {
                    if let Some(h) = this.handler.lock().take() {
                        last_closed = Some(IoInterface::from_arc(&h));
                    }
                    if !this.base.is_started() {
                        // stop arrived while the handler was closing
                        break LongeronError::ConnectionClosedLocally;
                    }
                    match Self::backoff_or_finish(&mut backoff, err, &ctl_rx).await {
                        Some(err) => break err,
                        None => continue,
                    }
                }
                RoundEnd::Finished(err) => {
                    if let Some(h) = this.handler.lock().take() {
                        last_closed = Some(IoInterface::from_arc(&h));
                    }
                    break err;
                }
            }
        };

        this.base.stop();
        debug!("connector stopped: {final_err}");
        this.base.call_shutdown_change_cb(last_closed, final_err, 0);
        *this.cbs.lock() = None;
        *this.ctl_tx.lock() = None;
    }

    /// Try each remote endpoint once. `Ok(None)` means stop was
    /// requested; `Err` carries the last connect failure.
    async fn connect_round(
        this: &Arc<Self>,
        ctl_rx: &Receiver<()>,
    ) -> Result<Option<TcpStream>> {
        let mut last_err =
            LongeronError::UnexpectedNetworkError("no connect attempt made".into());
        for addr in &this.cfg.remote_addrs {
            trace!("connecting to {addr}");
            let attempt = {
                let connect_fut = TcpStream::connect(*addr).fuse();
                pin_mut!(connect_fut);
                let stop_fut = ctl_rx.recv_async().fuse();
                pin_mut!(stop_fut);
                select! {
                    res = connect_fut => Some(res),
                    _ = stop_fut => None,
                }
            };
            match attempt {
                Some(Ok(stream)) => return Ok(Some(stream)),
                Some(Err(e)) => {
                    debug!("connect to {addr} failed: {e}");
                    last_err = e.into();
                }
                None => return Ok(None),
            }
        }
        Err(last_err)
    }

    /// After a failure: with reconnect, sleep one backoff delay
    /// (abortable by stop) and return `None` to retry; without it,
    /// return the terminal error.
    async fn backoff_or_finish(
        backoff: &mut Option<Backoff>,
        err: LongeronError,
        ctl_rx: &Receiver<()>,
    ) -> Option<LongeronError> {
        let Some(b) = backoff.as_mut() else {
            return Some(err);
        };
        let delay = b.next_delay();
        debug!("reconnect attempt {} after {delay:?}", b.attempt());
        let stopped = {
            let sleep_fut = compio::time::sleep(delay).fuse();
            pin_mut!(sleep_fut);
            let stop_fut = ctl_rx.recv_async().fuse();
            pin_mut!(stop_fut);
            select! {
                () = sleep_fut => false,
                _ = stop_fut => true,
            }
        };
        if stopped {
            Some(LongeronError::ConnectionClosedLocally)
        } else {
            None
        }
    }

    /// Drain handler events until the connection closes or stop is
    /// requested.
    async fn wait_for_close(
        this: &Arc<Self>,
        ev_rx: &Receiver<HandlerEvent>,
        ctl_rx: &Receiver<()>,
    ) -> RoundEnd {
        let mut stopping = false;
        loop {
            enum Sel {
                Event(HandlerEvent),
                Stop,
                Dead,
            }
            let sel = {
                let ev_fut = ev_rx.recv_async().fuse();
                pin_mut!(ev_fut);
                let ctl_fut = ctl_rx.recv_async().fuse();
                pin_mut!(ctl_fut);
                select! {
                    ev = ev_fut => ev.map_or(Sel::Dead, Sel::Event),
                    _ = ctl_fut => Sel::Stop,
                }
            };
            match sel {
                Sel::Event(HandlerEvent::Error { err, .. }) => {
                    let iface = this.handler.lock().as_ref().map(IoInterface::from_arc);
                    notify_error(&this.cbs, iface, err);
                }
                Sel::Event(HandlerEvent::Closed { err, .. }) => {
                    let iface = this.handler.lock().as_ref().map(IoInterface::from_arc);
                    if let Some(iface) = iface {
                        // a locally requested close is reported by the
                        // shutdown notification alone
                        if !matches!(err, LongeronError::ConnectionClosedLocally) {
                            notify_error(&this.cbs, Some(iface.clone()), err.clone());
                        }
                        notify_state(&this.cbs, iface, 0, false);
                    }
                    return if stopping {
                        RoundEnd::Finished(LongeronError::ConnectionClosedLocally)
                    } else {
                        RoundEnd::Lost(err)
                    };
                }
                Sel::Stop => {
                    stopping = true;
                    let handler = this.handler.lock().clone();
                    if let Some(h) = handler {
                        h.initiate_stop(LongeronError::ConnectionClosedLocally);
                    }
                    // the Closed event completes the shutdown
                }
                Sel::Dead => {
                    return RoundEnd::Finished(LongeronError::ConnectionClosedLocally);
                }
            }
        }
    }
}
