//! TCP acceptor entity.
//!
//! Listens on a configured local endpoint and spawns one [`TcpIo`]
//! per accepted connection. A dedicated accept task feeds incoming
//! connections into the control task, which also drains handler
//! lifecycle events and the stop signal, so no in-flight accept is
//! cancelled by unrelated traffic.
//!
//! Stop sequence: stop accepting, broadcast stop to every owned
//! handler, report each departure through the state change callback,
//! then deliver the single shutdown notification.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use compio::net::{TcpListener, TcpStream};
use flume::{Receiver, Sender};
use futures::{pin_mut, select, FutureExt};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use longeron_core::config::AcceptorConfig;
use longeron_core::entity_base::EntityBase;
use longeron_core::error::{LongeronError, Result};
use longeron_core::sockopt;

use crate::common::{
    is_fatal_accept_error, new_shared_cbs, notify_error, notify_state, EntityCbs, HandlerEvent,
    SharedCbs,
};
use crate::interface::IoInterface;
use crate::tcp_io::TcpIo;

type Incoming = io::Result<(TcpStream, SocketAddr)>;

/// Listening entity owning zero-to-many connection handlers.
pub struct TcpAcceptor {
    cfg: AcceptorConfig,
    base: EntityBase<Option<IoInterface<TcpIo>>>,
    cbs: SharedCbs<TcpIo>,
    handlers: Mutex<HashMap<u64, Arc<TcpIo>>>,
    next_id: AtomicU64,
    ctl_tx: Mutex<Option<Sender<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl TcpAcceptor {
    pub(crate) fn new(cfg: AcceptorConfig) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            base: EntityBase::new(),
            cbs: new_shared_cbs(),
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            ctl_tx: Mutex::new(None),
            local_addr: Mutex::new(None),
        })
    }

    pub(crate) fn start<F1, F2>(this: &Arc<Self>, state_cb: F1, err_cb: F2) -> Result<()>
    where
        F1: FnMut(IoInterface<TcpIo>, usize, bool) + Send + 'static,
        F2: FnMut(Option<IoInterface<TcpIo>>, LongeronError) + Send + 'static,
    {
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

        let listener = match sockopt::bind_tcp_listener(this.cfg.local_addr, this.cfg.reuse_address)
        {
            Ok(listener) => listener,
            Err(e) => {
                // usage error: report synchronously, fire no callback
                this.base.stop();
                *this.cbs.lock() = None;
                return Err(e.into());
            }
        };
        *this.local_addr.lock() = listener.local_addr().ok();

        let (ctl_tx, ctl_rx) = flume::unbounded();
        let (ev_tx, ev_rx) = flume::unbounded();
        let (acc_tx, acc_rx) = flume::unbounded();
        let (acc_stop_tx, acc_stop_rx) = flume::unbounded();
        let (acc_done_tx, acc_done_rx) = flume::unbounded();
        *this.ctl_tx.lock() = Some(ctl_tx);

        compio::runtime::spawn(accept_loop(listener, acc_tx, acc_stop_rx, acc_done_tx)).detach();
        compio::runtime::spawn(Self::run(
            Arc::clone(this),
            acc_rx,
            acc_stop_tx,
            acc_done_rx,
            ev_tx,
            ev_rx,
            ctl_rx,
        ))
        .detach();
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

    async fn run(
        this: Arc<Self>,
        acc_rx: Receiver<Incoming>,
        acc_stop_tx: Sender<()>,
        acc_done_rx: Receiver<()>,
        ev_tx: Sender<HandlerEvent>,
        ev_rx: Receiver<HandlerEvent>,
        ctl_rx: Receiver<()>,
    ) {
        enum Sel {
            Incoming(Incoming),
            Handler(HandlerEvent),
            Stop,
        }

        let mut final_err = LongeronError::ConnectionClosedLocally;
        let mut last_closed: Option<IoInterface<TcpIo>> = None;
        loop {
            let sel = {
                let inc_fut = acc_rx.recv_async().fuse();
                pin_mut!(inc_fut);
                let ev_fut = ev_rx.recv_async().fuse();
                pin_mut!(ev_fut);
                let ctl_fut = ctl_rx.recv_async().fuse();
                pin_mut!(ctl_fut);
                select! {
                    res = inc_fut => match res {
                        Ok(incoming) => Sel::Incoming(incoming),
                        Err(_) => Sel::Stop,
                    },
                    ev = ev_fut => match ev {
                        Ok(ev) => Sel::Handler(ev),
                        Err(_) => Sel::Stop,
                    },
                    _ = ctl_fut => Sel::Stop,
                }
            };
            match sel {
                Sel::Incoming(Ok((stream, peer))) => this.admit(stream, peer, &ev_tx),
                Sel::Incoming(Err(e)) => {
                    if is_fatal_accept_error(&e) {
                        warn!("accept failed fatally: {e}");
                        final_err = e.into();
                        notify_error(&this.cbs, None, final_err.clone());
                        break;
                    }
                    notify_error(&this.cbs, None, e.into());
                }
                Sel::Handler(ev) => {
                    if let Some(iface) = this.on_handler_event(ev) {
                        last_closed = Some(iface);
                    }
                }
                Sel::Stop => break,
            }
        }

        // Stopping: no further accepts, tear down every owned handler.
        // The accept task drops the listener on exit; wait for that so
        // the local endpoint is free again before shutdown is reported.
        let _ = acc_stop_tx.send(());
        let _ = acc_done_rx.recv_async().await;
        this.base.stop();
        let snapshot: Vec<Arc<TcpIo>> = this.handlers.lock().values().cloned().collect();
        for handler in snapshot {
            handler.initiate_stop(LongeronError::ConnectionClosedLocally);
        }
        while !this.handlers.lock().is_empty() {
            match ev_rx.recv_async().await {
                Ok(ev) => {
                    if let Some(iface) = this.on_handler_event(ev) {
                        last_closed = Some(iface);
                    }
                }
                Err(_) => break,
            }
        }

        debug!("acceptor stopped: {final_err}");
        this.base.call_shutdown_change_cb(last_closed, final_err, 0);
        *this.cbs.lock() = None;
        *this.ctl_tx.lock() = None;
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr, ev_tx: &Sender<HandlerEvent>) {
        if let Err(e) = sockopt::enable_tcp_nodelay(&stream) {
            debug!("TCP_NODELAY failed for {peer}: {e}");
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handler = TcpIo::new(
            id,
            stream,
            peer,
            self.cfg.read_buffer_size,
            self.cfg.max_message_size,
            ev_tx.clone(),
        );
        handler.admit();
        let total = {
            let mut handlers = self.handlers.lock();
            handlers.insert(id, Arc::clone(&handler));
            handlers.len()
        };
        debug!("accepted connection from {peer} ({total} active)");
        notify_state(&self.cbs, IoInterface::from_arc(&handler), total, true);
    }

    /// Returns the interface of a handler that closed; the handler
    /// itself is released here, so the returned weak reference may
    /// expire once the pump tasks finish.
    fn on_handler_event(&self, ev: HandlerEvent) -> Option<IoInterface<TcpIo>> {
        match ev {
            HandlerEvent::Error { err, .. } => {
                notify_error(&self.cbs, None, err);
                None
            }
            HandlerEvent::Closed { id, err } => {
                let handler = self.handlers.lock().remove(&id)?;
                let remaining = self.handlers.lock().len();
                debug!("connection {id} closed: {err} ({remaining} active)");
                let iface = IoInterface::from_arc(&handler);
                // a locally requested close is not a handler error;
                // only the shutdown notification reports it
                if !matches!(err, LongeronError::ConnectionClosedLocally) {
                    notify_error(&self.cbs, Some(iface.clone()), err);
                }
                notify_state(&self.cbs, iface.clone(), remaining, false);
                Some(iface)
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    acc_tx: Sender<Incoming>,
    stop_rx: Receiver<()>,
    done_tx: Sender<()>,
) {
    loop {
        let incoming = {
            let accept_fut = listener.accept().fuse();
            pin_mut!(accept_fut);
            let stop_fut = stop_rx.recv_async().fuse();
            pin_mut!(stop_fut);
            select! {
                res = accept_fut => Some(res),
                _ = stop_fut => None,
            }
        };
        let Some(incoming) = incoming else { break };
        let failed = incoming.is_err();
        if acc_tx.send(incoming).is_err() {
            break;
        }
        if failed {
            // don't spin on a hosed listener while the control task decides
            compio::time::sleep(Duration::from_millis(50)).await;
        }
    }
    // listener drops here; the control task waits on this before
    // reporting shutdown
    drop(listener);
    drop(done_tx);
}
