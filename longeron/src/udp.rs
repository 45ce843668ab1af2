//! UDP entity.
//!
//! Owns one socket and exactly one [`UdpIo`] handler; there is no
//! multi-handler fan-out. Receiver configurations bind the given
//! local endpoint (joining a multicast group when configured), sender
//! configurations bind an ephemeral wildcard socket. The handler is
//! admitted and reported open immediately on start.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use flume::{Receiver, Sender};
use futures::{pin_mut, select, FutureExt};
use parking_lot::Mutex;
use tracing::debug;

use longeron_core::config::UdpConfig;
use longeron_core::entity_base::EntityBase;
use longeron_core::error::{LongeronError, Result};
use longeron_core::sockopt;

use crate::common::{
    new_shared_cbs, notify_error, notify_state, EntityCbs, HandlerEvent, SharedCbs,
};
use crate::interface::IoInterface;
use crate::udp_io::UdpIo;

/// Single-socket UDP entity.
pub struct UdpEntity {
    cfg: UdpConfig,
    base: EntityBase<Option<IoInterface<UdpIo>>>,
    cbs: SharedCbs<UdpIo>,
    handler: Mutex<Option<Arc<UdpIo>>>,
    ctl_tx: Mutex<Option<Sender<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl UdpEntity {
    pub(crate) fn new(cfg: UdpConfig) -> Arc<Self> {
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
        F1: FnMut(IoInterface<UdpIo>, usize, bool) + Send + 'static,
        F2: FnMut(Option<IoInterface<UdpIo>>, LongeronError) + Send + 'static,
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

        // sender-only sockets bind an ephemeral wildcard of the same
        // family as the default remote
        let bind_addr = this.cfg.local_addr.unwrap_or_else(|| {
            match this.cfg.default_remote {
                Some(SocketAddr::V6(_)) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
                _ => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            }
        });
        let socket = match sockopt::bind_udp_socket(
            bind_addr,
            this.cfg.reuse_address,
            this.cfg.multicast_group,
        ) {
            Ok(socket) => socket,
            Err(e) => {
                this.base.stop();
                *this.cbs.lock() = None;
                return Err(e.into());
            }
        };
        *this.local_addr.lock() = socket.local_addr().ok();

        let (ctl_tx, ctl_rx) = flume::unbounded();
        let (ev_tx, ev_rx) = flume::unbounded();
        *this.ctl_tx.lock() = Some(ctl_tx);

        let handler = UdpIo::new(
            1,
            socket,
            this.cfg.default_remote,
            this.cfg.max_datagram_size,
            ev_tx,
        );
        handler.admit();
        *this.handler.lock() = Some(handler);

        compio::runtime::spawn(Self::run(Arc::clone(this), ev_rx, ctl_rx)).detach();
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

    async fn run(this: Arc<Self>, ev_rx: Receiver<HandlerEvent>, ctl_rx: Receiver<()>) {
        let Some(handler) = this.handler.lock().clone() else {
            return;
        };
        notify_state(&this.cbs, IoInterface::from_arc(&handler), 1, true);

        let mut final_err = LongeronError::ConnectionClosedLocally;
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
                    notify_error(&this.cbs, Some(IoInterface::from_arc(&handler)), err);
                }
                Sel::Event(HandlerEvent::Closed { err, .. }) => {
                    let iface = IoInterface::from_arc(&handler);
                    // a locally requested close is reported by the
                    // shutdown notification alone
                    if !matches!(err, LongeronError::ConnectionClosedLocally) {
                        notify_error(&this.cbs, Some(iface.clone()), err.clone());
                    }
                    notify_state(&this.cbs, iface, 0, false);
                    final_err = err;
                    break;
                }
                Sel::Stop => {
                    handler.initiate_stop(LongeronError::ConnectionClosedLocally);
                    // the Closed event completes the shutdown
                }
                Sel::Dead => break,
            }
        }

        this.base.stop();
        this.handler.lock().take();
        let iface = IoInterface::from_arc(&handler);
        drop(handler);
        debug!("udp entity stopped: {final_err}");
        this.base
            .call_shutdown_change_cb(Some(iface), final_err, 0);
        *this.cbs.lock() = None;
        *this.ctl_tx.lock() = None;
    }
}
