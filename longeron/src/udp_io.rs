//! UDP socket handler: one datagram per message, no framing.
//!
//! A single `UdpIo` lives for the lifetime of its entity. Each posted
//! receive delivers exactly one datagram to the message handler. The
//! write pump mirrors the TCP one, except every element carries a
//! destination: the explicit endpoint of `send_to`, or the entity's
//! configured default remote.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use compio::buf::BufResult;
use compio::net::UdpSocket;
use flume::{Receiver, Sender};
use futures::{pin_mut, select, FutureExt};
use parking_lot::Mutex;
use tracing::{debug, trace};

use longeron_core::error::{LongeronError, Result};
use longeron_core::io_base::IoBase;
use longeron_core::output_queue::OutQueueStats;

use crate::common::{is_transient_udp_error, HandlerEvent, MsgHandler, WriteCmd};
use crate::interface::IoOutput;

struct ArmState {
    armed: bool,
    write_rx: Option<Receiver<WriteCmd>>,
    read_stop_rx: Option<Receiver<()>>,
}

/// Handler for one UDP socket.
pub struct UdpIo {
    id: u64,
    socket: UdpSocket,
    default_remote: Option<SocketAddr>,
    max_datagram_size: usize,
    base: IoBase,
    write_tx: Sender<WriteCmd>,
    read_stop_tx: Sender<()>,
    ev_tx: Sender<HandlerEvent>,
    arm: Mutex<ArmState>,
    close_err: Mutex<Option<LongeronError>>,
}

impl UdpIo {
    pub(crate) fn new(
        id: u64,
        socket: UdpSocket,
        default_remote: Option<SocketAddr>,
        max_datagram_size: usize,
        ev_tx: Sender<HandlerEvent>,
    ) -> Arc<Self> {
        let (write_tx, write_rx) = flume::unbounded();
        let (read_stop_tx, read_stop_rx) = flume::unbounded();
        Arc::new(Self {
            id,
            socket,
            default_remote,
            max_datagram_size: max_datagram_size.max(1),
            base: IoBase::new(),
            write_tx,
            read_stop_tx,
            ev_tx,
            arm: Mutex::new(ArmState {
                armed: false,
                write_rx: Some(write_rx),
                read_stop_rx: Some(read_stop_rx),
            }),
            close_err: Mutex::new(None),
        })
    }

    /// Called by the owning entity when it takes ownership.
    pub(crate) fn admit(&self) -> bool {
        self.base.set_io_started()
    }

    /// Arm the pumps; `handler == None` makes this a send-only socket
    /// with no receive posted.
    pub(crate) fn start_io(this: &Arc<Self>, handler: Option<MsgHandler<UdpIo>>) -> Result<()> {
        let mut arm = this.arm.lock();
        if !this.base.is_io_started() {
            return Err(LongeronError::IoHandlerNotStarted);
        }
        if arm.armed {
            return Err(LongeronError::IoHandlerAlreadyStarted);
        }
        let (Some(write_rx), Some(read_stop_rx)) = (arm.write_rx.take(), arm.read_stop_rx.take())
        else {
            return Err(LongeronError::IoHandlerAlreadyStarted);
        };
        arm.armed = true;
        drop(arm);

        let io = Arc::clone(this);
        compio::runtime::spawn(run_io(io, write_rx, read_stop_rx, handler)).detach();
        Ok(())
    }

    pub(crate) fn send(&self, buf: Bytes, dest: Option<SocketAddr>) -> Result<()> {
        if !self.base.is_io_started() {
            return Err(LongeronError::IoHandlerNotStarted);
        }
        if buf.len() > self.max_datagram_size {
            return Err(LongeronError::UdpMaxBufSizeExceeded {
                size: buf.len(),
                max: self.max_datagram_size,
            });
        }
        let Some(dest) = dest.or(self.default_remote) else {
            return Err(LongeronError::UnexpectedNetworkError(
                "send without a destination endpoint".into(),
            ));
        };
        if self.base.start_write_setup(&buf, Some(dest)) {
            self.write_tx
                .send(WriteCmd::Write(buf, Some(dest)))
                .map_err(|_| LongeronError::ConnectionClosedLocally)?;
        }
        Ok(())
    }

    pub(crate) fn stop_io(&self) -> Result<()> {
        if !self.base.is_io_started() {
            return Err(LongeronError::IoHandlerNotStarted);
        }
        self.initiate_stop(LongeronError::ConnectionClosedLocally);
        Ok(())
    }

    pub(crate) fn initiate_stop(&self, err: LongeronError) {
        if !self.base.set_io_stopped() {
            return;
        }
        debug!("udp handler {} stopping: {err}", self.id);
        *self.close_err.lock() = Some(err.clone());
        let _ = self.write_tx.send(WriteCmd::Stop);
        let _ = self.read_stop_tx.send(());
        let armed = self.arm.lock().armed;
        if !armed {
            let _ = self.ev_tx.send(HandlerEvent::Closed { id: self.id, err });
        }
    }

    pub(crate) fn is_io_started(&self) -> bool {
        self.base.is_io_started()
    }

    pub(crate) fn output_queue_stats(&self) -> OutQueueStats {
        self.base.get_output_queue_stats()
    }

    pub(crate) fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(Into::into)
    }
}

async fn run_io(
    io: Arc<UdpIo>,
    write_rx: Receiver<WriteCmd>,
    read_stop_rx: Receiver<()>,
    handler: Option<MsgHandler<UdpIo>>,
) {
    let writer = compio::runtime::spawn(write_pump(Arc::clone(&io), write_rx));
    let reason = match handler {
        Some(handler) => read_pump(&io, read_stop_rx, handler).await,
        // send-only: nothing to read, wait for the stop signal
        None => {
            let _ = read_stop_rx.recv_async().await;
            LongeronError::ConnectionClosedLocally
        }
    };
    io.initiate_stop(reason);
    let _ = writer.await;

    let err = io
        .close_err
        .lock()
        .clone()
        .unwrap_or(LongeronError::ConnectionClosedLocally);
    let _ = io.ev_tx.send(HandlerEvent::Closed { id: io.id, err });
}

async fn write_pump(io: Arc<UdpIo>, write_rx: Receiver<WriteCmd>) {
    while let Ok(cmd) = write_rx.recv_async().await {
        match cmd {
            WriteCmd::Write(buf, dest) => {
                let mut next = Some((buf, dest));
                while let Some((buf, dest)) = next {
                    // send() resolved the destination before queueing
                    let Some(dest) = dest else {
                        next = io.base.get_next_element();
                        continue;
                    };
                    trace!("udp handler {} sending {} bytes to {dest}", io.id, buf.len());
                    let BufResult(res, _) = io.socket.send_to(buf, dest).await;
                    match res {
                        Ok(_) => {}
                        Err(e) if is_transient_udp_error(&e) => {
                            let _ = io.ev_tx.send(HandlerEvent::Error {
                                id: io.id,
                                err: e.into(),
                            });
                        }
                        Err(e) => {
                            io.initiate_stop(e.into());
                            return;
                        }
                    }
                    if !io.base.is_io_started() {
                        return;
                    }
                    next = io.base.get_next_element();
                }
            }
            WriteCmd::Stop => return,
        }
    }
}

async fn read_pump(
    io: &Arc<UdpIo>,
    read_stop_rx: Receiver<()>,
    mut handler: MsgHandler<UdpIo>,
) -> LongeronError {
    let weak = Arc::downgrade(io);
    loop {
        let buf = BytesMut::with_capacity(io.max_datagram_size);
        let received = {
            let recv_fut = io.socket.recv_from(buf).fuse();
            pin_mut!(recv_fut);
            let stop_fut = read_stop_rx.recv_async().fuse();
            pin_mut!(stop_fut);
            select! {
                res = recv_fut => Some(res),
                _ = stop_fut => None,
            }
        };
        let Some(BufResult(res, buf)) = received else {
            return LongeronError::ConnectionClosedLocally;
        };
        match res {
            Ok((n, peer)) => {
                trace!("udp handler {} received {n} bytes from {peer}", io.id);
                let datagram = buf.freeze();
                let out = IoOutput::from_weak(weak.clone());
                if !handler(datagram, out, peer) {
                    return LongeronError::MessageHandlerTerminated;
                }
            }
            Err(e) if is_transient_udp_error(&e) => {
                let _ = io.ev_tx.send(HandlerEvent::Error {
                    id: io.id,
                    err: e.into(),
                });
            }
            Err(e) => return e.into(),
        }
    }
}
