//! TCP connection handler: framed read pump plus queued write pump.
//!
//! One `TcpIo` per accepted or established connection. The owning
//! entity admits the handler (flipping `io_started`) and the
//! application arms it with `start_io` from inside the state change
//! callback. Reads assemble exactly the byte count the framer asks
//! for; surplus bytes from a read are carried into the next message,
//! so the framer always judges one message's bytes.
//!
//! Writes follow the single-writer rule: `send` either wins the idle
//! write slot and kicks the pump with the buffer, or appends to the
//! output queue for the in-flight chain to drain.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use compio::buf::BufResult;
use compio::io::{AsyncRead, AsyncWriteExt};
use compio::net::TcpStream;
use flume::{Receiver, Sender};
use futures::{pin_mut, select, FutureExt};
use parking_lot::Mutex;
use tracing::{debug, trace};

use longeron_core::error::{LongeronError, Result};
use longeron_core::io_base::IoBase;
use longeron_core::output_queue::OutQueueStats;

use crate::common::{HandlerEvent, MsgFramer, MsgHandler, WriteCmd};
use crate::interface::IoOutput;

struct ArmState {
    armed: bool,
    write_rx: Option<Receiver<WriteCmd>>,
    read_stop_rx: Option<Receiver<()>>,
}

/// Handler for one TCP connection.
pub struct TcpIo {
    id: u64,
    stream: TcpStream,
    remote: SocketAddr,
    read_buffer_size: usize,
    max_message_size: usize,
    base: IoBase,
    write_tx: Sender<WriteCmd>,
    read_stop_tx: Sender<()>,
    ev_tx: Sender<HandlerEvent>,
    arm: Mutex<ArmState>,
    close_err: Mutex<Option<LongeronError>>,
}

impl TcpIo {
    pub(crate) fn new(
        id: u64,
        stream: TcpStream,
        remote: SocketAddr,
        read_buffer_size: usize,
        max_message_size: usize,
        ev_tx: Sender<HandlerEvent>,
    ) -> Arc<Self> {
        let (write_tx, write_rx) = flume::unbounded();
        let (read_stop_tx, read_stop_rx) = flume::unbounded();
        Arc::new(Self {
            id,
            stream,
            remote,
            read_buffer_size: read_buffer_size.max(1),
            max_message_size,
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

    pub(crate) fn start_io(
        this: &Arc<Self>,
        initial_read_size: usize,
        framer: MsgFramer,
        handler: MsgHandler<TcpIo>,
    ) -> Result<()> {
        let mut arm = this.arm.lock();
        // checked under the arm lock so a racing stop either beats us
        // here or observes armed == true
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
        compio::runtime::spawn(run_io(
            io,
            write_rx,
            read_stop_rx,
            initial_read_size,
            framer,
            handler,
        ))
        .detach();
        Ok(())
    }

    pub(crate) fn send(&self, buf: Bytes) -> Result<()> {
        if !self.base.is_io_started() {
            return Err(LongeronError::IoHandlerNotStarted);
        }
        if self.base.start_write_setup(&buf, None) {
            self.write_tx
                .send(WriteCmd::Write(buf, None))
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

    /// Winner of the `io_started` true→false transition owns teardown.
    /// Safe to call from any path; only the first call acts.
    pub(crate) fn initiate_stop(&self, err: LongeronError) {
        if !self.base.set_io_stopped() {
            return;
        }
        debug!("tcp handler {} stopping: {err}", self.id);
        *self.close_err.lock() = Some(err.clone());
        let _ = self.write_tx.send(WriteCmd::Stop);
        let _ = self.read_stop_tx.send(());
        let armed = self.arm.lock().armed;
        if !armed {
            // no pumps to report for us
            let _ = self.ev_tx.send(HandlerEvent::Closed { id: self.id, err });
        }
    }

    pub(crate) fn is_io_started(&self) -> bool {
        self.base.is_io_started()
    }

    pub(crate) fn output_queue_stats(&self) -> OutQueueStats {
        self.base.get_output_queue_stats()
    }

    pub(crate) fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}

async fn run_io(
    io: Arc<TcpIo>,
    write_rx: Receiver<WriteCmd>,
    read_stop_rx: Receiver<()>,
    initial_read_size: usize,
    framer: MsgFramer,
    handler: MsgHandler<TcpIo>,
) {
    let writer = compio::runtime::spawn(write_pump(Arc::clone(&io), write_rx));
    let reason = read_pump(&io, read_stop_rx, initial_read_size, framer, handler).await;
    io.initiate_stop(reason);
    let _ = writer.await;

    let err = io
        .close_err
        .lock()
        .clone()
        .unwrap_or(LongeronError::ConnectionClosedLocally);
    let _ = io.ev_tx.send(HandlerEvent::Closed { id: io.id, err });
}

async fn write_pump(io: Arc<TcpIo>, write_rx: Receiver<WriteCmd>) {
    while let Ok(cmd) = write_rx.recv_async().await {
        match cmd {
            WriteCmd::Write(buf, _) => {
                let mut next = Some(buf);
                while let Some(buf) = next {
                    trace!("tcp handler {} writing {} bytes", io.id, buf.len());
                    let mut writer = &io.stream;
                    let BufResult(res, _) = writer.write_all(buf).await;
                    if let Err(e) = res {
                        io.initiate_stop(e.into());
                        return;
                    }
                    if !io.base.is_io_started() {
                        // stopping: the in-flight element finished, drop the rest
                        return;
                    }
                    next = io.base.get_next_element().map(|(buf, _)| buf);
                }
            }
            WriteCmd::Stop => return,
        }
    }
}

async fn read_pump(
    io: &Arc<TcpIo>,
    read_stop_rx: Receiver<()>,
    initial_read_size: usize,
    framer: MsgFramer,
    mut handler: MsgHandler<TcpIo>,
) -> LongeronError {
    let initial = initial_read_size.max(1);
    let weak = Arc::downgrade(io);
    let mut target = initial;
    let mut msg = BytesMut::with_capacity(io.read_buffer_size);
    // bytes read past the current message boundary
    let mut carry = BytesMut::new();

    loop {
        while msg.len() < target {
            if !carry.is_empty() {
                let take = carry.len().min(target - msg.len());
                let part = carry.split_to(take);
                msg.extend_from_slice(&part);
                continue;
            }
            let chunk =
                BytesMut::with_capacity(io.read_buffer_size.max(target - msg.len()));
            let read = {
                let mut reader = &io.stream;
                let read_fut = reader.read(chunk).fuse();
                pin_mut!(read_fut);
                let stop_fut = read_stop_rx.recv_async().fuse();
                pin_mut!(stop_fut);
                select! {
                    res = read_fut => Some(res),
                    _ = stop_fut => None,
                }
            };
            let Some(BufResult(res, chunk)) = read else {
                return LongeronError::ConnectionClosedLocally;
            };
            match res {
                Ok(0) => {
                    trace!("tcp handler {} EOF", io.id);
                    return LongeronError::ConnectionClosedByPeer;
                }
                Ok(n) => {
                    trace!("tcp handler {} read {n} bytes", io.id);
                    carry = chunk;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return e.into(),
            }
        }

        match framer(&msg) {
            0 => {
                let complete = msg.split().freeze();
                target = initial;
                let out = IoOutput::from_weak(weak.clone());
                if !handler(complete, out, io.remote) {
                    return LongeronError::MessageHandlerTerminated;
                }
            }
            more => {
                let Some(new_target) = msg.len().checked_add(more) else {
                    return LongeronError::TcpFramerError("requested size overflow".into());
                };
                if new_target > io.max_message_size {
                    return LongeronError::TcpFramerError(format!(
                        "framer requested {new_target} bytes (max {})",
                        io.max_message_size
                    ));
                }
                target = new_target;
            }
        }
    }
}
