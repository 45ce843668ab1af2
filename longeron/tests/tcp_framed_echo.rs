//! Framed TCP round trip between an acceptor and a connector on
//! separate runtimes, 2-byte big-endian length prefix framing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;

use longeron::hub::NetHub;
use longeron::{
    AcceptorConfig, ConnectorConfig, LongeronError, TcpAcceptorEntity, WaitQueue,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Ev {
    Open,
    Close,
    Err(&'static str),
}

fn kind(err: &LongeronError) -> &'static str {
    match err {
        LongeronError::MessageHandlerTerminated => "handler-terminated",
        LongeronError::ConnectionClosedByPeer => "closed-by-peer",
        LongeronError::ConnectionClosedLocally => "closed-locally",
        _ => "other",
    }
}

/// Header declares the body length; ask for the rest of the frame.
fn length_prefix_framer(bytes: &[u8]) -> usize {
    if bytes.len() < 2 {
        return 2 - bytes.len();
    }
    let body = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    (2 + body).saturating_sub(bytes.len())
}

fn frame(body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + body.len());
    buf.put_u16(body.len() as u16);
    buf.put_slice(body);
    buf.freeze()
}

async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "timed out waiting for {what}"
        );
        compio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[test]
fn framed_echo_round_trip() {
    longeron::dev_tracing::init_tracing();

    const BODY: &[u8] = &[0x20, 0x21, 0x22, 0x23, 0x24];
    const COUNT: usize = 5;

    // handle and address cross to the client thread; received frames
    // cross back for the final assertions
    let handoff: Arc<WaitQueue<(SocketAddr, TcpAcceptorEntity)>> = Arc::new(WaitQueue::new());
    let server_msgs: Arc<WaitQueue<Bytes>> = Arc::new(WaitQueue::new());
    let server_events: Arc<Mutex<Vec<Ev>>> = Arc::new(Mutex::new(Vec::new()));

    let server = {
        let handoff = Arc::clone(&handoff);
        let server_msgs = Arc::clone(&server_msgs);
        let server_events = Arc::clone(&server_events);
        thread::spawn(move || {
            compio::runtime::Runtime::new().unwrap().block_on(async {
                let hub = NetHub::new();
                let acceptor =
                    hub.make_tcp_acceptor(AcceptorConfig::new("127.0.0.1:0".parse().unwrap()));

                let events = Arc::clone(&server_events);
                let msgs = Arc::clone(&server_msgs);
                acceptor
                    .start(
                        move |io, _total, opened| {
                            events.lock().push(if opened { Ev::Open } else { Ev::Close });
                            if opened {
                                let msgs = Arc::clone(&msgs);
                                io.start_io(2, length_prefix_framer, move |msg, out, _from| {
                                    let body_empty = msg.len() <= 2;
                                    msgs.push(msg.clone());
                                    // echo the full frame back
                                    let _ = out.send(msg);
                                    !body_empty
                                })
                                .unwrap();
                            }
                        },
                        {
                            let events = Arc::clone(&server_events);
                            move |_io, err| events.lock().push(Ev::Err(kind(&err)))
                        },
                    )
                    .unwrap();

                let addr = acceptor.local_addr().unwrap();
                assert!(handoff.push((addr, acceptor.clone())));

                // the client thread stops us; run until the shutdown
                // notification lands
                let events = Arc::clone(&server_events);
                wait_for("acceptor shutdown", move || {
                    events.lock().last() == Some(&Ev::Err("closed-locally"))
                })
                .await;
            });
        })
    };

    let (server_addr, acceptor_handle) = handoff.wait_and_pop().unwrap();

    let client_events: Arc<Mutex<Vec<Ev>>> = Arc::new(Mutex::new(Vec::new()));
    let client_msgs: Arc<Mutex<Vec<Bytes>>> = Arc::new(Mutex::new(Vec::new()));

    compio::runtime::Runtime::new().unwrap().block_on(async {
        let hub = NetHub::new();
        let connector = hub.make_tcp_connector(ConnectorConfig::new(server_addr));

        let events = Arc::clone(&client_events);
        let msgs = Arc::clone(&client_msgs);
        connector
            .start(
                move |io, _total, opened| {
                    events.lock().push(if opened { Ev::Open } else { Ev::Close });
                    if !opened {
                        return;
                    }
                    let msgs = Arc::clone(&msgs);
                    io.start_io(2, length_prefix_framer, move |msg, out, _from| {
                        let body = msg.slice(2..);
                        let echoes = {
                            let mut msgs = msgs.lock();
                            msgs.push(msg.clone());
                            msgs.len()
                        };
                        if echoes == COUNT {
                            // all echoes back; ask both sides to wind down
                            let _ = out.send(frame(&[]));
                        }
                        !body.is_empty()
                    })
                    .unwrap();
                    for _ in 0..COUNT {
                        io.send(frame(BODY)).unwrap();
                    }
                },
                {
                    let events = Arc::clone(&client_events);
                    move |_io, err| events.lock().push(Ev::Err(kind(&err)))
                },
            )
            .unwrap();

        let events = Arc::clone(&client_events);
        wait_for("connector shutdown", move || {
            let ev = events.lock();
            ev.contains(&Ev::Close) && ev.last() == Some(&Ev::Err("handler-terminated"))
        })
        .await;

        // cross-thread stop of the acceptor through its weak handle
        acceptor_handle.stop().unwrap();
    });

    server.join().unwrap();

    // all echoes arrived, in order and byte-identical
    {
        let client_msgs = client_msgs.lock();
        assert_eq!(client_msgs.len(), COUNT + 1);
        for msg in client_msgs.iter().take(COUNT) {
            assert_eq!(&msg[..], &frame(BODY)[..]);
        }
        assert_eq!(&client_msgs[COUNT][..], &frame(&[])[..]);
    }

    // connector's exact sequence: open, handler termination reported,
    // close, then exactly one shutdown notification, in that order
    assert_eq!(
        client_events.lock().as_slice(),
        &[
            Ev::Open,
            Ev::Err("handler-terminated"),
            Ev::Close,
            Ev::Err("handler-terminated"),
        ]
    );

    // server saw six frames: five bodies plus the empty one
    let mut server_seen = Vec::new();
    while let Some(m) = server_msgs.try_pop() {
        server_seen.push(m);
    }
    assert_eq!(server_seen.len(), COUNT + 1);
    for msg in server_seen.iter().take(COUNT) {
        assert_eq!(&msg[..], &frame(BODY)[..]);
    }
    assert_eq!(&server_seen[COUNT][..], &frame(&[])[..]);

    // acceptor: one open, termination report, one close, exactly one
    // shutdown notification at the end
    let ev = server_events.lock();
    assert_eq!(ev.first(), Some(&Ev::Open));
    assert!(ev.contains(&Ev::Err("handler-terminated")));
    assert_eq!(ev.iter().filter(|e| **e == Ev::Close).count(), 1);
    assert_eq!(
        ev.iter()
            .filter(|e| **e == Ev::Err("closed-locally"))
            .count(),
        1
    );
    assert_eq!(ev.last(), Some(&Ev::Err("closed-locally")));
}
