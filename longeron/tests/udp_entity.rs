//! UDP entity flows: unicast sender/receiver, send_to echo, datagram
//! size limits, multicast group reception.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use longeron::hub::NetHub;
use longeron::{LongeronError, UdpConfig, UdpIoInterface};

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

/// Non-asserting variant for environment-dependent flows.
async fn wait_for_or_give_up(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while !cond() {
        if start.elapsed() > timeout {
            return false;
        }
        compio::time::sleep(Duration::from_millis(5)).await;
    }
    true
}

fn capture_iface(
    slot: &Arc<Mutex<Option<UdpIoInterface>>>,
    send_only: bool,
) -> impl FnMut(UdpIoInterface, usize, bool) + Send + 'static {
    let slot = Arc::clone(slot);
    move |io, _total, opened| {
        if opened {
            if send_only {
                io.start_io_send_only().unwrap();
            }
            *slot.lock() = Some(io);
        }
    }
}

#[compio::test]
async fn unicast_sender_to_receiver() {
    let hub = NetHub::new();

    let received: Arc<Mutex<Vec<Bytes>>> = Arc::new(Mutex::new(Vec::new()));
    let receiver = hub.make_udp_entity(UdpConfig::bound("127.0.0.1:0".parse().unwrap()));
    let msgs = Arc::clone(&received);
    receiver
        .start(
            move |io, _total, opened| {
                if opened {
                    let msgs = Arc::clone(&msgs);
                    io.start_io(move |msg, _out, _from| {
                        msgs.lock().push(msg);
                        true
                    })
                    .unwrap();
                }
            },
            |_io, _err| {},
        )
        .unwrap();
    let recv_addr = receiver.local_addr().unwrap();

    let sender_io: Arc<Mutex<Option<UdpIoInterface>>> = Arc::new(Mutex::new(None));
    let sender = hub
        .make_udp_entity(UdpConfig::sender().with_default_remote(recv_addr));
    sender
        .start(capture_iface(&sender_io, true), |_io, _err| {})
        .unwrap();

    let io_slot = Arc::clone(&sender_io);
    wait_for("sender open", move || io_slot.lock().is_some()).await;
    let io = sender_io.lock().clone().unwrap();

    for i in 0..10u32 {
        io.send(Bytes::from(format!("dgram-{i}"))).unwrap();
    }

    let msgs = Arc::clone(&received);
    wait_for("10 datagrams", move || msgs.lock().len() == 10).await;
    let received = received.lock();
    for (i, msg) in received.iter().enumerate() {
        assert_eq!(&msg[..], format!("dgram-{i}").as_bytes());
    }

    sender.stop().unwrap();
    receiver.stop().unwrap();
}

#[compio::test]
async fn send_to_echo_round_trip() {
    let hub = NetHub::new();

    // echo side replies to whoever sent the datagram
    let echo = hub.make_udp_entity(UdpConfig::bound("127.0.0.1:0".parse().unwrap()));
    echo.start(
        |io, _total, opened| {
            if opened {
                io.start_io(|msg, out, from| {
                    let _ = out.send_to(msg, from);
                    true
                })
                .unwrap();
            }
        },
        |_io, _err| {},
    )
    .unwrap();
    let echo_addr = echo.local_addr().unwrap();

    let got: Arc<Mutex<Vec<Bytes>>> = Arc::new(Mutex::new(Vec::new()));
    let client = hub.make_udp_entity(UdpConfig::bound("127.0.0.1:0".parse().unwrap()));
    let client_io: Arc<Mutex<Option<UdpIoInterface>>> = Arc::new(Mutex::new(None));
    let msgs = Arc::clone(&got);
    let slot = Arc::clone(&client_io);
    client
        .start(
            move |io, _total, opened| {
                if opened {
                    let msgs = Arc::clone(&msgs);
                    io.start_io(move |msg, _out, _from| {
                        msgs.lock().push(msg);
                        true
                    })
                    .unwrap();
                    *slot.lock() = Some(io);
                }
            },
            |_io, _err| {},
        )
        .unwrap();

    let slot = Arc::clone(&client_io);
    wait_for("client open", move || slot.lock().is_some()).await;
    let io = client_io.lock().clone().unwrap();
    io.send_to(&b"ping"[..], echo_addr).unwrap();

    let msgs = Arc::clone(&got);
    wait_for("echo reply", move || !msgs.lock().is_empty()).await;
    assert_eq!(&got.lock()[0][..], b"ping");

    // no default remote: a plain send has nowhere to go
    assert!(io.send(&b"nowhere"[..]).is_err());

    hub.stop_all();
}

#[compio::test]
async fn oversized_datagram_is_rejected() {
    let hub = NetHub::new();
    let sender_io: Arc<Mutex<Option<UdpIoInterface>>> = Arc::new(Mutex::new(None));
    let sender = hub.make_udp_entity(
        UdpConfig::sender()
            .with_default_remote("127.0.0.1:9".parse().unwrap())
            .with_max_datagram_size(512),
    );
    sender
        .start(capture_iface(&sender_io, true), |_io, _err| {})
        .unwrap();

    let slot = Arc::clone(&sender_io);
    wait_for("sender open", move || slot.lock().is_some()).await;
    let io = sender_io.lock().clone().unwrap();

    let res = io.send(Bytes::from(vec![0u8; 513]));
    assert!(matches!(
        res,
        Err(LongeronError::UdpMaxBufSizeExceeded { size: 513, max: 512 })
    ));
    io.send(Bytes::from(vec![0u8; 512])).unwrap();

    sender.stop().unwrap();
}

#[compio::test]
async fn multicast_two_senders_preserve_per_sender_order() {
    const GROUP: &str = "239.0.0.1";
    const PER_SENDER: usize = 10;

    let hub = NetHub::new();
    let received: Arc<Mutex<Vec<Bytes>>> = Arc::new(Mutex::new(Vec::new()));
    let receiver = hub.make_udp_entity(
        UdpConfig::bound("0.0.0.0:0".parse().unwrap())
            .with_multicast_group(GROUP.parse().unwrap()),
    );
    let msgs = Arc::clone(&received);
    receiver
        .start(
            move |io, _total, opened| {
                if opened {
                    let msgs = Arc::clone(&msgs);
                    io.start_io(move |msg, _out, _from| {
                        msgs.lock().push(msg);
                        true
                    })
                    .unwrap();
                }
            },
            |_io, _err| {},
        )
        .unwrap();
    let group_addr: SocketAddr =
        format!("{GROUP}:{}", receiver.local_addr().unwrap().port())
            .parse()
            .unwrap();

    let mut senders = Vec::new();
    for tag in ["a", "b"] {
        let sender_io: Arc<Mutex<Option<UdpIoInterface>>> = Arc::new(Mutex::new(None));
        let sender =
            hub.make_udp_entity(UdpConfig::sender().with_default_remote(group_addr));
        sender
            .start(capture_iface(&sender_io, true), |_io, _err| {})
            .unwrap();
        let slot = Arc::clone(&sender_io);
        wait_for("sender open", move || slot.lock().is_some()).await;
        let io = sender_io.lock().clone().unwrap();
        for i in 0..PER_SENDER {
            io.send(Bytes::from(format!("{tag}-{i}"))).unwrap();
        }
        senders.push(sender);
    }

    // multicast needs a route even on loopback; skip quietly where the
    // environment provides none
    let msgs = Arc::clone(&received);
    let delivered = wait_for_or_give_up(Duration::from_secs(3), move || {
        msgs.lock().len() >= 2 * PER_SENDER
    })
    .await;
    if !delivered && received.lock().is_empty() {
        eprintln!("skipping multicast assertions: no datagrams delivered");
        hub.stop_all();
        return;
    }
    assert!(delivered, "partial multicast delivery");

    let received = received.lock();
    assert_eq!(received.len(), 2 * PER_SENDER);
    for tag in ["a", "b"] {
        let indices: Vec<usize> = received
            .iter()
            .filter_map(|m| {
                let s = std::str::from_utf8(m).ok()?;
                s.strip_prefix(&format!("{tag}-"))?.parse().ok()
            })
            .collect();
        assert_eq!(indices.len(), PER_SENDER, "all datagrams from {tag}");
        assert!(
            indices.windows(2).all(|w| w[0] < w[1]),
            "per-sender order for {tag}"
        );
    }

    hub.stop_all();
}
