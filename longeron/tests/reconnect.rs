//! Connector reconnection across an acceptor restart.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use longeron::hub::NetHub;
use longeron::{AcceptorConfig, Backoff, ConnectorConfig, LongeronError};

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

fn quiet_acceptor(hub: &NetHub, cfg: AcceptorConfig) -> longeron::TcpAcceptorEntity {
    let acceptor = hub.make_tcp_acceptor(cfg);
    acceptor
        .start(
            |io, _total, opened| {
                if opened {
                    io.start_io_fixed(1, |_msg, _out, _from| true).unwrap();
                }
            },
            |_io, _err| {},
        )
        .unwrap();
    acceptor
}

#[compio::test]
async fn connector_reattaches_after_acceptor_restart() {
    longeron::dev_tracing::init_tracing();
    let hub = NetHub::new();

    let first = quiet_acceptor(
        &hub,
        AcceptorConfig::new("127.0.0.1:0".parse().unwrap()),
    );
    let addr = first.local_addr().unwrap();

    let opens = Arc::new(AtomicUsize::new(0));
    let closes = Arc::new(AtomicUsize::new(0));
    let shutdowns = Arc::new(AtomicUsize::new(0));

    let connector = hub.make_tcp_connector(
        ConnectorConfig::new(addr)
            .with_reconnect(Backoff::fixed(Duration::from_millis(100))),
    );
    let o = Arc::clone(&opens);
    let c = Arc::clone(&closes);
    let s = Arc::clone(&shutdowns);
    connector
        .start(
            move |io, _total, opened| {
                if opened {
                    o.fetch_add(1, Ordering::SeqCst);
                    io.start_io_fixed(1, |_msg, _out, _from| true).unwrap();
                } else {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            },
            move |_io, err| {
                // with reconnect enabled the only local-close error is
                // the final shutdown notification
                if matches!(err, LongeronError::ConnectionClosedLocally) {
                    s.fetch_add(1, Ordering::SeqCst);
                }
            },
        )
        .unwrap();

    let o = Arc::clone(&opens);
    wait_for("first connection", move || o.load(Ordering::SeqCst) == 1).await;

    // kill the listening side; the connector observes the close and
    // starts retrying on its 100 ms backoff
    first.stop().unwrap();
    let c = Arc::clone(&closes);
    wait_for("connection loss", move || c.load(Ordering::SeqCst) == 1).await;

    // restart on the same endpoint; no application restart of the
    // connector is required
    let second = quiet_acceptor(
        &hub,
        AcceptorConfig::new(addr).with_reuse_address(true),
    );
    let o = Arc::clone(&opens);
    wait_for("reconnection", move || o.load(Ordering::SeqCst) == 2).await;
    assert_eq!(shutdowns.load(Ordering::SeqCst), 0);

    connector.stop().unwrap();
    let s = Arc::clone(&shutdowns);
    wait_for("connector shutdown", move || s.load(Ordering::SeqCst) >= 1).await;
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 2);

    second.stop().unwrap();
}
