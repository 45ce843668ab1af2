//! Shared start/stop state for TCP acceptor, TCP connector, and UDP
//! net entities.
//!
//! `start` and `stop` may race from multiple threads; both directions
//! are single-winner compare-and-set, and the shutdown callback is
//! installed only by the winning `start`. The callback is consumed by
//! `call_shutdown_change_cb`, so the terminal notification fires at
//! most once per entity lifetime no matter how shutdown was initiated.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::LongeronError;

/// Terminal shutdown notification: the last I/O interface (if any),
/// the final error, and the number of handlers still owned.
pub type ShutdownChangeCb<T> = Box<dyn FnMut(T, LongeronError, usize) + Send>;

/// Shared lifecycle state for one net entity.
pub struct EntityBase<T> {
    started: AtomicBool,
    shutdown_cb: Mutex<Option<ShutdownChangeCb<T>>>,
}

impl<T> Default for EntityBase<T> {
    fn default() -> Self {
        Self {
            started: AtomicBool::new(false),
            shutdown_cb: Mutex::new(None),
        }
    }
}

impl<T> EntityBase<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Safe to call from any thread.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Transition to started and install the shutdown callback.
    ///
    /// Returns false if another caller already started the entity; the
    /// losing callback is dropped without overwriting the winner's.
    pub fn start<F>(&self, shutdown_cb: F) -> bool
    where
        F: FnMut(T, LongeronError, usize) + Send + 'static,
    {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            *self.shutdown_cb.lock() = Some(Box::new(shutdown_cb));
            true
        } else {
            false
        }
    }

    /// Transition to stopped.
    ///
    /// Returns false if the entity was not started. Does not invoke
    /// the shutdown callback; the concrete entity decides when the
    /// terminal notification is reported.
    pub fn stop(&self) -> bool {
        self.started
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Deliver the terminal notification, at most once.
    pub fn call_shutdown_change_cb(&self, io: T, err: LongeronError, remaining: usize) {
        let cb = self.shutdown_cb.lock().take();
        if let Some(mut cb) = cb {
            cb(io, err, remaining);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn start_stop_single_winner() {
        let base: EntityBase<()> = EntityBase::new();
        assert!(!base.is_started());
        assert!(base.start(|_, _, _| {}));
        assert!(base.is_started());
        assert!(!base.start(|_, _, _| {}));

        assert!(base.stop());
        assert!(!base.is_started());
        assert!(!base.stop());
    }

    #[test]
    fn losing_start_does_not_replace_the_callback() {
        let base: EntityBase<()> = EntityBase::new();
        let winner_calls = Arc::new(AtomicUsize::new(0));
        let loser_calls = Arc::new(AtomicUsize::new(0));

        let w = Arc::clone(&winner_calls);
        assert!(base.start(move |_, _, _| {
            w.fetch_add(1, Ordering::SeqCst);
        }));
        let l = Arc::clone(&loser_calls);
        assert!(!base.start(move |_, _, _| {
            l.fetch_add(1, Ordering::SeqCst);
        }));

        base.call_shutdown_change_cb((), LongeronError::ConnectionClosedLocally, 0);
        assert_eq!(winner_calls.load(Ordering::SeqCst), 1);
        assert_eq!(loser_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn shutdown_cb_fires_at_most_once() {
        let base: EntityBase<u32> = EntityBase::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        assert!(base.start(move |io, _, remaining| {
            assert_eq!(io, 7);
            assert_eq!(remaining, 0);
            c.fetch_add(1, Ordering::SeqCst);
        }));

        base.call_shutdown_change_cb(7, LongeronError::ConnectionClosedByPeer, 0);
        base.call_shutdown_change_cb(7, LongeronError::ConnectionClosedByPeer, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_starts_have_one_winner() {
        let base: Arc<EntityBase<()>> = Arc::new(EntityBase::new());
        let wins = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let base = Arc::clone(&base);
                let wins = Arc::clone(&wins);
                std::thread::spawn(move || {
                    if base.start(|_, _, _| {}) {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert!(base.is_started());
    }
}
