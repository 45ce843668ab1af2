//! Per-connection I/O state shared by the TCP and UDP handlers.
//!
//! Two pieces of state live here: the `io_started` flag, flipped with
//! single-winner compare-and-set in each direction, and the write
//! state (`write_in_progress` + output queue) guarded by one mutex.
//!
//! The two-state write design guarantees that the write completion
//! path and the application-side enqueue path cannot both believe a
//! write must be initiated: exactly one of them observes an empty
//! queue with `write_in_progress == false` at any time.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::output_queue::{OutQueue, OutQueueStats, QueuedElement};

#[derive(Debug, Default)]
struct WriteState {
    write_in_progress: bool,
    queue: OutQueue,
}

/// Shared start/write state for one I/O handler.
#[derive(Debug, Default)]
pub struct IoBase {
    io_started: AtomicBool,
    state: Mutex<WriteState>,
}

impl IoBase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition `io_started` false → true.
    ///
    /// Returns false if the handler was already started.
    pub fn set_io_started(&self) -> bool {
        self.io_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Transition `io_started` true → false.
    ///
    /// Returns false if the handler was already stopped. The winner of
    /// this transition owns the teardown path.
    pub fn set_io_stopped(&self) -> bool {
        self.io_started
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[must_use]
    pub fn is_io_started(&self) -> bool {
        self.io_started.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_write_in_progress(&self) -> bool {
        self.state.lock().write_in_progress
    }

    /// Stage an outgoing buffer.
    ///
    /// Returns true when no write was outstanding: `write_in_progress`
    /// is now set, nothing was queued, and the caller must start the
    /// write itself. Returns false when a write was already in flight
    /// (the element was appended to the queue and the in-flight chain
    /// will pick it up) or when the handler is not started.
    pub fn start_write_setup(&self, buf: &Bytes, endpoint: Option<SocketAddr>) -> bool {
        if !self.is_io_started() {
            return false;
        }
        let mut state = self.state.lock();
        if state.write_in_progress {
            state.queue.push_back(buf.clone(), endpoint);
            false
        } else {
            state.write_in_progress = true;
            true
        }
    }

    /// Fetch the next queued element after a write completes.
    ///
    /// Empty result means the chain is done: `write_in_progress` is
    /// cleared under the same lock, so a racing `start_write_setup`
    /// either queued behind the element we return here or wins the
    /// next chain itself.
    pub fn get_next_element(&self) -> Option<QueuedElement> {
        let mut state = self.state.lock();
        let elem = state.queue.pop_front();
        if elem.is_none() {
            state.write_in_progress = false;
        }
        elem
    }

    #[must_use]
    pub fn get_output_queue_stats(&self) -> OutQueueStats {
        self.state.lock().queue.stats()
    }
}
