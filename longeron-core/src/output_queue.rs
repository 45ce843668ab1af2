//! Outgoing-data FIFO with byte accounting.
//!
//! Plain queue of `(buffer, optional destination)` pairs. The
//! destination is present only for UDP elements with per-datagram
//! targets; TCP elements carry `None`. Not thread-safe on its own;
//! [`IoBase`](crate::io_base::IoBase) serializes access under its lock.

use std::collections::VecDeque;
use std::net::SocketAddr;

use bytes::Bytes;

/// One queued outgoing element.
pub type QueuedElement = (Bytes, Option<SocketAddr>);

/// Snapshot of queue depth, taken under the owning lock.
///
/// `bytes_in_output_queue` equals the sum of the queued buffer sizes,
/// which gives applications backpressure visibility without walking
/// the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutQueueStats {
    pub output_queue_size: usize,
    pub bytes_in_output_queue: usize,
}

/// FIFO of outgoing buffers with O(1) push, pop, and counters.
#[derive(Debug, Default)]
pub struct OutQueue {
    elements: VecDeque<QueuedElement>,
    queued_bytes: usize,
}

impl OutQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, buf: Bytes, endpoint: Option<SocketAddr>) {
        self.queued_bytes += buf.len();
        self.elements.push_back((buf, endpoint));
    }

    pub fn pop_front(&mut self) -> Option<QueuedElement> {
        let elem = self.elements.pop_front();
        if let Some((buf, _)) = &elem {
            self.queued_bytes -= buf.len();
        }
        elem
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> OutQueueStats {
        OutQueueStats {
            output_queue_size: self.elements.len(),
            bytes_in_output_queue: self.queued_bytes,
        }
    }
}
