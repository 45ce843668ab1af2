//! Multi-reader multi-writer wait queue for transferring data between
//! threads.
//!
//! Unbounded by default; a bounded variant rejects pushes while full.
//! Closing the queue wakes every waiting reader with an empty result,
//! and the closed flag shares the queue's mutex: once `close` returns,
//! no subsequent `push` can succeed.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

struct Inner<T> {
    queue: VecDeque<T>,
    closed: bool,
}

/// MPMC queue with blocking pop and close semantics.
pub struct WaitQueue<T> {
    inner: Mutex<Inner<T>>,
    cond: Condvar,
    capacity: Option<usize>,
}

impl<T> Default for WaitQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WaitQueue<T> {
    /// Create an unbounded queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                closed: false,
            }),
            cond: Condvar::new(),
            capacity: None,
        }
    }

    /// Create a bounded queue; `push` returns false while full.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            cond: Condvar::new(),
            capacity: Some(capacity),
        }
    }

    /// Push a value, notifying one waiting reader.
    ///
    /// Returns false if the queue is closed, or bounded and full.
    pub fn push(&self, val: T) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        if let Some(cap) = self.capacity {
            if inner.queue.len() >= cap {
                return false;
            }
        }
        inner.queue.push_back(val);
        drop(inner);
        self.cond.notify_one();
        true
    }

    /// Pop a value, blocking until one is available or the queue is
    /// closed. An empty result means the queue has been closed.
    pub fn wait_and_pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(val) = inner.queue.pop_front() {
                return Some(val);
            }
            if inner.closed {
                return None;
            }
            self.cond.wait(&mut inner);
        }
    }

    /// Pop a value if one is immediately available.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().queue.pop_front()
    }

    /// Close the queue. All waiting readers are notified; subsequent
    /// `push` calls return false.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        drop(inner);
        self.cond.notify_all();
    }

    /// Reopen a previously closed queue. The initial state is open.
    pub fn open(&self) {
        self.inner.lock().closed = false;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }
}
