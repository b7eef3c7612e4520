//! Outbound send queue
//!
//! Ordered byte buffer shared between producer threads and the single
//! consumer (the connection thread). The buffer and its "ready" signal
//! live under one lock so append, drain, and signal reset form one atomic
//! group.
//!
//! Ordering: bytes are delivered in append order. When a non-blocking
//! write cannot complete, the consumer re-prepends the unwritten remainder
//! at the front; bytes appended *during* that failed-write window may
//! interleave with the remainder. Embedders that need a stricter guarantee
//! must serialize their producers.

use parking_lot::Mutex;

struct Inner {
    buf: Vec<u8>,
    ready: bool,
}

/// Multi-producer, single-consumer byte queue with a ready signal.
pub struct SendQueue {
    inner: Mutex<Inner>,
}

impl SendQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                buf: Vec::new(),
                ready: false,
            }),
        }
    }

    /// Append bytes and raise the ready signal. Callable from any thread,
    /// including re-entrantly from the consumer's own send path.
    pub fn enqueue(&self, data: &[u8]) {
        let mut inner = self.inner.lock();
        inner.buf.extend_from_slice(data);
        inner.ready = true;
    }

    /// Atomically take and clear the buffered contents.
    pub fn drain_all(&self) -> Vec<u8> {
        let mut inner = self.inner.lock();
        std::mem::take(&mut inner.buf)
    }

    /// Re-insert an unwritten remainder at the *front* of the queue so
    /// delivery order is preserved for bytes appended before the failed
    /// write. Raises the ready signal.
    pub fn requeue_front(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        inner.buf.splice(0..0, data.iter().copied());
        inner.ready = true;
    }

    /// Clear the ready signal, but only while the buffer is actually
    /// empty. A producer that appended between the drain and this call
    /// keeps the signal raised.
    pub fn reset_if_idle(&self) {
        let mut inner = self.inner.lock();
        if inner.buf.is_empty() {
            inner.ready = false;
        }
    }

    /// Raise or clear the ready signal without touching the buffer. Used
    /// to wake the consumer for out-of-band work such as a pending
    /// terminal resize.
    pub fn set_ready(&self, ready: bool) {
        self.inner.lock().ready = ready;
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lock().ready
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().buf.len()
    }
}

impl Default for SendQueue {
    fn default() -> Self {
        Self::new()
    }
}
