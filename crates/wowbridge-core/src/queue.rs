//! Cross-thread hand-off between the IPC thread and the render thread.
//!
//! Two FIFOs behind one mutex: requests flow IPC → render, response strings
//! flow render → IPC. The render-thread critical section is a single
//! `mem::take`, so the lock is held for well under a microsecond per frame.

use std::collections::VecDeque;
use std::mem;

use parking_lot::Mutex;

use crate::protocol::Request;

/// Requests queued beyond this while the render thread is stalled (host
/// minimized, loading screen) are rejected with `ERROR:Overloaded` instead
/// of growing without bound.
pub const REQUEST_QUEUE_LIMIT: usize = 256;

#[derive(Default)]
struct Inner {
    requests: VecDeque<Request>,
    responses: VecDeque<String>,
}

/// The bridge's shared queue pair. Created once at init, drained at
/// shutdown, never reallocated.
#[derive(Default)]
pub struct BridgeQueues {
    inner: Mutex<Inner>,
}

impl BridgeQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a request for the render thread. Returns `false` when the
    /// queue is at capacity; the caller answers the client directly.
    pub fn push_request(&self, req: Request) -> bool {
        let mut inner = self.inner.lock();
        if inner.requests.len() >= REQUEST_QUEUE_LIMIT {
            return false;
        }
        inner.requests.push_back(req);
        true
    }

    /// Take every pending request at once, preserving enqueue order.
    pub fn drain_requests(&self) -> Vec<Request> {
        let drained = mem::take(&mut self.inner.lock().requests);
        drained.into()
    }

    pub fn push_response(&self, response: String) {
        self.inner.lock().responses.push_back(response);
    }

    /// Batch push, one lock acquisition for a whole frame's worth.
    pub fn extend_responses(&self, batch: impl IntoIterator<Item = String>) {
        self.inner.lock().responses.extend(batch);
    }

    pub fn pop_response(&self) -> Option<String> {
        self.inner.lock().responses.pop_front()
    }

    /// Drop everything on both sides; shutdown only.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.requests.clear();
        inner.responses.clear();
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.lock().requests.len()
    }
}
