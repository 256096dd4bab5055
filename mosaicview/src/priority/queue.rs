//! Pending-request queue serviced by reader workers.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::trace;

use super::{ReadRequest, ReadRequestPrioritizer};

/// Priority queue of pending read requests.
///
/// Cancelled requests jump the queue: readers must observe a cancellation
/// promptly so they can retire the request without doing its I/O, and a
/// FIFO of cancelled ids is cheaper than keeping the live set sorted
/// through removals.
///
/// The live set is re-sorted lazily. Pushes and viewport updates only mark
/// the order dirty; the sort happens on the next [`pop_next`], so a burst
/// of pushes between pops costs one sort.
///
/// [`pop_next`]: RequestQueue::pop_next
pub struct RequestQueue {
    prioritizer: Arc<ReadRequestPrioritizer>,
    /// Live requests, sorted worst-first when `sorted` is set, so the best
    /// request pops from the back.
    live: Vec<ReadRequest>,
    cancelled: VecDeque<ReadRequest>,
    sorted: bool,
}

impl RequestQueue {
    pub fn new(prioritizer: Arc<ReadRequestPrioritizer>) -> Self {
        Self {
            prioritizer,
            live: Vec::new(),
            cancelled: VecDeque::new(),
            sorted: true,
        }
    }

    /// Adds a request to the pending set.
    pub fn push(&mut self, request: ReadRequest) {
        trace!(id = request.id, level = request.level, "request queued");
        self.live.push(request);
        self.sorted = false;
    }

    /// Moves the request with the given id, if pending, to the cancelled
    /// lane. Returns whether a request was found.
    pub fn cancel(&mut self, id: u64) -> bool {
        // The live order is unaffected by removing an element, so this
        // does not dirty the sort.
        match self.live.iter().position(|r| r.id == id) {
            Some(index) => {
                let request = self.live.remove(index);
                trace!(id, "request cancelled");
                self.cancelled.push_back(request);
                true
            }
            None => false,
        }
    }

    /// Invalidates the current order, e.g. after the prioritizer's
    /// viewport snapshot changed.
    pub fn mark_dirty(&mut self) {
        self.sorted = false;
    }

    /// Removes and returns the next request to service, with the flag
    /// indicating whether it was cancelled.
    ///
    /// Cancelled requests drain first, oldest first.
    pub fn pop_next(&mut self) -> Option<(ReadRequest, bool)> {
        if let Some(request) = self.cancelled.pop_front() {
            return Some((request, true));
        }
        if !self.sorted {
            let prioritizer = Arc::clone(&self.prioritizer);
            self.live.sort_by(|a, b| prioritizer.compare(b, a));
            self.sorted = true;
        }
        self.live.pop().map(|request| (request, false))
    }

    /// Pending requests in both lanes.
    pub fn len(&self) -> usize {
        self.live.len() + self.cancelled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty() && self.cancelled.is_empty()
    }

    /// Drops all pending requests, returning them for the caller to
    /// retire.
    pub fn clear(&mut self) -> Vec<ReadRequest> {
        let mut drained: Vec<ReadRequest> = self.cancelled.drain(..).collect();
        drained.append(&mut self.live);
        self.sorted = true;
        drained
    }
}
