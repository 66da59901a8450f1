//! Bounded buffer restoring timestamp order to events arriving slightly out
//! of order.
//!
//! Events at or after the newest timestamp seen so far take the in-order
//! path (a FIFO). Older events go to a min-heap. Releases always take the
//! smaller head of the two. An event older than the last released one can no
//! longer be placed and is dropped through the listener.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};

use tracing::warn;

use crate::storage::record::EventRecord;
use crate::types::TraceError;

/// Anything carrying the timestamp it is ordered by.
pub trait Timestamped {
    /// Ordering key.
    fn timestamp(&self) -> u64;
}

impl Timestamped for EventRecord {
    fn timestamp(&self) -> u64 {
        self.header.timestamp
    }
}

/// Called with a [`TraceError::OrderingViolation`] and a short reason for
/// every dropped event.
pub type DropListener = Box<dyn FnMut(&TraceError, &'static str) + Send>;

struct Pending<T> {
    timestamp: u64,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Pending<T> {
    fn eq(&self, other: &Self) -> bool {
        (self.timestamp, self.seq) == (other.timestamp, other.seq)
    }
}

impl<T> Eq for Pending<T> {}

impl<T> PartialOrd for Pending<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Pending<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.timestamp, self.seq).cmp(&(other.timestamp, other.seq))
    }
}

/// Reordering window of at most `capacity` events.
pub struct ReorderingBuffer<T: Timestamped> {
    capacity: usize,
    in_order: VecDeque<Pending<T>>,
    out_of_order: BinaryHeap<Reverse<Pending<T>>>,
    last_in_order: u64,
    last_released: Option<u64>,
    seq: u64,
    dropped: u64,
    listener: Option<DropListener>,
}

impl<T: Timestamped> ReorderingBuffer<T> {
    /// Creates a buffer holding up to `capacity` events; a capacity of 0 is
    /// treated as 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            in_order: VecDeque::new(),
            out_of_order: BinaryHeap::new(),
            last_in_order: 0,
            last_released: None,
            seq: 0,
            dropped: 0,
            listener: None,
        }
    }

    /// Installs the callback invoked for dropped events.
    pub fn with_listener(mut self, listener: DropListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Replaces the drop callback in place. Staged events and counters are
    /// kept.
    pub fn set_listener(&mut self, listener: DropListener) {
        self.listener = Some(listener);
    }

    /// Treats `timestamp` as already released, so anything older is dropped
    /// instead of staged. Used to carry over the newest stored event.
    pub fn set_last_released(&mut self, timestamp: u64) {
        if self.last_released.map_or(true, |last| last < timestamp) {
            self.last_released = Some(timestamp);
        }
        self.last_in_order = self.last_in_order.max(timestamp);
    }

    /// Discards staged events and forgets the release history. The listener
    /// and the dropped counter survive.
    pub fn reset(&mut self) {
        self.in_order.clear();
        self.out_of_order.clear();
        self.last_in_order = 0;
        self.last_released = None;
        self.seq = 0;
    }

    /// Window size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Staged events.
    pub fn len(&self) -> usize {
        self.in_order.len() + self.out_of_order.len()
    }

    /// True when nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the window holds `capacity` events.
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Events dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Timestamp of the most recently released event.
    pub fn last_released(&self) -> Option<u64> {
        self.last_released
    }

    /// Stages `item`. Returns false when it arrived too late and was dropped.
    pub fn push(&mut self, item: T) -> bool {
        let timestamp = item.timestamp();
        if let Some(last) = self.last_released {
            if timestamp < last {
                self.drop_event(last, timestamp, "arrived after a later event was released");
                return false;
            }
        }
        let pending = Pending {
            timestamp,
            seq: self.seq,
            item,
        };
        self.seq += 1;
        if timestamp < self.last_in_order {
            self.out_of_order.push(Reverse(pending));
        } else {
            self.last_in_order = timestamp;
            self.in_order.push_back(pending);
        }
        true
    }

    fn drop_event(&mut self, last_released: u64, dropped: u64, reason: &'static str) {
        self.dropped += 1;
        warn!(
            target: "tracedb::reorder",
            last_released,
            dropped,
            reason,
            "dropped out-of-order event"
        );
        if let Some(listener) = self.listener.as_mut() {
            let violation = TraceError::OrderingViolation {
                last_released,
                dropped,
            };
            listener(&violation, reason);
        }
    }

    /// Smallest staged timestamp.
    pub fn next_available_timestamp(&self) -> Option<u64> {
        let a = self.in_order.front().map(|p| p.timestamp);
        let b = self.out_of_order.peek().map(|p| p.0.timestamp);
        match (a, b) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// True when the smallest staged timestamp lags `now` by more than
    /// `delay`.
    pub fn is_next_flushable(&self, now: u64, delay: u64) -> bool {
        self.next_available_timestamp()
            .map_or(false, |next| now.saturating_sub(next) > delay)
    }

    /// Releases the event with the smallest timestamp, ties in arrival order.
    pub fn pop(&mut self) -> Option<T> {
        let take_heap = match (self.in_order.front(), self.out_of_order.peek()) {
            (None, None) => return None,
            (None, Some(_)) => true,
            (Some(_), None) => false,
            (Some(front), Some(top)) => top.0 < *front,
        };
        let pending = if take_heap {
            self.out_of_order.pop().map(|r| r.0)
        } else {
            self.in_order.pop_front()
        }?;
        self.last_released = Some(pending.timestamp);
        Some(pending.item)
    }

    /// Stages `item` and releases one event if the window is full.
    pub fn push_and_release(&mut self, item: T) -> Option<T> {
        self.push(item);
        if self.is_full() {
            self.pop()
        } else {
            None
        }
    }

    /// Releases everything, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len());
        while let Some(item) = self.pop() {
            out.push(item);
        }
        out
    }
}
