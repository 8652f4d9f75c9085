//! Reassembly of blocks that complete out of order.
//!
//! Workers finish blocks in whatever order the scheduler happens to run them. The
//! [`ReorderQueue`] buffers completed blocks keyed by [`BlockKey`] and releases each
//! stream's blocks strictly in block-id order, starting at 0.
//!
//! # Example
//!
//! ```
//! use pooled_bgzf::block::BlockKey;
//! use pooled_bgzf::reorder::ReorderQueue;
//!
//! let mut queue = ReorderQueue::new();
//! queue.enqueue(BlockKey::new(0, 1), "second");
//! assert_eq!(queue.dequeue_if_next_expected(0), None);
//!
//! queue.enqueue(BlockKey::new(0, 0), "first");
//! assert_eq!(queue.dequeue_if_next_expected(0), Some((BlockKey::new(0, 0), "first")));
//! assert_eq!(queue.dequeue_if_next_expected(0), Some((BlockKey::new(0, 1), "second")));
//! ```

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use crate::block::BlockKey;

/// A buffered block, ordered only by its key.
#[derive(Debug)]
struct Slot<T> {
    key: BlockKey,
    item: T,
}

impl<T> PartialEq for Slot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for Slot<T> {}

impl<T> PartialOrd for Slot<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Slot<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

/// Per-stream state: buffered blocks and the next id to release.
#[derive(Debug)]
struct Lane<T> {
    heap: BinaryHeap<Reverse<Slot<T>>>,
    next_expected: u64,
}

impl<T> Default for Lane<T> {
    fn default() -> Self {
        Self { heap: BinaryHeap::new(), next_expected: 0 }
    }
}

impl<T> Lane<T> {
    fn is_ready(&self) -> bool {
        self.heap.peek().is_some_and(|Reverse(slot)| slot.key.block_id == self.next_expected)
    }
}

/// A min-heap of completed blocks per stream that releases them in block-id order.
///
/// The queue is not synchronized itself; the pipeline keeps it behind a mutex.
#[derive(Debug)]
pub struct ReorderQueue<T> {
    lanes: HashMap<u32, Lane<T>>,
    len: usize,
}

impl<T> Default for ReorderQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReorderQueue<T> {
    /// Create an empty queue; every stream expects block 0 first.
    #[must_use]
    pub fn new() -> Self {
        Self { lanes: HashMap::new(), len: 0 }
    }

    /// Buffer a completed block.
    ///
    /// # Panics
    ///
    /// Panics in debug mode if the block id was already released for its stream.
    pub fn enqueue(&mut self, key: BlockKey, item: T) {
        let lane = self.lanes.entry(key.stream_id).or_default();
        debug_assert!(
            key.block_id >= lane.next_expected,
            "block {} of stream {} was already released",
            key.block_id,
            key.stream_id
        );
        lane.heap.push(Reverse(Slot { key, item }));
        self.len += 1;
    }

    /// Release the next block of `stream_id` if it is the one the stream expects.
    pub fn dequeue_if_next_expected(&mut self, stream_id: u32) -> Option<(BlockKey, T)> {
        let lane = self.lanes.get_mut(&stream_id)?;
        if !lane.is_ready() {
            return None;
        }
        let Reverse(slot) = lane.heap.pop()?;
        lane.next_expected += 1;
        self.len -= 1;
        Some((slot.key, slot.item))
    }

    /// True if `stream_id` has its next expected block buffered.
    #[must_use]
    pub fn has_ready(&self, stream_id: u32) -> bool {
        self.lanes.get(&stream_id).is_some_and(Lane::is_ready)
    }

    /// The next block id `stream_id` will release.
    #[must_use]
    pub fn next_expected(&self, stream_id: u32) -> u64 {
        self.lanes.get(&stream_id).map_or(0, |lane| lane.next_expected)
    }

    /// Forget a finished stream, dropping anything still buffered for it.
    pub fn remove_stream(&mut self, stream_id: u32) {
        if let Some(lane) = self.lanes.remove(&stream_id) {
            self.len -= lane.heap.len();
        }
    }

    /// Number of buffered blocks across all streams.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
