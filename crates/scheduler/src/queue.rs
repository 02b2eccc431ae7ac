use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use renderflow_core::render::Priority;

#[derive(Debug, PartialEq, Eq)]
struct Entry {
    priority: Priority,
    seq: Reverse<u64>,
    job_id: String,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending job ids, highest priority first and FIFO within a priority.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl PendingQueue {
    pub fn push(&mut self, job_id: String, priority: Priority) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            priority,
            seq: Reverse(seq),
            job_id,
        });
    }

    pub fn pop(&mut self) -> Option<String> {
        self.heap.pop().map(|entry| entry.job_id)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
