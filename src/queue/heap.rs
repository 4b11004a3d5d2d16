use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::domain::ids::WorkloadKey;
use crate::domain::workload::Workload;

/// Heap entry carrying a sequence number for lazy deletion: removing or updating
/// a workload bumps the live sequence, and stale entries are skipped when they
/// surface at the top.
#[derive(Debug, Clone)]
struct HeapEntry {
    workload: Workload,
    seq: u64,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the greatest entry, the queue ordering yields Less for
        // the workload that must leave first.
        self.workload.queue_ordering(&other.workload).reverse().then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Priority heap of one cluster queue, ordered by `(-priority, creationTime,
/// name)`. Push and pop are `O(log n)`.
#[derive(Debug, Default)]
pub struct ClusterQueueHeap {
    heap: BinaryHeap<HeapEntry>,
    live: HashMap<WorkloadKey, u64>,
    next_seq: u64,
}

impl ClusterQueueHeap {
    pub fn new() -> Self {
        ClusterQueueHeap { heap: BinaryHeap::new(), live: HashMap::new(), next_seq: 0 }
    }

    /// Inserts or replaces a workload. A replaced entry's stale heap node is
    /// skipped lazily once it reaches the top.
    pub fn push(&mut self, workload: Workload) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.live.insert(workload.key(), seq);
        self.heap.push(HeapEntry { workload, seq });
    }

    pub fn remove(&mut self, key: &WorkloadKey) -> bool {
        self.live.remove(key).is_some()
    }

    pub fn contains(&self, key: &WorkloadKey) -> bool {
        self.live.contains_key(key)
    }

    fn drop_stale_top(&mut self) {
        loop {
            let stale = match self.heap.peek() {
                Some(top) => {
                    let key = top.workload.key();
                    self.live.get(&key) != Some(&top.seq)
                }
                None => return,
            };
            if !stale {
                return;
            }
            self.heap.pop();
        }
    }

    pub fn peek(&mut self) -> Option<&Workload> {
        self.drop_stale_top();
        self.heap.peek().map(|entry| &entry.workload)
    }

    pub fn pop(&mut self) -> Option<Workload> {
        self.drop_stale_top();
        let entry = self.heap.pop()?;
        self.live.remove(&entry.workload.key());
        Some(entry.workload)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Drains every live workload, used when a local queue is repointed to a
    /// different cluster queue.
    pub fn drain(&mut self) -> Vec<Workload> {
        let mut drained = Vec::with_capacity(self.live.len());
        while let Some(workload) = self.pop() {
            drained.push(workload);
        }
        drained
    }
}
