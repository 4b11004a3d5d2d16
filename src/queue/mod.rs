pub mod heap;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::domain::ids::{ClusterQueueName, LocalQueueKey, WorkloadKey};
use crate::domain::local_queue::LocalQueue;
use crate::domain::workload::Workload;
use crate::queue::heap::ClusterQueueHeap;

#[derive(Debug, Default)]
struct ManagerInner {
    local_queues: HashMap<LocalQueueKey, ClusterQueueName>,
    heaps: HashMap<ClusterQueueName, ClusterQueueHeap>,
    /// Workloads whose local queue does not resolve yet, keyed by the local
    /// queue they wait for.
    unroutable: BTreeMap<LocalQueueKey, BTreeMap<WorkloadKey, Workload>>,
    /// Workloads that failed admission and wait for cluster state to change.
    inadmissible: HashMap<ClusterQueueName, BTreeMap<WorkloadKey, Workload>>,
}

impl ManagerInner {
    fn route(&self, workload: &Workload) -> Option<ClusterQueueName> {
        self.local_queues.get(&workload.local_queue_key()).cloned()
    }

    fn push_routed(&mut self, cluster_queue: ClusterQueueName, workload: Workload) {
        self.heaps.entry(cluster_queue).or_default().push(workload);
    }

    fn forget_everywhere(&mut self, key: &WorkloadKey) {
        for heap in self.heaps.values_mut() {
            heap.remove(key);
        }
        for pending in self.unroutable.values_mut() {
            pending.remove(key);
        }
        for parked in self.inadmissible.values_mut() {
            parked.remove(key);
        }
    }
}

/// Groups pending workloads by their target cluster queue.
///
/// One mutex protects the heaps, the routing table, and both side-sets. The
/// embedded [`Notify`] wakes the scheduler whenever new work may have become
/// schedulable.
#[derive(Debug, Clone, Default)]
pub struct QueueManager {
    inner: Arc<Mutex<ManagerInner>>,
    notify: Arc<Notify>,
}

impl QueueManager {
    pub fn new() -> Self {
        QueueManager { inner: Arc::new(Mutex::new(ManagerInner::default())), notify: Arc::new(Notify::new()) }
    }

    /// Signals the scheduler that a cluster queue should be re-evaluated.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Handle for the scheduler loop to await wakeups on.
    pub fn wakeup_handle(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    //----------------------------
    // --- Local Queue Methods ---
    //----------------------------

    /// Registers (or repoints) a local queue. Workloads parked as unroutable
    /// under this key flow into the heap; on a repoint, the previous cluster
    /// queue's entries for this local queue move over.
    pub fn add_local_queue(&self, local_queue: &LocalQueue) {
        let mut guard = self.inner.lock().expect("Mutex poisoned");
        let key = local_queue.key();
        let target = local_queue.cluster_queue.clone();

        if let Some(previous) = guard.local_queues.insert(key.clone(), target.clone()) {
            if previous != target {
                let moved: Vec<Workload> = match guard.heaps.get_mut(&previous) {
                    Some(heap) => heap.drain().into_iter().collect(),
                    None => Vec::new(),
                };
                let mut kept = Vec::new();
                let mut rerouted = 0;
                for workload in moved {
                    if workload.local_queue_key() == key {
                        rerouted += 1;
                        guard.push_routed(target.clone(), workload);
                    } else {
                        kept.push(workload);
                    }
                }
                for workload in kept {
                    guard.push_routed(previous.clone(), workload);
                }
                log::info!("Local queue {} repointed from cluster queue {} to {}, moved {} workloads.", key, previous, target, rerouted);
            }
        }

        if let Some(parked) = guard.unroutable.remove(&key) {
            log::info!("Local queue {} appeared, releasing {} previously unroutable workloads.", key, parked.len());
            for (_, workload) in parked {
                guard.push_routed(target.clone(), workload);
            }
        }

        drop(guard);
        self.wake();
    }

    /// Unregisters a local queue. Pending workloads of that queue become
    /// unroutable again and wait for a replacement.
    pub fn delete_local_queue(&self, key: &LocalQueueKey) {
        let mut guard = self.inner.lock().expect("Mutex poisoned");
        let Some(previous) = guard.local_queues.remove(key) else {
            return;
        };

        let drained: Vec<Workload> = match guard.heaps.get_mut(&previous) {
            Some(heap) => heap.drain(),
            None => Vec::new(),
        };
        for workload in drained {
            if &workload.local_queue_key() == key {
                guard.unroutable.entry(key.clone()).or_default().insert(workload.key(), workload);
            } else {
                guard.push_routed(previous.clone(), workload);
            }
        }
    }

    //-------------------------
    // --- Workload Methods ---
    //-------------------------

    /// Enqueues a pending workload.
    ///
    /// # Returns
    /// * `true` - the workload landed in a heap or the unroutable side-set.
    /// * `false` - the workload is not queueable (it holds quota, finished, or is
    ///   a child sharing its parent's admission).
    pub fn push(&self, workload: Workload) -> bool {
        if !workload.is_queueable() {
            log::debug!("Workload {} is not queueable (admitted, finished, or a child workload).", workload.key());
            return false;
        }

        let mut guard = self.inner.lock().expect("Mutex poisoned");
        match guard.route(&workload) {
            Some(cluster_queue) => guard.push_routed(cluster_queue, workload),
            None => {
                let local_queue = workload.local_queue_key();
                log::debug!("Workload {} references unknown local queue {}, parking it.", workload.key(), local_queue);
                guard.unroutable.entry(local_queue).or_default().insert(workload.key(), workload);
            }
        }

        drop(guard);
        self.wake();
        return true;
    }

    /// Replaces a workload wherever it currently sits and re-enqueues the new
    /// revision (unless it stopped being queueable).
    pub fn update(&self, workload: Workload) {
        {
            let mut guard = self.inner.lock().expect("Mutex poisoned");
            guard.forget_everywhere(&workload.key());
        }
        self.push(workload);
    }

    pub fn delete(&self, key: &WorkloadKey) {
        let mut guard = self.inner.lock().expect("Mutex poisoned");
        guard.forget_everywhere(key);
    }

    /// Puts a workload that failed this pass back.
    ///
    /// With `inadmissible = true` the workload waits in the side-set until
    /// [`QueueManager::flush_inadmissible`] runs; otherwise it returns straight
    /// into its heap and competes again next pass.
    pub fn requeue(&self, workload: Workload, inadmissible: bool) {
        let mut guard = self.inner.lock().expect("Mutex poisoned");
        match guard.route(&workload) {
            Some(cluster_queue) if inadmissible => {
                guard.inadmissible.entry(cluster_queue).or_default().insert(workload.key(), workload);
            }
            Some(cluster_queue) => guard.push_routed(cluster_queue, workload),
            None => {
                let local_queue = workload.local_queue_key();
                guard.unroutable.entry(local_queue).or_default().insert(workload.key(), workload);
            }
        }
    }

    /// Releases every parked inadmissible workload back into its heap. Called
    /// whenever cluster state changed in a way that may unblock them (admission
    /// released, quota or flavor objects updated, cohort member departed).
    pub fn flush_inadmissible(&self) {
        let mut guard = self.inner.lock().expect("Mutex poisoned");
        let parked: Vec<(ClusterQueueName, Vec<Workload>)> = guard
            .inadmissible
            .drain()
            .map(|(cluster_queue, workloads)| (cluster_queue, workloads.into_values().collect()))
            .collect();

        let mut released = 0;
        for (cluster_queue, workloads) in parked {
            for workload in workloads {
                released += 1;
                guard.push_routed(cluster_queue.clone(), workload);
            }
        }

        drop(guard);
        if released > 0 {
            log::debug!("Released {} inadmissible workloads for re-evaluation.", released);
            self.wake();
        }
    }

    pub fn peek_head(&self, cluster_queue: &ClusterQueueName) -> Option<Workload> {
        let mut guard = self.inner.lock().expect("Mutex poisoned");
        guard.heaps.get_mut(cluster_queue).and_then(|heap| heap.peek().cloned())
    }

    pub fn pop_head(&self, cluster_queue: &ClusterQueueName) -> Option<Workload> {
        let mut guard = self.inner.lock().expect("Mutex poisoned");
        guard.heaps.get_mut(cluster_queue).and_then(|heap| heap.pop())
    }

    /// Cluster queues that currently have pending workloads.
    pub fn queues_with_pending(&self) -> Vec<ClusterQueueName> {
        let guard = self.inner.lock().expect("Mutex poisoned");
        guard.heaps.iter().filter(|(_, heap)| !heap.is_empty()).map(|(name, _)| name.clone()).collect()
    }

    /// `(active, inadmissible)` pending counts for one cluster queue.
    pub fn pending_counts(&self, cluster_queue: &ClusterQueueName) -> (usize, usize) {
        let guard = self.inner.lock().expect("Mutex poisoned");
        let active = guard.heaps.get(cluster_queue).map(|heap| heap.len()).unwrap_or(0);
        let parked = guard.inadmissible.get(cluster_queue).map(|set| set.len()).unwrap_or(0);
        (active, parked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::ClusterQueueName;

    fn local_queue(namespace: &str, name: &str, cluster_queue: &str) -> LocalQueue {
        LocalQueue::new(namespace, name, ClusterQueueName::new(cluster_queue))
    }

    fn pending_workload(name: &str, queue: &str) -> Workload {
        let mut workload = Workload::new("default", name);
        workload.queue_name = queue.to_string();
        workload
    }

    #[test]
    fn unroutable_workloads_flow_in_once_the_local_queue_appears() {
        let manager = QueueManager::new();
        assert!(manager.push(pending_workload("early", "team-a")));

        let cluster_queue = ClusterQueueName::new("cq-a");
        assert!(manager.peek_head(&cluster_queue).is_none());

        manager.add_local_queue(&local_queue("default", "team-a", "cq-a"));
        assert_eq!(manager.peek_head(&cluster_queue).unwrap().name, "early");
    }

    #[test]
    fn inadmissible_workloads_wait_for_a_flush() {
        let manager = QueueManager::new();
        manager.add_local_queue(&local_queue("default", "team-a", "cq-a"));
        let cluster_queue = ClusterQueueName::new("cq-a");

        let workload = pending_workload("blocked", "team-a");
        manager.requeue(workload, true);
        assert!(manager.peek_head(&cluster_queue).is_none());
        assert_eq!(manager.pending_counts(&cluster_queue), (0, 1));

        manager.flush_inadmissible();
        assert_eq!(manager.peek_head(&cluster_queue).unwrap().name, "blocked");
        assert_eq!(manager.pending_counts(&cluster_queue), (1, 0));
    }

    #[test]
    fn repointing_a_local_queue_moves_its_workloads() {
        let manager = QueueManager::new();
        manager.add_local_queue(&local_queue("default", "team-a", "cq-a"));
        assert!(manager.push(pending_workload("job", "team-a")));

        manager.add_local_queue(&local_queue("default", "team-a", "cq-b"));
        assert!(manager.peek_head(&ClusterQueueName::new("cq-a")).is_none());
        assert_eq!(manager.peek_head(&ClusterQueueName::new("cq-b")).unwrap().name, "job");
    }
}
