pub mod cluster_queue;
pub mod cohort;
pub mod snapshot;

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::cache::cluster_queue::{AdmittedWorkload, ClusterQueue};
use crate::cache::cohort::CohortIndex;
use crate::cache::snapshot::{Snapshot, SnapshotClusterQueue};
use crate::domain::cluster_queue::ClusterQueueSpec;
use crate::domain::flavor::ResourceFlavor;
use crate::domain::ids::{ClusterQueueName, FlavorName, LocalQueueKey, WorkloadKey};
use crate::domain::local_queue::LocalQueue;
use crate::domain::resources::FlavorResourceUsage;
use crate::domain::workload::Workload;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct CacheInner {
    flavors: BTreeMap<FlavorName, ResourceFlavor>,
    cluster_queues: BTreeMap<ClusterQueueName, ClusterQueue>,
    local_queues: BTreeMap<LocalQueueKey, ClusterQueueName>,
    cohorts: CohortIndex,
}

/// The authoritative in-memory view of cluster queues, cohorts, flavors, and
/// admitted workloads.
///
/// All state sits behind a single read-write lock. Snapshots are taken under the
/// read lock and handed to the caller by value; admission commits take the write
/// lock. Mutating a snapshot never touches the cache.
#[derive(Debug, Clone, Default)]
pub struct Cache {
    inner: Arc<RwLock<CacheInner>>,
}

impl Cache {
    pub fn new() -> Self {
        Cache { inner: Arc::new(RwLock::new(CacheInner::default())) }
    }

    //-----------------------
    // --- Flavor Methods ---
    //-----------------------

    /// Registers a flavor and re-evaluates the activity of every cluster queue,
    /// since a previously missing flavor may have made a queue whole.
    pub fn add_flavor(&self, flavor: ResourceFlavor) {
        let mut guard = self.inner.write().expect("RwLock poisoned");
        guard.flavors.insert(flavor.name.clone(), flavor);
        Self::revalidate_all(&mut guard);
    }

    pub fn delete_flavor(&self, name: &FlavorName) {
        let mut guard = self.inner.write().expect("RwLock poisoned");
        guard.flavors.remove(name);
        Self::revalidate_all(&mut guard);
    }

    //------------------------------
    // --- Cluster Queue Methods ---
    //------------------------------

    /// Adds or replaces a cluster queue.
    ///
    /// A malformed spec (duplicate resource coverage, unknown flavor) is stored
    /// anyway and the queue is marked inactive; the scheduler skips inactive
    /// queues until the object changes. Existing usage and admitted workloads
    /// survive a spec update.
    pub fn add_cluster_queue(&self, spec: ClusterQueueSpec) {
        let mut guard = self.inner.write().expect("RwLock poisoned");
        let name = spec.name.clone();

        if let Some(existing) = guard.cluster_queues.get(&name) {
            if let Some(old_cohort) = existing.spec.cohort.clone() {
                guard.cohorts.unlink(&old_cohort, &name);
            }
        }
        if let Some(cohort) = spec.cohort.clone() {
            guard.cohorts.link(&cohort, &name);
        }

        match guard.cluster_queues.get_mut(&name) {
            Some(existing) => existing.spec = spec,
            None => {
                guard.cluster_queues.insert(name.clone(), ClusterQueue::new(spec));
            }
        }
        Self::revalidate_all(&mut guard);
    }

    pub fn delete_cluster_queue(&self, name: &ClusterQueueName) {
        let mut guard = self.inner.write().expect("RwLock poisoned");
        if let Some(queue) = guard.cluster_queues.remove(name) {
            if let Some(cohort) = queue.spec.cohort {
                guard.cohorts.unlink(&cohort, name);
            }
        }
    }

    /// Whether the queue exists, references only known flavors, and has
    /// well-formed resource groups.
    pub fn is_active(&self, name: &ClusterQueueName) -> bool {
        let guard = self.inner.read().expect("RwLock poisoned");
        guard.cluster_queues.get(name).map(|queue| queue.active).unwrap_or(false)
    }

    pub fn inactive_reason(&self, name: &ClusterQueueName) -> Option<String> {
        let guard = self.inner.read().expect("RwLock poisoned");
        guard.cluster_queues.get(name).and_then(|queue| queue.inactive_reason.clone())
    }

    fn revalidate_all(guard: &mut CacheInner) {
        let flavors = guard.flavors.clone();
        for queue in guard.cluster_queues.values_mut() {
            match queue.spec.validate(&flavors) {
                Ok(()) => {
                    queue.active = true;
                    queue.inactive_reason = None;
                }
                Err(reason) => {
                    if queue.active || queue.inactive_reason.is_none() {
                        log::warn!("Cluster queue {} is inactive: {}", queue.spec.name, reason);
                    }
                    queue.active = false;
                    queue.inactive_reason = Some(reason);
                }
            }
        }
    }

    //----------------------------
    // --- Local Queue Methods ---
    //----------------------------

    pub fn add_local_queue(&self, local_queue: &LocalQueue) {
        let mut guard = self.inner.write().expect("RwLock poisoned");
        guard.local_queues.insert(local_queue.key(), local_queue.cluster_queue.clone());
    }

    pub fn delete_local_queue(&self, key: &LocalQueueKey) {
        let mut guard = self.inner.write().expect("RwLock poisoned");
        guard.local_queues.remove(key);
    }

    pub fn resolve_local_queue(&self, key: &LocalQueueKey) -> Option<ClusterQueueName> {
        let guard = self.inner.read().expect("RwLock poisoned");
        guard.local_queues.get(key).cloned()
    }

    //--------------------------
    // --- Admission Methods ---
    //--------------------------

    /// Charges a freshly admitted workload against its cluster queue.
    ///
    /// # Returns
    /// * `Error::NotFound` if the admission names an unknown cluster queue.
    /// * `Error::InvariantViolation` if the workload is already accounted; the
    ///   scheduler treats that as fatal for the current pass.
    pub fn assume_admission(&self, workload: &Workload) -> Result<()> {
        let entry = AdmittedWorkload::from_workload(workload)?;
        let cluster_queue = entry.admission.cluster_queue.clone();

        let mut guard = self.inner.write().expect("RwLock poisoned");
        let queue = guard
            .cluster_queues
            .get_mut(&cluster_queue)
            .ok_or_else(|| Error::NotFound(format!("cluster queue {} for workload {}", cluster_queue, entry.key)))?;
        queue.add_admitted(entry)
    }

    /// Releases an admission, decrementing usage symmetrically to
    /// [`Cache::assume_admission`].
    ///
    /// # Returns
    /// The released summary, or `None` if no cluster queue accounts the key
    /// (the workload may have been released already by a competing path).
    pub fn forget_admission(&self, key: &WorkloadKey) -> Option<AdmittedWorkload> {
        let mut guard = self.inner.write().expect("RwLock poisoned");
        for queue in guard.cluster_queues.values_mut() {
            if let Some(entry) = queue.remove_admitted(key) {
                return Some(entry);
            }
        }

        log::debug!("Forget admission of workload {} was a no-op, no cluster queue accounts it.", key);
        return None;
    }

    /// Lowers the effective pod count of an admitted workload without removing
    /// the admission.
    pub fn set_reclaimable(&self, key: &WorkloadKey, counts: BTreeMap<String, u32>) -> Result<()> {
        let mut guard = self.inner.write().expect("RwLock poisoned");
        for queue in guard.cluster_queues.values_mut() {
            if queue.admitted.contains_key(key) {
                return queue.set_reclaimable(key, counts);
            }
        }
        Err(Error::NotFound(format!("workload {} is not admitted anywhere", key)))
    }

    /// Drops every admitted-workload charge while keeping specs, flavors, and
    /// local queues. Used by the full resync that re-derives the accounting from
    /// the external store after an invariant violation or a restart.
    pub fn reset_admissions(&self) {
        let mut guard = self.inner.write().expect("RwLock poisoned");
        for queue in guard.cluster_queues.values_mut() {
            queue.admitted.clear();
            queue.usage = FlavorResourceUsage::new();
        }
    }

    //-------------------------
    // --- Snapshot & Reads ---
    //-------------------------

    /// Produces a deep copy of everything the assigner and the preemption engine
    /// read. The copy is owned by the caller and may be mutated freely.
    pub fn snapshot(&self) -> Snapshot {
        let guard = self.inner.read().expect("RwLock poisoned");
        Snapshot {
            flavors: guard.flavors.clone(),
            cluster_queues: guard
                .cluster_queues
                .iter()
                .map(|(name, queue)| {
                    (
                        name.clone(),
                        SnapshotClusterQueue {
                            spec: queue.spec.clone(),
                            usage: queue.usage.clone(),
                            admitted: queue.admitted.clone(),
                            active: queue.active,
                        },
                    )
                })
                .collect(),
            cohort_members: guard.cohorts.all().clone(),
        }
    }

    /// Current usage of a cluster queue, for tests and metric export.
    pub fn usage_of(&self, name: &ClusterQueueName) -> Option<FlavorResourceUsage> {
        let guard = self.inner.read().expect("RwLock poisoned");
        guard.cluster_queues.get(name).map(|queue| queue.usage.clone())
    }

    pub fn cluster_queue_names(&self) -> Vec<ClusterQueueName> {
        let guard = self.inner.read().expect("RwLock poisoned");
        guard.cluster_queues.keys().cloned().collect()
    }

    /// Number of admitted workloads per cluster queue, for metric export.
    pub fn admitted_count(&self, name: &ClusterQueueName) -> usize {
        let guard = self.inner.read().expect("RwLock poisoned");
        guard.cluster_queues.get(name).map(|queue| queue.admitted.len()).unwrap_or(0)
    }

    pub fn cluster_queue_spec(&self, name: &ClusterQueueName) -> Option<ClusterQueueSpec> {
        let guard = self.inner.read().expect("RwLock poisoned");
        guard.cluster_queues.get(name).map(|queue| queue.spec.clone())
    }
}
