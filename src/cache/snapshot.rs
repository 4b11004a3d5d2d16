use std::collections::{BTreeMap, BTreeSet};

use crate::cache::cluster_queue::AdmittedWorkload;
use crate::domain::cluster_queue::ClusterQueueSpec;
use crate::domain::flavor::ResourceFlavor;
use crate::domain::ids::{ClusterQueueName, CohortName, FlavorName, ResourceName, WorkloadKey};
use crate::domain::quantity::Quantity;
use crate::domain::resources::FlavorResourceUsage;

/// A cluster queue inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotClusterQueue {
    pub spec: ClusterQueueSpec,
    pub usage: FlavorResourceUsage,
    pub admitted: BTreeMap<WorkloadKey, AdmittedWorkload>,
    pub active: bool,
}

/// A consistent copy of the cache taken for one scheduling pass.
///
/// The snapshot is mutable in isolation: the scheduler commits tentative
/// admissions into it so later workloads of the same pass see the reservation,
/// and the preemption engine simulates victim removal by decrementing its usage.
/// None of this ever flows back into the cache; the commit step recomputes from
/// the recorded decisions instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub flavors: BTreeMap<FlavorName, ResourceFlavor>,
    pub cluster_queues: BTreeMap<ClusterQueueName, SnapshotClusterQueue>,
    pub cohort_members: BTreeMap<CohortName, BTreeSet<ClusterQueueName>>,
}

impl Snapshot {
    pub fn cluster_queue(&self, name: &ClusterQueueName) -> Option<&SnapshotClusterQueue> {
        self.cluster_queues.get(name)
    }

    /// Tentatively removes an admitted workload, returning its summary so it can
    /// be restored. Usage is decremented immediately.
    pub fn remove_admitted(&mut self, cluster_queue: &ClusterQueueName, key: &WorkloadKey) -> Option<AdmittedWorkload> {
        let queue = self.cluster_queues.get_mut(cluster_queue)?;
        let entry = queue.admitted.remove(key)?;
        queue.usage.sub_all(&entry.usage());
        Some(entry)
    }

    /// Puts a previously removed workload back, restoring its usage.
    pub fn restore_admitted(&mut self, cluster_queue: &ClusterQueueName, entry: AdmittedWorkload) {
        if let Some(queue) = self.cluster_queues.get_mut(cluster_queue) {
            queue.usage.add_all(&entry.usage());
            queue.admitted.insert(entry.key.clone(), entry);
        }
    }

    /// Commits an incoming admission into the snapshot so the rest of the pass
    /// sees the reservation.
    pub fn add_admitted(&mut self, cluster_queue: &ClusterQueueName, entry: AdmittedWorkload) {
        if let Some(queue) = self.cluster_queues.get_mut(cluster_queue) {
            queue.usage.add_all(&entry.usage());
            queue.admitted.insert(entry.key.clone(), entry);
        }
    }

    /// Amount the queue consumes beyond its nominal quota for `(flavor, resource)`.
    pub fn borrowed(&self, cluster_queue: &ClusterQueueName, flavor: &FlavorName, resource: &ResourceName) -> Quantity {
        let Some(queue) = self.cluster_queues.get(cluster_queue) else {
            return Quantity::ZERO;
        };
        let nominal = queue.spec.nominal(flavor, resource).unwrap_or(Quantity::ZERO);
        queue.usage.get(flavor, resource).saturating_sub(nominal)
    }

    pub fn is_borrowing(&self, cluster_queue: &ClusterQueueName, flavor: &FlavorName, resource: &ResourceName) -> bool {
        !self.borrowed(cluster_queue, flavor, resource).is_zero()
    }

    /// Unused capacity of a whole cohort for `(flavor, resource)`: the members'
    /// summed nominal quota minus their summed usage. Negative when the cohort
    /// as a whole is overcommitted. Computed by iterating the member list.
    ///
    /// `extra` holds the in-pass claims of `claiming_queue` that are not yet part
    /// of the snapshot usage.
    fn cohort_free_signed(
        &self,
        cohort: &CohortName,
        flavor: &FlavorName,
        resource: &ResourceName,
        claiming_queue: &ClusterQueueName,
        extra: &FlavorResourceUsage,
    ) -> i64 {
        let Some(members) = self.cohort_members.get(cohort) else {
            return 0;
        };

        let mut nominal_total: i64 = 0;
        let mut usage_total: i64 = 0;
        for member in members {
            let Some(queue) = self.cluster_queues.get(member) else {
                continue;
            };
            nominal_total += queue.spec.nominal(flavor, resource).unwrap_or(Quantity::ZERO).millis();
            usage_total += queue.usage.get(flavor, resource).millis();
            if member == claiming_queue {
                usage_total += extra.get(flavor, resource).millis();
            }
        }

        return nominal_total - usage_total;
    }

    /// How much of `(flavor, resource)` the queue can still take, honoring both
    /// its own quota plus borrowing limit and the capacity actually left in the
    /// cohort.
    ///
    /// For a queue without a cohort this is simply `nominal - usage`. For a
    /// cohort member it is the minimum of the queue-scope headroom
    /// (`nominal + borrowingLimit - usage`, unbounded when no limit is set) and
    /// the cohort-wide free capacity, so a queue can never absorb quota its
    /// cohort has already lent out.
    pub fn free_capacity(
        &self,
        cluster_queue: &ClusterQueueName,
        flavor: &FlavorName,
        resource: &ResourceName,
        extra: &FlavorResourceUsage,
    ) -> Quantity {
        Quantity::from_millis(self.free_capacity_signed(cluster_queue, flavor, resource, extra).max(0))
    }

    /// Signed variant of [`Snapshot::free_capacity`] in milli units. A negative
    /// value is the deficit that evictions would have to cover; the preemption
    /// feasibility check needs the deficit unclamped.
    pub fn free_capacity_signed(
        &self,
        cluster_queue: &ClusterQueueName,
        flavor: &FlavorName,
        resource: &ResourceName,
        extra: &FlavorResourceUsage,
    ) -> i64 {
        let Some(queue) = self.cluster_queues.get(cluster_queue) else {
            return 0;
        };
        let Some(nominal) = queue.spec.nominal(flavor, resource) else {
            return 0;
        };

        let usage = queue.usage.get(flavor, resource) + extra.get(flavor, resource);

        let Some(cohort) = queue.spec.cohort.as_ref() else {
            return nominal.millis() - usage.millis();
        };

        let cohort_free = self.cohort_free_signed(cohort, flavor, resource, cluster_queue, extra);
        match queue.spec.borrowing_limit(flavor, resource) {
            Some(limit) => (nominal.millis() + limit.millis() - usage.millis()).min(cohort_free),
            None => cohort_free,
        }
    }
}
