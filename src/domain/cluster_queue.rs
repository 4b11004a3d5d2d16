use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::flavor::ResourceFlavor;
use crate::domain::ids::{ClusterQueueName, CohortName, FlavorName, ResourceName};
use crate::domain::quantity::Quantity;

/// Head-of-line behavior of a cluster queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueingStrategy {
    /// Only the head is considered; a blocked head blocks the whole queue.
    #[serde(rename = "StrictFIFO")]
    StrictFifo,
    /// A blocked head may be skipped; relative order is preserved across passes.
    #[serde(rename = "BestEffortFIFO")]
    BestEffortFifo,
}

impl Default for QueueingStrategy {
    fn default() -> Self {
        QueueingStrategy::BestEffortFifo
    }
}

/// Which admitted workloads of the *same* cluster queue may be evicted for an
/// incoming workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithinClusterQueue {
    Never,
    LowerPriority,
    LowerOrNewerEqualPriority,
}

/// Which admitted workloads of *other* cohort members may be evicted to reclaim
/// quota they borrowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReclaimWithinCohort {
    Never,
    LowerPriority,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreemptionPolicy {
    pub within_cluster_queue: WithinClusterQueue,
    pub reclaim_within_cohort: ReclaimWithinCohort,
}

impl Default for PreemptionPolicy {
    fn default() -> Self {
        PreemptionPolicy { within_cluster_queue: WithinClusterQueue::Never, reclaim_within_cohort: ReclaimWithinCohort::Never }
    }
}

/// Quota of one resource under one flavor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceQuota {
    pub resource: ResourceName,
    pub nominal: Quantity,
    /// Cap on the amount this queue may borrow from its cohort for this
    /// `(flavor, resource)`. `None` means borrowing is only bounded by what the
    /// cohort has left.
    pub borrowing_limit: Option<Quantity>,
}

/// One flavor inside a resource group, with a quota per covered resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlavorQuotas {
    pub flavor: FlavorName,
    pub quotas: Vec<ResourceQuota>,
}

impl FlavorQuotas {
    pub fn quota_for(&self, resource: &ResourceName) -> Option<&ResourceQuota> {
        self.quotas.iter().find(|quota| &quota.resource == resource)
    }
}

/// An ordered list of flavors covering a fixed set of resources. Flavors are
/// tried left to right by the assigner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceGroup {
    pub covered_resources: Vec<ResourceName>,
    pub flavors: Vec<FlavorQuotas>,
}

/// Cluster-scope quota bucket with admission policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterQueueSpec {
    pub name: ClusterQueueName,
    pub cohort: Option<CohortName>,
    pub resource_groups: Vec<ResourceGroup>,
    pub queueing_strategy: QueueingStrategy,
    pub preemption: PreemptionPolicy,
}

impl ClusterQueueSpec {
    pub fn new(name: impl Into<String>) -> Self {
        ClusterQueueSpec {
            name: ClusterQueueName::new(name),
            cohort: None,
            resource_groups: Vec::new(),
            queueing_strategy: QueueingStrategy::default(),
            preemption: PreemptionPolicy::default(),
        }
    }

    /// The first (and per validation only) resource group covering the resource.
    pub fn group_for(&self, resource: &ResourceName) -> Option<&ResourceGroup> {
        self.resource_groups.iter().find(|group| group.covered_resources.contains(resource))
    }

    pub fn nominal(&self, flavor: &FlavorName, resource: &ResourceName) -> Option<Quantity> {
        self.flavor_quotas(flavor, resource).map(|quota| quota.nominal)
    }

    pub fn borrowing_limit(&self, flavor: &FlavorName, resource: &ResourceName) -> Option<Quantity> {
        self.flavor_quotas(flavor, resource).and_then(|quota| quota.borrowing_limit)
    }

    fn flavor_quotas(&self, flavor: &FlavorName, resource: &ResourceName) -> Option<&ResourceQuota> {
        self.group_for(resource)
            .and_then(|group| group.flavors.iter().find(|fq| &fq.flavor == flavor))
            .and_then(|fq| fq.quota_for(resource))
    }

    /// Iterates all `(flavor, resource, quota)` triples across all groups, in spec
    /// order. Used by the cache for metric export and activity checks.
    pub fn all_quotas(&self) -> impl Iterator<Item = (&FlavorName, &ResourceQuota)> {
        self.resource_groups.iter().flat_map(|group| {
            group.flavors.iter().flat_map(|fq| fq.quotas.iter().map(move |quota| (&fq.flavor, quota)))
        })
    }

    /// Structural validation against the currently known flavors.
    ///
    /// A malformed spec is not rejected; the caller stores it and marks the queue
    /// inactive with the returned reason until the object changes.
    ///
    /// # Returns
    /// * `Ok(())` - the queue is well-formed and may be scheduled.
    /// * `Err(reason)` - duplicate resource coverage across groups, a flavor whose
    ///   quotas do not match the covered resources, or a reference to an unknown
    ///   flavor.
    pub fn validate(&self, flavors: &BTreeMap<FlavorName, ResourceFlavor>) -> std::result::Result<(), String> {
        let mut seen_resources: BTreeSet<&ResourceName> = BTreeSet::new();

        for group in &self.resource_groups {
            for resource in &group.covered_resources {
                if !seen_resources.insert(resource) {
                    return Err(format!("resource {} is covered by more than one resource group", resource));
                }
            }

            for flavor_quotas in &group.flavors {
                if !flavors.contains_key(&flavor_quotas.flavor) {
                    return Err(format!("flavor {} referenced by cluster queue {} does not exist", flavor_quotas.flavor, self.name));
                }

                for resource in &group.covered_resources {
                    if flavor_quotas.quota_for(resource).is_none() {
                        return Err(format!(
                            "flavor {} does not define a quota for covered resource {} in cluster queue {}",
                            flavor_quotas.flavor, resource, self.name
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}
