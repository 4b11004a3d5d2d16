use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::flavor::Toleration;
use crate::domain::ids::{ClusterQueueName, FlavorName, LocalQueueKey, ResourceName, WorkloadKey};
use crate::domain::quantity::Quantity;
use crate::domain::resources::{FlavorResourceUsage, ResourceList};

/// Lifecycle condition types tracked on a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConditionType {
    QuotaReserved,
    Admitted,
    PodsReady,
    Evicted,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub status: bool,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// A named group of identical pods with a shared resource request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSet {
    pub name: String,
    pub count: u32,
    /// Lower bound for partial admission. `None` (or a value equal to `count`)
    /// means the pod-set is admitted at full parallelism or not at all.
    pub min_count: Option<u32>,
    pub requests: ResourceList,
    pub node_selector: BTreeMap<String, String>,
    pub tolerations: Vec<Toleration>,
}

impl PodSet {
    pub fn new(name: impl Into<String>, count: u32) -> Self {
        PodSet {
            name: name.into(),
            count,
            min_count: None,
            requests: ResourceList::new(),
            node_selector: BTreeMap::new(),
            tolerations: Vec::new(),
        }
    }

    /// Whether partial admission is enabled and actually allows a reduction.
    pub fn allows_partial_admission(&self) -> bool {
        match self.min_count {
            Some(min) => min < self.count,
            None => false,
        }
    }
}

/// Per pod-set outcome of an admission: the chosen count and, per resource, the
/// flavor it was charged to plus the per-pod amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSetAssignment {
    pub name: String,
    pub count: u32,
    pub flavors: BTreeMap<ResourceName, FlavorName>,
    /// Per-pod amounts. The total charged to the cache is `amount x effective
    /// count`, where reclaimable pods lower the effective count.
    pub resource_usage: BTreeMap<ResourceName, Quantity>,
}

/// The reservation binding a workload to a cluster queue and flavor choices.
/// Present iff the workload holds quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub cluster_queue: ClusterQueueName,
    pub pod_set_assignments: Vec<PodSetAssignment>,
}

impl Admission {
    /// Computes the `(flavor, resource)` usage this admission charges, with
    /// reclaimable pod counts already deducted.
    pub fn usage(&self, reclaimable: &BTreeMap<String, u32>) -> FlavorResourceUsage {
        let mut usage = FlavorResourceUsage::new();
        for assignment in &self.pod_set_assignments {
            let reclaimed = reclaimable.get(&assignment.name).copied().unwrap_or(0);
            let effective_count = assignment.count.saturating_sub(reclaimed);
            for (resource, per_pod) in &assignment.resource_usage {
                if let Some(flavor) = assignment.flavors.get(resource) {
                    usage.add(flavor, resource, per_pod.scale(effective_count));
                }
            }
        }
        return usage;
    }
}

/// The admission unit.
///
/// Mirrors the persisted object: spec fields (`priority`, `queue_name`,
/// `pod_sets`), the status conditions, and the `Admission` reservation. The
/// `resource_version` is the optimistic-concurrency token of the external store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    pub uid: Option<Uuid>,
    pub resource_version: u64,
    pub priority: i32,
    pub priority_class: Option<String>,
    /// Name of the local queue (in the workload's namespace) this workload was
    /// submitted to.
    pub queue_name: String,
    /// Set on child jobs that share their parent's admission; such workloads are
    /// never queued on their own.
    pub parent_workload: Option<String>,
    pub created_at: DateTime<Utc>,
    pub pod_sets: Vec<PodSet>,
    pub conditions: BTreeMap<ConditionType, Condition>,
    pub admission: Option<Admission>,
    pub reclaimable: BTreeMap<String, u32>,
}

impl Workload {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Workload {
            namespace: namespace.into(),
            name: name.into(),
            uid: None,
            resource_version: 0,
            priority: 0,
            priority_class: None,
            queue_name: String::new(),
            parent_workload: None,
            created_at: Utc::now(),
            pod_sets: Vec::new(),
            conditions: BTreeMap::new(),
            admission: None,
            reclaimable: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> WorkloadKey {
        WorkloadKey::namespaced(&self.namespace, &self.name)
    }

    pub fn local_queue_key(&self) -> LocalQueueKey {
        LocalQueueKey::namespaced(&self.namespace, &self.queue_name)
    }

    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions.get(&condition_type)
    }

    pub fn has_condition(&self, condition_type: ConditionType) -> bool {
        self.conditions.get(&condition_type).map(|c| c.status).unwrap_or(false)
    }

    pub fn has_quota_reserved(&self) -> bool {
        self.has_condition(ConditionType::QuotaReserved)
    }

    pub fn is_admitted(&self) -> bool {
        self.has_condition(ConditionType::Admitted)
    }

    pub fn is_finished(&self) -> bool {
        self.has_condition(ConditionType::Finished)
    }

    /// A workload belongs in the pending heaps iff it neither holds quota nor has
    /// finished.
    pub fn is_queueable(&self) -> bool {
        !self.has_quota_reserved() && !self.is_finished() && self.parent_workload.is_none()
    }

    /// Transition time of the `Admitted` condition, used by the preemption
    /// ordering. `None` ranks the workload oldest.
    pub fn admitted_at(&self) -> Option<DateTime<Utc>> {
        self.condition(ConditionType::Admitted).filter(|c| c.status).map(|c| c.last_transition_time)
    }

    /// Sets a condition, keeping the previous transition time when the boolean
    /// status does not change.
    pub fn set_condition(&mut self, condition_type: ConditionType, status: bool, reason: &str, message: String, now: DateTime<Utc>) {
        let transition_time = match self.conditions.get(&condition_type) {
            Some(existing) if existing.status == status => existing.last_transition_time,
            _ => now,
        };
        self.conditions
            .insert(condition_type, Condition { status, reason: reason.to_string(), message, last_transition_time: transition_time });
    }

    pub fn pod_set(&self, name: &str) -> Option<&PodSet> {
        self.pod_sets.iter().find(|ps| ps.name == name)
    }

    /// Ordering key used by the pending heaps: higher priority first, then
    /// earlier creation, then name.
    pub fn queue_ordering(&self, other: &Workload) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.namespace.cmp(&other.namespace))
    }
}
