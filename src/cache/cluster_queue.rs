use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::domain::cluster_queue::ClusterQueueSpec;
use crate::domain::ids::WorkloadKey;
use crate::domain::resources::FlavorResourceUsage;
use crate::domain::workload::{Admission, Workload};
use crate::error::{Error, Result};

/// Summary of an admitted workload, as tracked by the cache and copied into
/// snapshots: everything the assigner and the preemption engine need without
/// holding the full object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmittedWorkload {
    pub key: WorkloadKey,
    pub priority: i32,
    /// Transition time of the `Admitted` condition. `None` ranks the workload
    /// oldest in the preemption ordering.
    pub admitted_at: Option<DateTime<Utc>>,
    pub admission: Admission,
    pub reclaimable: BTreeMap<String, u32>,
}

impl AdmittedWorkload {
    /// Builds the summary from a workload that holds an admission.
    pub fn from_workload(workload: &Workload) -> Result<AdmittedWorkload> {
        let admission = workload
            .admission
            .clone()
            .ok_or_else(|| Error::InvariantViolation(format!("workload {} has no admission to account", workload.key())))?;

        Ok(AdmittedWorkload {
            key: workload.key(),
            priority: workload.priority,
            admitted_at: workload.admitted_at(),
            admission,
            reclaimable: workload.reclaimable.clone(),
        })
    }

    /// The `(flavor, resource)` amounts this workload charges against its queue.
    pub fn usage(&self) -> FlavorResourceUsage {
        self.admission.usage(&self.reclaimable)
    }
}

/// A cluster queue as the cache sees it: the spec plus runtime usage and the set
/// of admitted workloads charged against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterQueue {
    pub spec: ClusterQueueSpec,
    pub usage: FlavorResourceUsage,
    pub admitted: BTreeMap<WorkloadKey, AdmittedWorkload>,
    pub active: bool,
    pub inactive_reason: Option<String>,
}

impl ClusterQueue {
    pub fn new(spec: ClusterQueueSpec) -> Self {
        ClusterQueue { spec, usage: FlavorResourceUsage::new(), admitted: BTreeMap::new(), active: false, inactive_reason: None }
    }

    /// Charges an admitted workload against this queue.
    ///
    /// # Returns
    /// `Error::InvariantViolation` if the workload is already accounted here.
    /// Creating an admission is the only act that increases usage, so a double
    /// add means the caller lost track of state.
    pub fn add_admitted(&mut self, entry: AdmittedWorkload) -> Result<()> {
        if self.admitted.contains_key(&entry.key) {
            return Err(Error::InvariantViolation(format!("workload {} is already admitted in cluster queue {}", entry.key, self.spec.name)));
        }

        self.usage.add_all(&entry.usage());
        self.admitted.insert(entry.key.clone(), entry);
        Ok(())
    }

    /// Releases an admitted workload's charge.
    pub fn remove_admitted(&mut self, key: &WorkloadKey) -> Option<AdmittedWorkload> {
        let entry = self.admitted.remove(key)?;
        self.usage.sub_all(&entry.usage());
        Some(entry)
    }

    /// Updates the reclaimable pod counts of an admitted workload, lowering its
    /// effective usage without removing the admission.
    pub fn set_reclaimable(&mut self, key: &WorkloadKey, counts: BTreeMap<String, u32>) -> Result<()> {
        let entry = self
            .admitted
            .get_mut(key)
            .ok_or_else(|| Error::NotFound(format!("workload {} is not admitted in cluster queue {}", key, self.spec.name)))?;

        self.usage.sub_all(&entry.usage());
        entry.reclaimable = counts;
        self.usage.add_all(&entry.usage());
        Ok(())
    }

    pub fn usage_ratio(&self) -> f64 {
        usage_ratio(&self.spec, &self.usage)
    }
}

/// Fairness key for the scheduler pass: total usage over total nominal quota,
/// in milli units. Queues without any nominal quota rank as fully used.
pub fn usage_ratio(spec: &ClusterQueueSpec, usage: &FlavorResourceUsage) -> f64 {
    let mut nominal_total: i64 = 0;
    for (_, quota) in spec.all_quotas() {
        nominal_total += quota.nominal.millis();
    }
    if nominal_total == 0 {
        return 1.0;
    }

    let mut usage_total: i64 = 0;
    for (_, resources) in usage.iter() {
        for (_, amount) in resources {
            usage_total += amount.millis();
        }
    }

    return usage_total as f64 / nominal_total as f64;
}
