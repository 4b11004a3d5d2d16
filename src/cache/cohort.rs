use std::collections::{BTreeMap, BTreeSet};

use crate::domain::ids::{ClusterQueueName, CohortName};

/// Index of cohort membership.
///
/// Cohorts are implicit: a cluster queue names its cohort and membership follows
/// from that name. The index owns the member sets; cluster queues store only the
/// name. Totals over a cohort are always computed by iterating the member list,
/// never kept as running sums that could drift.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CohortIndex {
    members: BTreeMap<CohortName, BTreeSet<ClusterQueueName>>,
}

impl CohortIndex {
    pub fn new() -> Self {
        CohortIndex { members: BTreeMap::new() }
    }

    pub fn link(&mut self, cohort: &CohortName, cluster_queue: &ClusterQueueName) {
        self.members.entry(cohort.clone()).or_default().insert(cluster_queue.clone());
    }

    /// Unlinks a member; empty cohorts disappear from the index.
    pub fn unlink(&mut self, cohort: &CohortName, cluster_queue: &ClusterQueueName) {
        let mut drop_cohort = false;
        if let Some(set) = self.members.get_mut(cohort) {
            set.remove(cluster_queue);
            drop_cohort = set.is_empty();
        }
        if drop_cohort {
            self.members.remove(cohort);
        }
    }

    pub fn members(&self, cohort: &CohortName) -> Option<&BTreeSet<ClusterQueueName>> {
        self.members.get(cohort)
    }

    pub fn all(&self) -> &BTreeMap<CohortName, BTreeSet<ClusterQueueName>> {
        &self.members
    }
}
