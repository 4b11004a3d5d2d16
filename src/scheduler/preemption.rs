use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::cluster_queue::AdmittedWorkload;
use crate::cache::snapshot::Snapshot;
use crate::domain::cluster_queue::{PreemptionPolicy, ReclaimWithinCohort, WithinClusterQueue};
use crate::domain::ids::{ClusterQueueName, FlavorName, ResourceName, WorkloadKey};
use crate::domain::quantity::Quantity;
use crate::domain::resources::FlavorResourceUsage;
use crate::domain::workload::{ConditionType, Workload};
use crate::scheduler::assigner::{AssignmentMode, WorkloadAssignment};
use crate::store::{EventRecorder, WorkloadStore, update_with_retry};

/// Reason written on the `Evicted` condition of a preemption victim.
pub const PREEMPTED_REASON: &str = "Preempted";

/// An admitted workload considered for eviction.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub key: WorkloadKey,
    pub cluster_queue: ClusterQueueName,
    pub priority: i32,
    pub admitted_at: Option<DateTime<Utc>>,
}

/// Whether an admitted workload of the preemptor's *own* cluster queue may be
/// evicted under the given policy.
///
/// `LowerOrNewerEqualPriority` also admits equal-priority victims whose
/// admission happened after the incoming workload was created; a victim without
/// a recorded admission time counts as oldest and is never "newer".
pub fn eligible_local_victim(policy: WithinClusterQueue, incoming: &Workload, victim: &AdmittedWorkload) -> bool {
    match policy {
        WithinClusterQueue::Never => false,
        WithinClusterQueue::LowerPriority => victim.priority < incoming.priority,
        WithinClusterQueue::LowerOrNewerEqualPriority => {
            victim.priority < incoming.priority
                || (victim.priority == incoming.priority
                    && victim.admitted_at.map(|admitted| admitted > incoming.created_at).unwrap_or(false))
        }
    }
}

/// Whether an admitted workload of *another* cohort member may be evicted to
/// reclaim borrowed quota.
pub fn eligible_cohort_victim(policy: ReclaimWithinCohort, incoming: &Workload, victim: &AdmittedWorkload) -> bool {
    match policy {
        ReclaimWithinCohort::Never => false,
        ReclaimWithinCohort::LowerPriority => victim.priority < incoming.priority,
        ReclaimWithinCohort::Any => true,
    }
}

/// Total `(flavor, resource)` usage that eligible victims could release for the
/// incoming workload. The assigner uses this to decide whether a `Preempt`
/// assignment is worth proposing at all; the selection below does the exact
/// simulation.
pub fn releasable_usage(
    incoming: &Workload,
    cluster_queue: &ClusterQueueName,
    flavor: &FlavorName,
    resource: &ResourceName,
    snapshot: &Snapshot,
) -> Quantity {
    let Some(queue) = snapshot.cluster_queue(cluster_queue) else {
        return Quantity::ZERO;
    };
    let policy = queue.spec.preemption;
    let mut releasable = Quantity::ZERO;

    for victim in queue.admitted.values() {
        if eligible_local_victim(policy.within_cluster_queue, incoming, victim) {
            releasable += victim.usage().get(flavor, resource);
        }
    }

    if let Some(cohort) = queue.spec.cohort.as_ref() {
        if let Some(members) = snapshot.cohort_members.get(cohort) {
            for member in members {
                if member == cluster_queue {
                    continue;
                }
                if !snapshot.is_borrowing(member, flavor, resource) {
                    continue;
                }
                let Some(peer) = snapshot.cluster_queue(member) else {
                    continue;
                };
                for victim in peer.admitted.values() {
                    if eligible_cohort_victim(policy.reclaim_within_cohort, incoming, victim) {
                        releasable += victim.usage().get(flavor, resource);
                    }
                }
            }
        }
    }

    return releasable;
}

/// Strict ordering over preemption candidates.
///
/// Victims from other cluster queues of the cohort sort first, since reclaiming
/// borrowed quota is preferred over self-preemption. Lower priority breaks
/// ties, then the more recently admitted victim, then the workload key so the
/// order is total and deterministic.
pub struct CandidatesOrdering {
    preemptor_queue: ClusterQueueName,
}

impl CandidatesOrdering {
    pub fn new(preemptor_queue: ClusterQueueName) -> Self {
        Self { preemptor_queue }
    }

    pub fn compare(&self, a: &Candidate, b: &Candidate) -> Ordering {
        let a_foreign = a.cluster_queue != self.preemptor_queue;
        let b_foreign = b.cluster_queue != self.preemptor_queue;

        // Borrowers elsewhere in the cohort come before own workloads.
        b_foreign
            .cmp(&a_foreign)
            .then_with(|| a.priority.cmp(&b.priority))
            // `None < Some(_)`, so comparing b to a puts the newest admission
            // first and workloads without a transition time last (oldest).
            .then_with(|| b.admitted_at.cmp(&a.admitted_at))
            .then_with(|| a.key.cmp(&b.key))
    }
}

/// Selects and evicts victims so a `Preempt` assignment can become a fit.
pub struct Preemptor {
    store: Arc<dyn WorkloadStore>,
    recorder: Arc<dyn EventRecorder>,
    /// Per-victim timeout on the status update; on expiry the pass carries on
    /// and the next pass reconciles.
    update_timeout: Duration,
}

impl Preemptor {
    pub fn new(store: Arc<dyn WorkloadStore>, recorder: Arc<dyn EventRecorder>) -> Self {
        Preemptor { store, recorder, update_timeout: Duration::from_secs(5) }
    }

    pub fn with_update_timeout(mut self, timeout: Duration) -> Self {
        self.update_timeout = timeout;
        self
    }

    /// Picks a locally minimal set of admitted workloads whose removal makes the
    /// assignment fit the snapshot.
    ///
    /// On success the victims stay removed from the snapshot (their usage is
    /// already released there) and their keys are returned in selection order.
    /// If no feasible set exists under policy, every tentative removal is rolled
    /// back and the result is empty: admission is refused for this pass. An
    /// assignment without any `Preempt` decision never touches the snapshot.
    pub fn find_victims(incoming: &Workload, assignment: &WorkloadAssignment, snapshot: &mut Snapshot) -> Vec<WorkloadKey> {
        if assignment.mode() != AssignmentMode::Preempt {
            return Vec::new();
        }

        let target_queue = assignment.cluster_queue.clone();
        let mut candidates = Self::collect_candidates(incoming, assignment, snapshot);
        let ordering = CandidatesOrdering::new(target_queue.clone());
        candidates.sort_by(|a, b| ordering.compare(a, b));

        let mut removed: Vec<(ClusterQueueName, AdmittedWorkload)> = Vec::new();
        for candidate in &candidates {
            if Self::assignment_fits(assignment, snapshot) {
                break;
            }
            if let Some(entry) = snapshot.remove_admitted(&candidate.cluster_queue, &candidate.key) {
                removed.push((candidate.cluster_queue.clone(), entry));
            }
        }

        if !Self::assignment_fits(assignment, snapshot) {
            // The pool ran dry before the assignment fit, put everything back.
            for (cluster_queue, entry) in removed.into_iter().rev() {
                snapshot.restore_admitted(&cluster_queue, entry);
            }
            log::debug!("Preemption for workload {} refused, no feasible victim set under policy.", incoming.key());
            return Vec::new();
        }

        // Minimality pass: walk the selection backwards and keep a victim only
        // if its absence is still required for the fit.
        let mut victims: Vec<(ClusterQueueName, AdmittedWorkload)> = Vec::new();
        for (cluster_queue, entry) in removed.into_iter().rev() {
            snapshot.restore_admitted(&cluster_queue, entry.clone());
            if !Self::assignment_fits(assignment, snapshot) {
                snapshot.remove_admitted(&cluster_queue, &entry.key);
                victims.push((cluster_queue, entry));
            }
        }

        victims.reverse();
        victims.into_iter().map(|(_, entry)| entry.key).collect()
    }

    fn collect_candidates(incoming: &Workload, assignment: &WorkloadAssignment, snapshot: &Snapshot) -> Vec<Candidate> {
        let target_queue = &assignment.cluster_queue;
        let Some(queue) = snapshot.cluster_queue(target_queue) else {
            return Vec::new();
        };
        let policy: PreemptionPolicy = queue.spec.preemption;

        // The (flavor, resource) pairs the assignment could not fit freely.
        let preempt_pairs: Vec<(FlavorName, ResourceName)> = assignment
            .pod_sets
            .iter()
            .flat_map(|pod_set| {
                pod_set
                    .flavors
                    .iter()
                    .filter(|(_, fa)| fa.mode == AssignmentMode::Preempt)
                    .map(|(resource, fa)| (fa.flavor.clone(), resource.clone()))
            })
            .collect();

        let consumes_pair = |victim: &AdmittedWorkload| {
            let usage = victim.usage();
            preempt_pairs.iter().any(|(flavor, resource)| !usage.get(flavor, resource).is_zero())
        };

        let mut candidates = Vec::new();

        for victim in queue.admitted.values() {
            if consumes_pair(victim) && eligible_local_victim(policy.within_cluster_queue, incoming, victim) {
                candidates.push(Candidate {
                    key: victim.key.clone(),
                    cluster_queue: target_queue.clone(),
                    priority: victim.priority,
                    admitted_at: victim.admitted_at,
                });
            }
        }

        if let Some(cohort) = queue.spec.cohort.as_ref() {
            if let Some(members) = snapshot.cohort_members.get(cohort) {
                for member in members {
                    if member == target_queue {
                        continue;
                    }
                    // Only queues holding more than their nominal quota on one of
                    // the contested pairs can be reclaimed from.
                    let borrowing_contested = preempt_pairs.iter().any(|(flavor, resource)| snapshot.is_borrowing(member, flavor, resource));
                    if !borrowing_contested {
                        continue;
                    }
                    let Some(peer) = snapshot.cluster_queue(member) else {
                        continue;
                    };
                    for victim in peer.admitted.values() {
                        if consumes_pair(victim) && eligible_cohort_victim(policy.reclaim_within_cohort, incoming, victim) {
                            candidates.push(Candidate {
                                key: victim.key.clone(),
                                cluster_queue: member.clone(),
                                priority: victim.priority,
                                admitted_at: victim.admitted_at,
                            });
                        }
                    }
                }
            }
        }

        return candidates;
    }

    /// Whether every `(flavor, resource)` demand of the assignment fits the
    /// snapshot's current free capacity.
    fn assignment_fits(assignment: &WorkloadAssignment, snapshot: &Snapshot) -> bool {
        let none = FlavorResourceUsage::new();
        for (flavor, resources) in assignment.total_usage().iter() {
            for (resource, needed) in resources {
                let free = snapshot.free_capacity(&assignment.cluster_queue, flavor, resource, &none);
                if *needed > free {
                    return false;
                }
            }
        }
        return true;
    }

    /// Marks the selected victims evicted in the external store.
    ///
    /// One update task per victim runs concurrently; each retries on conflict
    /// and gives up after the per-call timeout. The external controller observes
    /// the condition, suspends the job, and the admission-removal hook then
    /// releases the victim's quota.
    ///
    /// # Returns
    /// The number of evictions successfully issued. Failures are logged and
    /// counted, never propagated, so one slow victim cannot wedge the pass.
    pub async fn issue_evictions(&self, victims: &[WorkloadKey], preemptor: &WorkloadKey) -> usize {
        if victims.is_empty() {
            return 0;
        }

        let updates = victims.iter().map(|victim| {
            let store = self.store.clone();
            let recorder = self.recorder.clone();
            let victim = victim.clone();
            let message = format!("Preempted to accommodate {}", preemptor);
            let timeout = self.update_timeout;

            async move {
                let now = Utc::now();
                let update = update_with_retry(store.as_ref(), &victim, |workload| {
                    workload.set_condition(ConditionType::Evicted, true, PREEMPTED_REASON, message.clone(), now);
                });

                match tokio::time::timeout(timeout, update).await {
                    Ok(Ok(_)) => {
                        recorder.event(&victim, PREEMPTED_REASON, message.clone()).await;
                        true
                    }
                    Ok(Err(error)) => {
                        log::error!("Evicting workload {} failed: {}", victim, error);
                        false
                    }
                    Err(_) => {
                        log::error!("Evicting workload {} timed out after {:?}.", victim, timeout);
                        false
                    }
                }
            }
        });

        let results = join_all(updates).await;
        let issued = results.iter().filter(|ok| **ok).count();
        if issued < victims.len() {
            log::warn!("Issued {} of {} evictions for preemptor {}; the rest retry next pass.", issued, victims.len(), preemptor);
        }
        return issued;
    }
}
