use std::collections::BTreeMap;

use crate::cache::snapshot::Snapshot;
use crate::domain::ids::{ClusterQueueName, FlavorName, ResourceName};
use crate::domain::quantity::Quantity;
use crate::domain::resources::FlavorResourceUsage;
use crate::domain::workload::{Admission, PodSet, PodSetAssignment, Workload};
use crate::scheduler::preemption;

/// How an assigned flavor gets its capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentMode {
    /// Fits in currently free quota (possibly by borrowing from the cohort).
    Fit,
    /// Needs evictions first; the preemption engine decides whether they exist.
    Preempt,
}

/// The flavor decision for one `(pod-set, resource)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlavorAssignment {
    pub flavor: FlavorName,
    pub mode: AssignmentMode,
}

/// Flavor decisions of one pod-set, at a possibly reduced count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSetFlavors {
    pub name: String,
    pub count: u32,
    pub flavors: BTreeMap<ResourceName, FlavorAssignment>,
    pub per_pod: BTreeMap<ResourceName, Quantity>,
}

/// The full assignment of a workload against one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadAssignment {
    pub cluster_queue: ClusterQueueName,
    pub pod_sets: Vec<PodSetFlavors>,
}

impl WorkloadAssignment {
    /// `Preempt` as soon as any single decision needs evictions.
    pub fn mode(&self) -> AssignmentMode {
        let preempting = self
            .pod_sets
            .iter()
            .any(|pod_set| pod_set.flavors.values().any(|assignment| assignment.mode == AssignmentMode::Preempt));
        if preempting { AssignmentMode::Preempt } else { AssignmentMode::Fit }
    }

    /// Total `(flavor, resource)` demand of this assignment.
    pub fn total_usage(&self) -> FlavorResourceUsage {
        let mut total = FlavorResourceUsage::new();
        for pod_set in &self.pod_sets {
            for (resource, assignment) in &pod_set.flavors {
                let per_pod = pod_set.per_pod.get(resource).copied().unwrap_or(Quantity::ZERO);
                total.add(&assignment.flavor, resource, per_pod.scale(pod_set.count));
            }
        }
        total
    }

    /// Renders the assignment into the admission persisted on the workload.
    pub fn to_admission(&self) -> Admission {
        Admission {
            cluster_queue: self.cluster_queue.clone(),
            pod_set_assignments: self
                .pod_sets
                .iter()
                .map(|pod_set| PodSetAssignment {
                    name: pod_set.name.clone(),
                    count: pod_set.count,
                    flavors: pod_set.flavors.iter().map(|(resource, assignment)| (resource.clone(), assignment.flavor.clone())).collect(),
                    resource_usage: pod_set.per_pod.clone(),
                })
                .collect(),
        }
    }
}

/// Outcome of one assignment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignResult {
    Assigned(WorkloadAssignment),
    /// The workload cannot run in this cluster queue in its current state; the
    /// reason names the first resource that failed.
    Infeasible(String),
}

/// Decides whether a workload fits a snapshot, and on which flavors.
///
/// The assigner is a pure function of `(workload, snapshot)`: it walks pod-sets
/// in spec order, resources in name order, and flavors in resource-group order,
/// so two runs over the same inputs produce the same assignment.
pub fn assign(workload: &Workload, cluster_queue: &ClusterQueueName, snapshot: &Snapshot) -> AssignResult {
    let Some(queue) = snapshot.cluster_queue(cluster_queue) else {
        return AssignResult::Infeasible(format!("cluster queue {} is not known to the snapshot", cluster_queue));
    };
    if !queue.active {
        return AssignResult::Infeasible(format!("cluster queue {} is inactive", cluster_queue));
    }

    // Claims accumulated by earlier pod-sets of this same workload, so the
    // later ones do not double-book the same free capacity.
    let mut claimed = FlavorResourceUsage::new();
    let mut pod_sets = Vec::with_capacity(workload.pod_sets.len());

    for pod_set in &workload.pod_sets {
        // Full parallelism without evictions first.
        let full_fit = assign_pod_set(workload, pod_set, pod_set.count, cluster_queue, snapshot, &claimed, false);

        let chosen = match full_fit {
            Ok(draft) => draft,
            Err(_) if pod_set.allows_partial_admission() => {
                match largest_fitting_count(workload, pod_set, cluster_queue, snapshot, &claimed) {
                    Some(draft) => draft,
                    // No reduced count fits freely. Evictions are only worth it
                    // for the full parallelism, so the preemption attempt uses
                    // the spec count again.
                    None => match assign_pod_set(workload, pod_set, pod_set.count, cluster_queue, snapshot, &claimed, true) {
                        Ok(draft) => draft,
                        Err(reason) => return AssignResult::Infeasible(reason),
                    },
                }
            }
            Err(_) => match assign_pod_set(workload, pod_set, pod_set.count, cluster_queue, snapshot, &claimed, true) {
                Ok(draft) => draft,
                Err(reason) => return AssignResult::Infeasible(reason),
            },
        };

        for (resource, assignment) in &chosen.flavors {
            let per_pod = chosen.per_pod.get(resource).copied().unwrap_or(Quantity::ZERO);
            claimed.add(&assignment.flavor, resource, per_pod.scale(chosen.count));
        }
        pod_sets.push(chosen);
    }

    AssignResult::Assigned(WorkloadAssignment { cluster_queue: cluster_queue.clone(), pod_sets })
}

/// Tries to bind every resource of one pod-set at the given count.
///
/// With `allow_preempt` the per-resource decision may fall back to `Preempt`
/// when no flavor has the capacity free but eligible victims could release
/// enough; the preempting flavor is picked by the smallest shortfall, ties going
/// to spec order.
fn assign_pod_set(
    workload: &Workload,
    pod_set: &PodSet,
    count: u32,
    cluster_queue: &ClusterQueueName,
    snapshot: &Snapshot,
    claimed: &FlavorResourceUsage,
    allow_preempt: bool,
) -> std::result::Result<PodSetFlavors, String> {
    let queue = snapshot.cluster_queue(cluster_queue).expect("caller verified the cluster queue");
    let mut flavors: BTreeMap<ResourceName, FlavorAssignment> = BTreeMap::new();

    for (resource, request) in &pod_set.requests {
        let Some(group) = queue.spec.group_for(resource) else {
            return Err(format!("no resource group in cluster queue {} covers resource {}", cluster_queue, resource));
        };

        let needed = request.scale(count);
        let mut fit: Option<FlavorName> = None;
        // (shortfall in millis, flavor); smaller shortfall wins, spec order breaks ties.
        let mut preempt: Option<(i64, FlavorName)> = None;

        for flavor_quotas in &group.flavors {
            let flavor_name = &flavor_quotas.flavor;
            let Some(flavor) = snapshot.flavors.get(flavor_name) else {
                continue;
            };
            if !flavor.matches(&pod_set.node_selector, &pod_set.tolerations) {
                continue;
            }

            let free = snapshot.free_capacity(cluster_queue, flavor_name, resource, claimed);
            if needed <= free {
                fit = Some(flavor_name.clone());
                break;
            }

            if allow_preempt {
                let signed_free = snapshot.free_capacity_signed(cluster_queue, flavor_name, resource, claimed);
                let releasable = preemption::releasable_usage(workload, cluster_queue, flavor_name, resource, snapshot);
                if signed_free + releasable.millis() >= needed.millis() {
                    let shortfall = needed.millis() - signed_free;
                    let better = match &preempt {
                        Some((best, _)) => shortfall < *best,
                        None => true,
                    };
                    if better {
                        preempt = Some((shortfall, flavor_name.clone()));
                    }
                }
            }
        }

        match (fit, preempt) {
            (Some(flavor), _) => {
                flavors.insert(resource.clone(), FlavorAssignment { flavor, mode: AssignmentMode::Fit });
            }
            (None, Some((_, flavor))) => {
                flavors.insert(resource.clone(), FlavorAssignment { flavor, mode: AssignmentMode::Preempt });
            }
            (None, None) => {
                return Err(format!(
                    "resource {} of pod set {} does not fit any flavor of cluster queue {} at count {}",
                    resource, pod_set.name, cluster_queue, count
                ));
            }
        }
    }

    Ok(PodSetFlavors { name: pod_set.name.clone(), count, flavors, per_pod: pod_set.requests.clone() })
}

/// Binary search for the largest count in `[min_count, count - 1]` whose
/// assignment fits without any eviction. Fitting is monotone in the count, so
/// the search is sound.
fn largest_fitting_count(
    workload: &Workload,
    pod_set: &PodSet,
    cluster_queue: &ClusterQueueName,
    snapshot: &Snapshot,
    claimed: &FlavorResourceUsage,
) -> Option<PodSetFlavors> {
    let min_count = pod_set.min_count.expect("caller verified partial admission");
    let fits = |count: u32| assign_pod_set(workload, pod_set, count, cluster_queue, snapshot, claimed, false).ok();

    let mut low = min_count;
    let mut high = pod_set.count - 1;
    while low < high {
        let mid = low + (high - low + 1) / 2;
        if fits(mid).is_some() {
            low = mid;
        } else {
            high = mid - 1;
        }
    }

    let draft = fits(low)?;
    log::info!(
        "Pod set {} of workload {} admitted partially with count {} of {} (minimum {}).",
        pod_set.name,
        workload.key(),
        low,
        pod_set.count,
        min_count
    );
    return Some(draft);
}
