use std::collections::BTreeMap;

use chrono::Utc;
use cluster_admission::cache::Cache;
use cluster_admission::domain::cluster_queue::{
    ClusterQueueSpec, FlavorQuotas, PreemptionPolicy, ResourceGroup, ResourceQuota, WithinClusterQueue,
};
use cluster_admission::domain::flavor::{ResourceFlavor, Taint, TaintEffect, Toleration, TolerationOperator};
use cluster_admission::domain::ids::{ClusterQueueName, CohortName, FlavorName, ResourceName};
use cluster_admission::domain::quantity::Quantity;
use cluster_admission::domain::workload::{Admission, ConditionType, PodSet, PodSetAssignment, Workload};
use cluster_admission::scheduler::assigner::{AssignResult, AssignmentMode, assign};

fn cpu() -> ResourceName {
    ResourceName::new("cpu")
}

fn queue_with_flavors(name: &str, cohort: Option<&str>, flavors: &[(&str, i64)]) -> ClusterQueueSpec {
    let mut spec = ClusterQueueSpec::new(name);
    spec.cohort = cohort.map(CohortName::new);
    spec.resource_groups.push(ResourceGroup {
        covered_resources: vec![cpu()],
        flavors: flavors
            .iter()
            .map(|(flavor, nominal)| FlavorQuotas {
                flavor: FlavorName::new(*flavor),
                quotas: vec![ResourceQuota { resource: cpu(), nominal: Quantity::from_units(*nominal), borrowing_limit: None }],
            })
            .collect(),
    });
    spec
}

fn pending(name: &str, priority: i32, cpus: i64, count: u32) -> Workload {
    let mut workload = Workload::new("default", name);
    workload.priority = priority;
    workload.queue_name = "queue".to_string();
    let mut pod_set = PodSet::new("main", count);
    pod_set.requests.insert(cpu(), Quantity::from_units(cpus));
    workload.pod_sets.push(pod_set);
    workload
}

fn admitted(name: &str, cluster_queue: &str, flavor: &str, cpus: i64, priority: i32) -> Workload {
    let mut workload = pending(name, priority, cpus, 1);
    let mut flavors = BTreeMap::new();
    flavors.insert(cpu(), FlavorName::new(flavor));
    let mut per_pod = BTreeMap::new();
    per_pod.insert(cpu(), Quantity::from_units(cpus));
    workload.admission = Some(Admission {
        cluster_queue: ClusterQueueName::new(cluster_queue),
        pod_set_assignments: vec![PodSetAssignment { name: "main".to_string(), count: 1, flavors, resource_usage: per_pod }],
    });
    workload.set_condition(ConditionType::QuotaReserved, true, "QuotaReserved", "test".to_string(), Utc::now());
    workload.set_condition(ConditionType::Admitted, true, "Admitted", "test".to_string(), Utc::now());
    workload
}

#[test]
fn fits_on_the_first_flavor_with_capacity() {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("on-demand"));
    cache.add_flavor(ResourceFlavor::new("spot"));
    cache.add_cluster_queue(queue_with_flavors("team", None, &[("on-demand", 2), ("spot", 8)]));

    let snapshot = cache.snapshot();
    let workload = pending("big", 0, 4, 1);

    match assign(&workload, &ClusterQueueName::new("team"), &snapshot) {
        AssignResult::Assigned(assignment) => {
            assert_eq!(assignment.mode(), AssignmentMode::Fit);
            let flavor = &assignment.pod_sets[0].flavors.get(&cpu()).unwrap().flavor;
            assert_eq!(flavor, &FlavorName::new("spot"), "on-demand is too small, spot is the first flavor that fits");
        }
        other => panic!("expected an assignment, got {:?}", other),
    }
}

#[test]
fn spec_order_wins_when_several_flavors_fit() {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("on-demand"));
    cache.add_flavor(ResourceFlavor::new("spot"));
    cache.add_cluster_queue(queue_with_flavors("team", None, &[("on-demand", 8), ("spot", 8)]));

    let snapshot = cache.snapshot();
    match assign(&pending("small", 0, 2, 1), &ClusterQueueName::new("team"), &snapshot) {
        AssignResult::Assigned(assignment) => {
            assert_eq!(assignment.pod_sets[0].flavors.get(&cpu()).unwrap().flavor, FlavorName::new("on-demand"));
        }
        other => panic!("expected an assignment, got {:?}", other),
    }
}

#[test]
fn tainted_flavor_is_skipped_without_a_toleration() {
    let mut spot = ResourceFlavor::new("spot");
    spot.taints.push(Taint { key: "instance".to_string(), value: "spot".to_string(), effect: TaintEffect::NoSchedule });

    let cache = Cache::new();
    cache.add_flavor(spot);
    cache.add_flavor(ResourceFlavor::new("on-demand"));
    cache.add_cluster_queue(queue_with_flavors("team", None, &[("spot", 8), ("on-demand", 8)]));
    let snapshot = cache.snapshot();
    let queue = ClusterQueueName::new("team");

    match assign(&pending("plain", 0, 2, 1), &queue, &snapshot) {
        AssignResult::Assigned(assignment) => {
            assert_eq!(
                assignment.pod_sets[0].flavors.get(&cpu()).unwrap().flavor,
                FlavorName::new("on-demand"),
                "the untolerated spot taint must push the pod set to on-demand"
            );
        }
        other => panic!("expected an assignment, got {:?}", other),
    }

    let mut tolerant = pending("tolerant", 0, 2, 1);
    tolerant.pod_sets[0].tolerations.push(Toleration {
        key: Some("instance".to_string()),
        operator: TolerationOperator::Equal,
        value: Some("spot".to_string()),
        effect: None,
    });
    match assign(&tolerant, &queue, &snapshot) {
        AssignResult::Assigned(assignment) => {
            assert_eq!(assignment.pod_sets[0].flavors.get(&cpu()).unwrap().flavor, FlavorName::new("spot"));
        }
        other => panic!("expected an assignment, got {:?}", other),
    }
}

#[test]
fn uncovered_resource_is_infeasible() {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("default"));
    cache.add_cluster_queue(queue_with_flavors("team", None, &[("default", 8)]));
    let snapshot = cache.snapshot();

    let mut workload = pending("gpu-job", 0, 1, 1);
    workload.pod_sets[0].requests.insert(ResourceName::new("nvidia.com/gpu"), Quantity::from_units(1));

    match assign(&workload, &ClusterQueueName::new("team"), &snapshot) {
        AssignResult::Infeasible(reason) => assert!(reason.contains("nvidia.com/gpu"), "reason must name the resource: {}", reason),
        other => panic!("expected infeasible, got {:?}", other),
    }
}

#[test]
fn request_beyond_all_quota_is_infeasible_without_preemption_help() {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("default"));
    let mut spec = queue_with_flavors("team", None, &[("default", 4)]);
    spec.preemption = PreemptionPolicy { within_cluster_queue: WithinClusterQueue::LowerPriority, ..Default::default() };
    cache.add_cluster_queue(spec);
    let snapshot = cache.snapshot();

    // 6 CPUs can never fit a 4 CPU quota, admitted workloads or not.
    match assign(&pending("huge", 5, 6, 1), &ClusterQueueName::new("team"), &snapshot) {
        AssignResult::Infeasible(_) => {}
        other => panic!("expected infeasible, got {:?}", other),
    }
}

#[test]
fn full_queue_with_evictable_workloads_yields_a_preempt_assignment() {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("default"));
    let mut spec = queue_with_flavors("team", None, &[("default", 6)]);
    spec.preemption = PreemptionPolicy { within_cluster_queue: WithinClusterQueue::LowerPriority, ..Default::default() };
    cache.add_cluster_queue(spec);

    cache.assume_admission(&admitted("low", "team", "default", 6, -1)).unwrap();
    let snapshot = cache.snapshot();

    match assign(&pending("urgent", 1, 2, 1), &ClusterQueueName::new("team"), &snapshot) {
        AssignResult::Assigned(assignment) => {
            assert_eq!(assignment.mode(), AssignmentMode::Preempt);
        }
        other => panic!("expected a preempt assignment, got {:?}", other),
    }
}

#[test]
fn borrowing_from_the_cohort_counts_as_a_fit() {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("default"));
    cache.add_cluster_queue(queue_with_flavors("c1", Some("shared"), &[("default", 4)]));
    cache.add_cluster_queue(queue_with_flavors("c2", Some("shared"), &[("default", 4)]));
    let snapshot = cache.snapshot();

    // 6 CPUs exceed c1's nominal 4 but fit with the cohort's unused quota.
    match assign(&pending("borrower", 0, 6, 1), &ClusterQueueName::new("c1"), &snapshot) {
        AssignResult::Assigned(assignment) => assert_eq!(assignment.mode(), AssignmentMode::Fit),
        other => panic!("expected a borrowing fit, got {:?}", other),
    }
}

#[test]
fn borrowing_limit_caps_the_cohort_fit() {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("default"));

    let mut c1 = queue_with_flavors("c1", Some("shared"), &[("default", 4)]);
    c1.resource_groups[0].flavors[0].quotas[0].borrowing_limit = Some(Quantity::from_units(1));
    cache.add_cluster_queue(c1);
    cache.add_cluster_queue(queue_with_flavors("c2", Some("shared"), &[("default", 4)]));
    let snapshot = cache.snapshot();

    match assign(&pending("capped", 0, 6, 1), &ClusterQueueName::new("c1"), &snapshot) {
        AssignResult::Infeasible(_) => {}
        other => panic!("a borrowing limit of 1 cannot cover a 2 CPU deficit, got {:?}", other),
    }
}

#[test]
fn partial_admission_reduces_to_the_largest_fitting_count() {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("default"));
    cache.add_cluster_queue(queue_with_flavors("team", None, &[("default", 6)]));
    let snapshot = cache.snapshot();

    let mut workload = pending("elastic", 0, 2, 5);
    workload.pod_sets[0].min_count = Some(1);

    match assign(&workload, &ClusterQueueName::new("team"), &snapshot) {
        AssignResult::Assigned(assignment) => {
            assert_eq!(assignment.mode(), AssignmentMode::Fit);
            assert_eq!(assignment.pod_sets[0].count, 3, "3 pods of 2 CPUs are the most that fit 6 CPUs");
        }
        other => panic!("expected a partial fit, got {:?}", other),
    }
}

#[test]
fn min_count_equal_to_count_disables_partial_admission() {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("default"));
    cache.add_cluster_queue(queue_with_flavors("team", None, &[("default", 6)]));
    let snapshot = cache.snapshot();

    let mut workload = pending("rigid", 0, 2, 5);
    workload.pod_sets[0].min_count = Some(5);

    match assign(&workload, &ClusterQueueName::new("team"), &snapshot) {
        AssignResult::Infeasible(_) => {}
        other => panic!("minCount == count must behave as non-partial, got {:?}", other),
    }
}

#[test]
fn below_min_count_is_infeasible() {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("default"));
    cache.add_cluster_queue(queue_with_flavors("team", None, &[("default", 6)]));
    let snapshot = cache.snapshot();

    let mut workload = pending("too-wide", 0, 2, 8);
    workload.pod_sets[0].min_count = Some(4);

    match assign(&workload, &ClusterQueueName::new("team"), &snapshot) {
        AssignResult::Infeasible(_) => {}
        other => panic!("even the minimum of 4 pods needs 8 CPUs, got {:?}", other),
    }
}

#[test]
fn later_pod_sets_see_earlier_claims_of_the_same_workload() {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("default"));
    cache.add_cluster_queue(queue_with_flavors("team", None, &[("default", 6)]));
    let snapshot = cache.snapshot();

    let mut workload = Workload::new("default", "two-sets");
    workload.queue_name = "queue".to_string();
    let mut first = PodSet::new("driver", 1);
    first.requests.insert(cpu(), Quantity::from_units(4));
    let mut second = PodSet::new("workers", 2);
    second.requests.insert(cpu(), Quantity::from_units(2));
    workload.pod_sets.push(first);
    workload.pod_sets.push(second);

    // 4 + 2x2 = 8 CPUs over a 6 CPU quota: the second pod set must not fit on
    // top of the first one's claim.
    match assign(&workload, &ClusterQueueName::new("team"), &snapshot) {
        AssignResult::Infeasible(_) => {}
        other => panic!("expected infeasible, got {:?}", other),
    }
}

#[test]
fn output_depends_only_on_workload_and_snapshot() {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("on-demand"));
    cache.add_flavor(ResourceFlavor::new("spot"));
    cache.add_cluster_queue(queue_with_flavors("team", None, &[("on-demand", 4), ("spot", 8)]));
    cache.assume_admission(&admitted("existing", "team", "on-demand", 3, 0)).unwrap();

    let snapshot = cache.snapshot();
    let workload = pending("repeat", 0, 2, 2);
    let queue = ClusterQueueName::new("team");

    let first = assign(&workload, &queue, &snapshot);
    for _ in 0..10 {
        assert_eq!(assign(&workload, &queue, &snapshot), first, "the assigner must be deterministic");
    }
}
