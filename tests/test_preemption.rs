use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use cluster_admission::cache::Cache;
use cluster_admission::domain::cluster_queue::{
    ClusterQueueSpec, FlavorQuotas, PreemptionPolicy, ReclaimWithinCohort, ResourceGroup, ResourceQuota, WithinClusterQueue,
};
use cluster_admission::domain::flavor::ResourceFlavor;
use cluster_admission::domain::ids::{ClusterQueueName, CohortName, FlavorName, ResourceName, WorkloadKey};
use cluster_admission::domain::quantity::Quantity;
use cluster_admission::domain::workload::{Admission, ConditionType, PodSet, PodSetAssignment, Workload};
use cluster_admission::scheduler::assigner::{AssignResult, AssignmentMode, FlavorAssignment, PodSetFlavors, WorkloadAssignment, assign};
use cluster_admission::scheduler::preemption::{Candidate, CandidatesOrdering, Preemptor};

fn resource(name: &str) -> ResourceName {
    ResourceName::new(name)
}

fn queue(name: &str, cohort: Option<&str>, res: &str, flavors: &[(&str, i64)], policy: PreemptionPolicy) -> ClusterQueueSpec {
    let mut spec = ClusterQueueSpec::new(name);
    spec.cohort = cohort.map(CohortName::new);
    spec.preemption = policy;
    spec.resource_groups.push(ResourceGroup {
        covered_resources: vec![resource(res)],
        flavors: flavors
            .iter()
            .map(|(flavor, nominal)| FlavorQuotas {
                flavor: FlavorName::new(*flavor),
                quotas: vec![ResourceQuota { resource: resource(res), nominal: Quantity::from_units(*nominal), borrowing_limit: None }],
            })
            .collect(),
    });
    spec
}

fn lower_priority_policy() -> PreemptionPolicy {
    PreemptionPolicy { within_cluster_queue: WithinClusterQueue::LowerPriority, reclaim_within_cohort: ReclaimWithinCohort::LowerPriority }
}

fn pending(name: &str, priority: i32, res: &str, amount: i64, count: u32) -> Workload {
    let mut workload = Workload::new("default", name);
    workload.priority = priority;
    workload.queue_name = "queue".to_string();
    let mut pod_set = PodSet::new("main", count);
    pod_set.requests.insert(resource(res), Quantity::from_units(amount));
    workload.pod_sets.push(pod_set);
    workload
}

fn admit(cache: &Cache, name: &str, cluster_queue: &str, flavor: &str, res: &str, amount: i64, priority: i32, admitted_seconds_ago: i64) {
    let mut workload = pending(name, priority, res, amount, 1);
    let mut flavors = BTreeMap::new();
    flavors.insert(resource(res), FlavorName::new(flavor));
    let mut per_pod = BTreeMap::new();
    per_pod.insert(resource(res), Quantity::from_units(amount));
    workload.admission = Some(Admission {
        cluster_queue: ClusterQueueName::new(cluster_queue),
        pod_set_assignments: vec![PodSetAssignment { name: "main".to_string(), count: 1, flavors, resource_usage: per_pod }],
    });

    let admitted_at = Utc::now() - Duration::seconds(admitted_seconds_ago);
    workload.set_condition(ConditionType::QuotaReserved, true, "QuotaReserved", "test".to_string(), admitted_at);
    workload.set_condition(ConditionType::Admitted, true, "Admitted", "test".to_string(), admitted_at);
    cache.assume_admission(&workload).unwrap();
}

fn find_victims_for(cache: &Cache, incoming: &Workload, cluster_queue: &str) -> Vec<WorkloadKey> {
    let mut snapshot = cache.snapshot();
    let assignment = match assign(incoming, &ClusterQueueName::new(cluster_queue), &snapshot) {
        AssignResult::Assigned(assignment) => assignment,
        AssignResult::Infeasible(reason) => panic!("assignment unexpectedly infeasible: {}", reason),
    };
    assert_eq!(assignment.mode(), AssignmentMode::Preempt, "these scenarios expect a preempting assignment");
    Preemptor::find_victims(incoming, &assignment, &mut snapshot)
}

fn keys(names: &[&str]) -> Vec<WorkloadKey> {
    names.iter().map(|name| WorkloadKey::namespaced("default", name)).collect()
}

// Scenario: a full standalone queue preempts exactly the lowest-priority victim.
#[test]
fn basic_admit_preempts_the_low_priority_workload_only() {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("default"));
    cache.add_cluster_queue(queue("standalone", None, "cpu", &[("default", 6)], lower_priority_policy()));
    admit(&cache, "low", "standalone", "default", "cpu", 2, -1, 30);
    admit(&cache, "mid", "standalone", "default", "cpu", 2, 0, 20);
    admit(&cache, "high", "standalone", "default", "cpu", 2, 1, 10);

    let incoming = pending("incoming", 1, "cpu", 2, 1);
    assert_eq!(find_victims_for(&cache, &incoming, "standalone"), keys(&["low"]));
}

// Scenario: a larger request walks up the priority ladder, but no further.
#[test]
fn multi_victim_preemption_takes_low_and_mid() {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("default"));
    cache.add_cluster_queue(queue("standalone", None, "cpu", &[("default", 6)], lower_priority_policy()));
    admit(&cache, "low", "standalone", "default", "cpu", 2, -1, 30);
    admit(&cache, "mid", "standalone", "default", "cpu", 2, 0, 20);
    admit(&cache, "high", "standalone", "default", "cpu", 2, 1, 10);

    let incoming = pending("incoming", 1, "cpu", 3, 1);
    assert_eq!(find_victims_for(&cache, &incoming, "standalone"), keys(&["low", "mid"]));
}

// Scenario: reclaiming from a cohort borrower beats preempting locally, even
// though the local victim has lower priority than the borrower's workload.
#[test]
fn reclaim_prefers_the_cohort_borrower_over_local_victims() {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("default"));
    cache.add_cluster_queue(queue("c1", Some("shared"), "cpu", &[("default", 6)], lower_priority_policy()));
    cache.add_cluster_queue(queue("c2", Some("shared"), "cpu", &[("default", 6)], lower_priority_policy()));

    admit(&cache, "c1-low", "c1", "default", "cpu", 3, -1, 30);
    admit(&cache, "c2-mid", "c2", "default", "cpu", 3, 0, 20);
    admit(&cache, "c2-high", "c2", "default", "cpu", 6, 1, 10);

    let incoming = pending("incoming", 1, "cpu", 3, 1);
    assert_eq!(find_victims_for(&cache, &incoming, "c1"), keys(&["c2-mid"]), "the borrower in the cohort must go before any local workload");
}

// Scenario: two pod sets pinned to different flavors evict one victim per flavor.
#[test]
fn per_pod_set_flavor_choice_takes_one_victim_per_flavor() {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("alpha"));
    cache.add_flavor(ResourceFlavor::new("beta"));

    let mut spec = ClusterQueueSpec::new("team");
    spec.preemption = lower_priority_policy();
    spec.resource_groups.push(ResourceGroup {
        covered_resources: vec![resource("memory")],
        flavors: vec![
            FlavorQuotas {
                flavor: FlavorName::new("alpha"),
                quotas: vec![ResourceQuota { resource: resource("memory"), nominal: Quantity::parse("2Gi").unwrap(), borrowing_limit: None }],
            },
            FlavorQuotas {
                flavor: FlavorName::new("beta"),
                quotas: vec![ResourceQuota { resource: resource("memory"), nominal: Quantity::parse("2Gi").unwrap(), borrowing_limit: None }],
            },
        ],
    });
    cache.add_cluster_queue(spec);

    admit(&cache, "low-alpha", "team", "alpha", "memory", 2 * 1024 * 1024 * 1024, -1, 30);
    admit(&cache, "low-beta", "team", "beta", "memory", 2 * 1024 * 1024 * 1024, -1, 20);

    let mut incoming = Workload::new("default", "incoming");
    incoming.priority = 0;
    incoming.queue_name = "queue".to_string();
    let mut launcher = PodSet::new("launcher", 1);
    launcher.requests.insert(resource("memory"), Quantity::parse("2Gi").unwrap());
    let mut workers = PodSet::new("workers", 2);
    workers.requests.insert(resource("memory"), Quantity::parse("1Gi").unwrap());
    incoming.pod_sets.push(launcher);
    incoming.pod_sets.push(workers);

    let mut victims = find_victims_for(&cache, &incoming, "team");
    victims.sort();
    assert_eq!(victims, keys(&["low-alpha", "low-beta"]));
}

// Scenario: under LowerOrNewerEqualPriority the equal-priority victim with the
// newest admission goes first, protecting older equal-priority workloads.
#[test]
fn starvation_prevention_evicts_the_newest_equal_priority_admission() {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("default"));
    let policy = PreemptionPolicy {
        within_cluster_queue: WithinClusterQueue::LowerOrNewerEqualPriority,
        reclaim_within_cohort: ReclaimWithinCohort::Never,
    };
    cache.add_cluster_queue(queue("team", None, "cpu", &[("default", 6)], policy));

    admit(&cache, "wl1", "team", "default", "cpu", 2, 2, 30);
    admit(&cache, "wl2", "team", "default", "cpu", 2, 1, 1);
    admit(&cache, "wl3", "team", "default", "cpu", 2, 1, 10);

    let mut incoming = pending("incoming", 1, "cpu", 2, 1);
    incoming.created_at = Utc::now() - Duration::seconds(15);

    assert_eq!(find_victims_for(&cache, &incoming, "team"), keys(&["wl2"]), "wl2 was admitted after the incoming workload was created");
}

#[test]
fn preemption_is_refused_when_no_eligible_victims_remain() {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("default"));
    cache.add_cluster_queue(queue("team", None, "cpu", &[("default", 6)], lower_priority_policy()));
    admit(&cache, "high-a", "team", "default", "cpu", 3, 5, 30);
    admit(&cache, "high-b", "team", "default", "cpu", 3, 5, 20);

    let mut snapshot = cache.snapshot();
    let incoming = pending("incoming", 1, "cpu", 2, 1);
    // The assigner refuses to propose Preempt here; drive the engine directly
    // with a hand-built preempting assignment to exercise the refusal path.
    let mut flavors = BTreeMap::new();
    flavors.insert(resource("cpu"), FlavorAssignment { flavor: FlavorName::new("default"), mode: AssignmentMode::Preempt });
    let mut per_pod = BTreeMap::new();
    per_pod.insert(resource("cpu"), Quantity::from_units(2));
    let assignment = WorkloadAssignment {
        cluster_queue: ClusterQueueName::new("team"),
        pod_sets: vec![PodSetFlavors { name: "main".to_string(), count: 1, flavors, per_pod }],
    };
    let before = snapshot.clone();
    let victims = Preemptor::find_victims(&incoming, &assignment, &mut snapshot);
    assert!(victims.is_empty());
    assert_eq!(snapshot, before, "a refused preemption must leave the snapshot untouched");
}

#[test]
fn fit_assignment_never_mutates_the_snapshot() {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("default"));
    cache.add_cluster_queue(queue("team", None, "cpu", &[("default", 6)], lower_priority_policy()));
    admit(&cache, "resident", "team", "default", "cpu", 2, 0, 30);

    let mut snapshot = cache.snapshot();
    let incoming = pending("incoming", 1, "cpu", 2, 1);
    let assignment = match assign(&incoming, &ClusterQueueName::new("team"), &snapshot) {
        AssignResult::Assigned(assignment) => assignment,
        other => panic!("expected a fit, got {:?}", other),
    };
    assert_eq!(assignment.mode(), AssignmentMode::Fit);

    let before = snapshot.clone();
    let victims = Preemptor::find_victims(&incoming, &assignment, &mut snapshot);
    assert!(victims.is_empty());
    assert_eq!(snapshot, before, "an empty want-set must be a strict no-op on the snapshot");
}

#[test]
fn minimality_pass_drops_unneeded_victims() {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("default"));
    cache.add_cluster_queue(queue("team", None, "cpu", &[("default", 6)], lower_priority_policy()));
    // Three victims of 2 CPUs each; the incoming needs 2, so one eviction must
    // suffice no matter how greedy the walk was.
    admit(&cache, "v1", "team", "default", "cpu", 2, -3, 30);
    admit(&cache, "v2", "team", "default", "cpu", 2, -2, 20);
    admit(&cache, "v3", "team", "default", "cpu", 2, -1, 10);

    let incoming = pending("incoming", 1, "cpu", 2, 1);
    let victims = find_victims_for(&cache, &incoming, "team");
    assert_eq!(victims.len(), 1, "a locally minimal victim set evicts exactly one 2 CPU workload");
}

#[test]
fn candidates_ordering_is_strict_and_deterministic() {
    let team = ClusterQueueName::new("team");
    let other = ClusterQueueName::new("other");
    let now = Utc::now();

    let candidate = |name: &str, queue: &ClusterQueueName, priority: i32, admitted_seconds_ago: Option<i64>| Candidate {
        key: WorkloadKey::namespaced("default", name),
        cluster_queue: queue.clone(),
        priority,
        admitted_at: admitted_seconds_ago.map(|seconds| now - Duration::seconds(seconds)),
    };

    let ordering = CandidatesOrdering::new(team.clone());
    let mut candidates = vec![
        candidate("own-old", &team, 0, Some(100)),
        candidate("own-new", &team, 0, Some(1)),
        candidate("own-unknown-age", &team, 0, None),
        candidate("own-low", &team, -5, Some(50)),
        candidate("foreign-high", &other, 7, Some(10)),
        candidate("foreign-low", &other, -1, Some(10)),
    ];

    candidates.sort_by(|a, b| ordering.compare(a, b));
    let sorted: Vec<String> = candidates.iter().map(|c| c.key.to_string()).collect();
    assert_eq!(
        sorted,
        vec![
            "default/foreign-low",
            "default/foreign-high",
            "default/own-low",
            "default/own-new",
            "default/own-old",
            "default/own-unknown-age",
        ],
        "cohort candidates first, then priority, then newest admission, unknown admission time last"
    );

    // Strictness: two distinct candidates never compare equal, and the order is
    // antisymmetric.
    for a in &candidates {
        for b in &candidates {
            if a.key != b.key {
                assert_ne!(ordering.compare(a, b), Ordering::Equal, "{} vs {}", a.key, b.key);
                assert_eq!(ordering.compare(a, b), ordering.compare(b, a).reverse());
            }
        }
    }
}
