use std::collections::BTreeMap;

use chrono::Utc;
use cluster_admission::cache::Cache;
use cluster_admission::domain::cluster_queue::{ClusterQueueSpec, FlavorQuotas, ResourceGroup, ResourceQuota};
use cluster_admission::domain::flavor::ResourceFlavor;
use cluster_admission::domain::ids::{ClusterQueueName, CohortName, FlavorName, ResourceName};
use cluster_admission::domain::quantity::Quantity;
use cluster_admission::domain::resources::FlavorResourceUsage;
use cluster_admission::domain::workload::{Admission, ConditionType, PodSetAssignment, Workload};
use cluster_admission::error::Error;

fn cpu() -> ResourceName {
    ResourceName::new("cpu")
}

fn cpu_queue(name: &str, cohort: Option<&str>, flavor: &str, nominal_cpus: i64) -> ClusterQueueSpec {
    let mut spec = ClusterQueueSpec::new(name);
    spec.cohort = cohort.map(CohortName::new);
    spec.resource_groups.push(ResourceGroup {
        covered_resources: vec![cpu()],
        flavors: vec![FlavorQuotas {
            flavor: FlavorName::new(flavor),
            quotas: vec![ResourceQuota { resource: cpu(), nominal: Quantity::from_units(nominal_cpus), borrowing_limit: None }],
        }],
    });
    spec
}

fn admitted_workload(name: &str, cluster_queue: &str, flavor: &str, cpus_per_pod: i64, count: u32) -> Workload {
    let mut workload = Workload::new("default", name);
    let mut flavors = BTreeMap::new();
    flavors.insert(cpu(), FlavorName::new(flavor));
    let mut per_pod = BTreeMap::new();
    per_pod.insert(cpu(), Quantity::from_units(cpus_per_pod));

    workload.admission = Some(Admission {
        cluster_queue: ClusterQueueName::new(cluster_queue),
        pod_set_assignments: vec![PodSetAssignment { name: "main".to_string(), count, flavors, resource_usage: per_pod }],
    });
    workload.set_condition(ConditionType::QuotaReserved, true, "QuotaReserved", "test".to_string(), Utc::now());
    workload.set_condition(ConditionType::Admitted, true, "Admitted", "test".to_string(), Utc::now());
    workload
}

fn seeded_cache() -> Cache {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("default"));
    cache.add_cluster_queue(cpu_queue("team-a", None, "default", 10));
    cache
}

#[test]
fn usage_tracks_the_sum_of_admitted_contributions() {
    let cache = seeded_cache();
    let queue = ClusterQueueName::new("team-a");

    cache.assume_admission(&admitted_workload("one", "team-a", "default", 2, 1)).unwrap();
    cache.assume_admission(&admitted_workload("two", "team-a", "default", 1, 3)).unwrap();

    let usage = cache.usage_of(&queue).unwrap();
    assert_eq!(usage.get(&FlavorName::new("default"), &cpu()), Quantity::from_units(5), "2x1 + 1x3 CPUs must be charged");
}

#[test]
fn round_trip_of_admissions_restores_zero_usage() {
    let cache = seeded_cache();
    let queue = ClusterQueueName::new("team-a");
    let before = cache.usage_of(&queue).unwrap();

    let workloads: Vec<Workload> = (0..5).map(|i| admitted_workload(&format!("wl-{}", i), "team-a", "default", 1, i + 1)).collect();
    for workload in &workloads {
        cache.assume_admission(workload).unwrap();
    }
    for workload in workloads.iter().rev() {
        assert!(cache.forget_admission(&workload.key()).is_some());
    }

    let after = cache.usage_of(&queue).unwrap();
    assert_eq!(after, before, "removing admissions in reverse must restore the exact pre-admission state");
    assert!(after.is_empty());
}

#[test]
fn double_admission_is_an_invariant_violation() {
    let cache = seeded_cache();
    let workload = admitted_workload("dup", "team-a", "default", 2, 1);

    cache.assume_admission(&workload).unwrap();
    match cache.assume_admission(&workload) {
        Err(Error::InvariantViolation(_)) => {}
        other => panic!("expected an invariant violation, got {:?}", other),
    }
}

#[test]
fn reclaimable_pods_lower_the_effective_usage() {
    let cache = seeded_cache();
    let queue = ClusterQueueName::new("team-a");
    let workload = admitted_workload("shrinking", "team-a", "default", 2, 3);
    cache.assume_admission(&workload).unwrap();

    let mut reclaimable = BTreeMap::new();
    reclaimable.insert("main".to_string(), 2);
    cache.set_reclaimable(&workload.key(), reclaimable).unwrap();

    let usage = cache.usage_of(&queue).unwrap();
    assert_eq!(usage.get(&FlavorName::new("default"), &cpu()), Quantity::from_units(2), "2 of 3 pods reclaimed leaves one pod charged");
}

#[test]
fn unknown_flavor_reference_marks_the_queue_inactive() {
    let cache = Cache::new();
    cache.add_cluster_queue(cpu_queue("broken", None, "missing", 4));

    let name = ClusterQueueName::new("broken");
    assert!(!cache.is_active(&name));
    assert!(cache.inactive_reason(&name).unwrap().contains("missing"));

    // The queue heals once the flavor appears.
    cache.add_flavor(ResourceFlavor::new("missing"));
    assert!(cache.is_active(&name));

    cache.delete_flavor(&FlavorName::new("missing"));
    assert!(!cache.is_active(&name));
}

#[test]
fn duplicate_resource_coverage_marks_the_queue_inactive() {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("default"));

    let mut spec = cpu_queue("dup-coverage", None, "default", 4);
    spec.resource_groups.push(spec.resource_groups[0].clone());
    cache.add_cluster_queue(spec);

    assert!(!cache.is_active(&ClusterQueueName::new("dup-coverage")));
}

#[test]
fn snapshot_mutation_never_leaks_into_the_cache() {
    let cache = seeded_cache();
    cache.assume_admission(&admitted_workload("stable", "team-a", "default", 2, 2)).unwrap();

    let before = cache.snapshot();
    let mut working = cache.snapshot();
    let queue = ClusterQueueName::new("team-a");
    working.remove_admitted(&queue, &admitted_workload("stable", "team-a", "default", 2, 2).key());

    let after = cache.snapshot();
    assert_eq!(before, after, "a mutated snapshot must not change what the cache hands out next");
}

#[test]
fn cohort_borrowing_respects_the_members_free_quota() {
    let cache = Cache::new();
    cache.add_flavor(ResourceFlavor::new("default"));
    cache.add_cluster_queue(cpu_queue("c1", Some("shared"), "default", 6));
    cache.add_cluster_queue(cpu_queue("c2", Some("shared"), "default", 6));

    cache.assume_admission(&admitted_workload("c2-big", "c2", "default", 9, 1)).unwrap();

    let snapshot = cache.snapshot();
    let none = FlavorResourceUsage::new();
    let free = snapshot.free_capacity(&ClusterQueueName::new("c1"), &FlavorName::new("default"), &cpu(), &none);
    assert_eq!(free, Quantity::from_units(3), "c2 borrowed 3 of c1's CPUs, only 3 are left cohort-wide");
}
