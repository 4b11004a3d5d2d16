use lazy_static::lazy_static;
use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::cache::Cache;
use crate::domain::ids::ClusterQueueName;
use crate::domain::quantity::Quantity;
use crate::queue::QueueManager;

/// One `(cohort, flavor, resource)` quota row of a cluster queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaMetric {
    pub cohort: Option<String>,
    pub flavor: String,
    pub resource: String,
    pub nominal_quota: Quantity,
    pub borrowing_limit: Option<Quantity>,
    pub usage: Quantity,
}

/// Gauge values exported per cluster queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterQueueMetrics {
    pub admitted_active_workloads: usize,
    pub pending_active: usize,
    pub pending_inadmissible: usize,
    pub quotas: Vec<QuotaMetric>,
}

lazy_static! {
    static ref REGISTRY: RwLock<BTreeMap<ClusterQueueName, ClusterQueueMetrics>> = RwLock::new(BTreeMap::new());
}

/// Recomputes every gauge from the cache and the queue manager. Called at the
/// end of each scheduling pass; queues that disappeared are dropped.
pub fn refresh(cache: &Cache, queues: &QueueManager) {
    let next = compute(cache, queues);
    let mut registry = REGISTRY.write().expect("RwLock poisoned");
    *registry = next;
}

/// Computes the gauge values without touching the shared registry.
pub fn compute(cache: &Cache, queues: &QueueManager) -> BTreeMap<ClusterQueueName, ClusterQueueMetrics> {
    let mut next: BTreeMap<ClusterQueueName, ClusterQueueMetrics> = BTreeMap::new();

    for name in cache.cluster_queue_names() {
        let Some(spec) = cache.cluster_queue_spec(&name) else {
            continue;
        };
        let usage = cache.usage_of(&name).unwrap_or_default();
        let (pending_active, pending_inadmissible) = queues.pending_counts(&name);

        let quotas = spec
            .all_quotas()
            .map(|(flavor, quota)| QuotaMetric {
                cohort: spec.cohort.as_ref().map(|cohort| cohort.to_string()),
                flavor: flavor.to_string(),
                resource: quota.resource.to_string(),
                nominal_quota: quota.nominal,
                borrowing_limit: quota.borrowing_limit,
                usage: usage.get(flavor, &quota.resource),
            })
            .collect();

        next.insert(
            name.clone(),
            ClusterQueueMetrics {
                admitted_active_workloads: cache.admitted_count(&name),
                pending_active,
                pending_inadmissible,
                quotas,
            },
        );
    }

    return next;
}

/// Current gauges of one cluster queue.
pub fn cluster_queue(name: &ClusterQueueName) -> Option<ClusterQueueMetrics> {
    let registry = REGISTRY.read().expect("RwLock poisoned");
    registry.get(name).cloned()
}

/// Snapshot of the whole registry, for export adapters and tests.
pub fn all() -> BTreeMap<ClusterQueueName, ClusterQueueMetrics> {
    let registry = REGISTRY.read().expect("RwLock poisoned");
    registry.clone()
}
