use std::sync::Arc;

use crate::api::cluster_state_dto::ClusterStateDto;
use crate::cache::Cache;
use crate::error::Result;
use crate::loader::parser::load_cluster_state;
use crate::queue::QueueManager;
use crate::scheduler::SchedulerContext;
use crate::store::{InMemoryStore, LogRecorder, WorkloadStore};

pub mod api;
pub mod cache;
pub mod domain;
pub mod error;
pub mod loader;
pub mod logger;
pub mod metrics;
pub mod queue;
pub mod scheduler;
pub mod store;

/// Builds a ready-to-run [`SchedulerContext`] from a cluster-state file.
pub async fn bootstrap(file_path: &str) -> Result<SchedulerContext> {
    let state = load_cluster_state(file_path)?;
    bootstrap_from_state(state).await
}

/// Seeds cache, queues, and store from a parsed cluster state.
///
/// Workloads that already hold a quota reservation are replayed into the cache
/// accounting (this is also the restart-recovery path); everything else enters
/// the pending queues.
pub async fn bootstrap_from_state(state: ClusterStateDto) -> Result<SchedulerContext> {
    let cache = Cache::new();
    let queues = QueueManager::new();
    let store: Arc<dyn WorkloadStore> = Arc::new(InMemoryStore::new());
    let ctx = SchedulerContext::new(cache, queues, store, Arc::new(LogRecorder));

    for flavor in state.resource_flavors {
        ctx.cache.add_flavor(flavor.into_domain());
    }

    for cluster_queue in state.cluster_queues {
        ctx.cache.add_cluster_queue(cluster_queue.into_domain());
    }

    for local_queue in state.local_queues {
        let local_queue = local_queue.into_domain();
        ctx.cache.add_local_queue(&local_queue);
        ctx.queues.add_local_queue(&local_queue);
    }

    for workload_dto in state.workloads {
        let workload = workload_dto.into_domain()?;
        let created = ctx.store.create(workload).await?;

        if created.admission.is_some() && created.has_quota_reserved() && !created.is_finished() {
            if let Err(error) = ctx.cache.assume_admission(&created) {
                log::error!("Replaying admission of workload {} failed: {}", created.key(), error);
            }
        } else {
            ctx.queues.push(created);
        }
    }

    log::info!("Scheduler context constructed successfully.");
    Ok(ctx)
}
