use serde::{Deserialize, Serialize};

use crate::api::cluster_queue_dto::ClusterQueueDto;
use crate::api::local_queue_dto::LocalQueueDto;
use crate::api::resource_flavor_dto::ResourceFlavorDto;
use crate::api::workload_dto::WorkloadDto;

/// Top-level schema of a cluster-state file: everything needed to seed the cache
/// and the pending queues on startup, or to rebuild them after a restart.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStateDto {
    #[serde(default)]
    pub resource_flavors: Vec<ResourceFlavorDto>,
    #[serde(default)]
    pub cluster_queues: Vec<ClusterQueueDto>,
    #[serde(default)]
    pub local_queues: Vec<LocalQueueDto>,
    #[serde(default)]
    pub workloads: Vec<WorkloadDto>,
}
