use serde::{Deserialize, Serialize};

use crate::domain::ids::ClusterQueueName;
use crate::domain::local_queue::LocalQueue;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LocalQueueDto {
    pub name: String,
    pub namespace: String,
    pub cluster_queue: String,
}

impl LocalQueueDto {
    pub fn into_domain(self) -> LocalQueue {
        LocalQueue::new(self.namespace, self.name, ClusterQueueName::new(self.cluster_queue))
    }
}
