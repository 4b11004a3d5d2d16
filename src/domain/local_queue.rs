use crate::domain::ids::{ClusterQueueName, LocalQueueKey};

/// Namespaced pointer to a cluster queue.
///
/// Workloads name a local queue; the admission engine resolves it to the
/// cluster-scope quota bucket. The indirection exists so namespace-scoped
/// authorization can gate which cluster queues a namespace may submit to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalQueue {
    pub namespace: String,
    pub name: String,
    pub cluster_queue: ClusterQueueName,
}

impl LocalQueue {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, cluster_queue: ClusterQueueName) -> Self {
        LocalQueue { namespace: namespace.into(), name: name.into(), cluster_queue }
    }

    pub fn key(&self) -> LocalQueueKey {
        LocalQueueKey::namespaced(&self.namespace, &self.name)
    }
}
